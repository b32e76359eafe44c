#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
/// The identifier for a session.
///
/// It is used as the session cookie value (before the cookie processor signs
/// or encrypts it, if configured to), as well as the suffix
/// of the cache key holding the server-side state (see [`cache_key`]).
///
/// # Format stability
///
/// Identifiers minted by [`SessionId::random`] are 128-bit random tokens,
/// rendered as 32 lowercase hexadecimal characters.
/// Identifiers coming from the client are accepted as opaque strings.
///
/// [`cache_key`]: crate::cache_key
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random identifier using the random number generator
    /// provided by the underlying operating system.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an identifier received from the client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The string representation of this identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning its string representation.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
