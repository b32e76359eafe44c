#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the way session state is stored in the distributed cache.
pub struct SessionStateConfig {
    /// How long a session can stay idle before its server-side state expires.
    ///
    /// It's used as the sliding expiration of the cache entry holding the session state:
    /// every write pushes the expiry forward by this amount.
    ///
    /// # Default
    ///
    /// The default value is 20 minutes.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: std::time::Duration,
}

impl Default for SessionStateConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_idle_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 20)
}
