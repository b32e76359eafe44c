//! The representation of the session state inside the distributed cache.
//!
//! The state is stored as a JSON object: keys are kept as-is, values are
//! encoded using standard base64 (with padding).
//! Peer instances read and write the same entries, so this format must not change.
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use std::collections::HashMap;

/// Serialize the session state to the bytes stored in the cache.
pub(crate) fn encode(state: &HashMap<String, Vec<u8>>) -> Result<Vec<u8>, serde_json::Error> {
    let wire: HashMap<&str, String> = state
        .iter()
        .map(|(key, value)| (key.as_str(), BASE64_STANDARD.encode(value)))
        .collect();
    serde_json::to_vec(&wire)
}

/// Deserialize the session state out of the bytes retrieved from the cache.
///
/// Peers may store `null` values: those entries are skipped.
pub(crate) fn decode(bytes: &[u8]) -> Result<HashMap<String, Vec<u8>>, DecodeError> {
    let wire: HashMap<String, Option<String>> = serde_json::from_slice(bytes)?;
    wire.into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .map(|(key, value)| match BASE64_STANDARD.decode(value.as_bytes()) {
            Ok(value) => Ok((key, value)),
            Err(source) => Err(DecodeError::InvalidValue { key, source }),
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeError {
    #[error("The cached session state is not a JSON object of strings (or nulls)")]
    InvalidJson(#[from] serde_json::Error),
    #[error("The cached value for `{key}` is not valid base64")]
    InvalidValue {
        key: String,
        #[source]
        source: base64::DecodeError,
    },
}
