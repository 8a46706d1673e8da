use serde::Deserialize;
use std::time::Duration;

/// Engine tunables. Every field falls back to its default when missing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Age after which an unanswered request is resent or dropped.
    pub response_timeout_ms: u64,
    pub max_resend: u32,
    /// Only answer a sync frame that is the last byte of a read batch.
    pub dispatch_only_at_batch_end: bool,
    /// Drop received frames with a bad checksum.
    pub verify_checksum: bool,
    /// Longest frame kept while waiting for an end-of-frame marker.
    pub max_frame_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_timeout_ms: 10_000,
            max_resend: 2,
            dispatch_only_at_batch_end: true,
            verify_checksum: false,
            max_frame_len: 64,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config =
            Config::from_json(r#"{"max_resend": 5, "verify_checksum": true}"#).unwrap();
        assert_eq!(config.max_resend, 5);
        assert!(config.verify_checksum);
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Config::from_json(r#"{"max_resend": "many"}"#).is_err());
    }
}
