//! Replication settings and run statistics

use revstore_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of changes fetched per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Settings shared by pull and push replications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Changes fetched per batch; the checkpoint advances once per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Label used in log lines
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_name() -> String {
    "replication".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            batch_size: default_batch_size(),
            name: default_name(),
        }
    }
}

impl ReplicationConfig {
    /// Config with a custom batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Config with a custom log label
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reject settings a run cannot use
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::illegal_argument("batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// What one replication run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Non-empty change batches processed
    pub batches: usize,
    /// Revisions the target did not already have
    pub revisions_transferred: usize,
    /// Change-feed entries examined
    pub documents_checked: usize,
    /// True if the run stopped because it was cancelled
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ReplicationConfig::default();
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_zero_batch_rejected() {
        let cfg = ReplicationConfig::default().with_batch_size(0);
        assert!(matches!(cfg.validate(), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: ReplicationConfig = serde_json::from_str(r#"{"name": "nightly"}"#).unwrap();
        assert_eq!(cfg.name, "nightly");
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
    }
}
