//! Database configuration via `revstore.toml`
//!
//! On first open a default `revstore.toml` with comments is created in the
//! database directory. To change settings, edit the file and reopen.

use revstore_core::limits::{DEFAULT_QUERY_PLACEHOLDER_LIMIT, MIN_QUERY_PLACEHOLDER_LIMIT};
use revstore_core::{Error, Result};
use revstore_storage::Synchronous;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "revstore.toml";

/// Database configuration loaded from `revstore.toml`.
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// query_placeholder_limit = 500
/// attachments_dir = "attachments"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Durability mode: `"standard"` or `"always"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Maximum number of bound parameters per batched query.
    #[serde(default = "default_placeholder_limit")]
    pub query_placeholder_limit: usize,
    /// Blob directory, relative to the database directory.
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: String,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_placeholder_limit() -> usize {
    DEFAULT_QUERY_PLACEHOLDER_LIMIT
}

fn default_attachments_dir() -> String {
    "attachments".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            query_placeholder_limit: default_placeholder_limit(),
            attachments_dir: default_attachments_dir(),
        }
    }
}

impl DatabaseConfig {
    /// Parse the durability string into a SQLite synchronous mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"standard"` or `"always"`.
    pub fn durability_mode(&self) -> Result<Synchronous> {
        match self.durability.as_str() {
            "standard" => Ok(Synchronous::Normal),
            "always" => Ok(Synchronous::Full),
            other => Err(Error::illegal_argument(format!(
                "Invalid durability mode '{}' in {}. Expected \"standard\" or \"always\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.query_placeholder_limit < MIN_QUERY_PLACEHOLDER_LIMIT {
            return Err(Error::illegal_argument(format!(
                "query_placeholder_limit must be at least {}, got {}",
                MIN_QUERY_PLACEHOLDER_LIMIT, self.query_placeholder_limit
            )));
        }
        let dir = Path::new(&self.attachments_dir);
        if self.attachments_dir.is_empty() || dir.is_absolute() {
            return Err(Error::illegal_argument(format!(
                "attachments_dir must be a non-empty relative path, got '{}'",
                self.attachments_dir
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# revstore database configuration
#
# Durability mode: "standard" (default) or "always"
#   "standard" = SQLite synchronous=NORMAL, the last commits may be lost on power failure
#   "always"   = SQLite synchronous=FULL, every commit is fsynced
durability = "standard"

# Maximum bound parameters per batched query (revs_diff, documents_with_ids).
query_placeholder_limit = 500

# Attachment blob directory, relative to this file.
attachments_dir = "attachments"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::storage(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: DatabaseConfig = toml::from_str(&content).map_err(|e| {
            Error::illegal_argument(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::storage(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::storage(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
