//! Configuration loading, hashing, and validation.

mod types;
mod validation;

pub use types::{Config, MigrationOptions, SourceConfig, TargetConfig};
pub use validation::validate;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }

    /// SHA-256 hash of the serialized configuration.
    ///
    /// Recorded with each run so a resume against a changed configuration
    /// can be rejected instead of silently mixing semantics.
    pub fn hash(&self) -> String {
        let serialized = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
source:
  uri: mongodb://localhost:27017
  database: clinical
target:
  host: localhost
  database: clinical
  user: postgres
  password: secret
"#
    }

    #[test]
    fn test_from_yaml_valid() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(config.source.database, "clinical");
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(minimal_yaml()).unwrap();
        let b = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_changes_with_config() {
        let a = Config::from_yaml(minimal_yaml()).unwrap();
        let mut b = Config::from_yaml(minimal_yaml()).unwrap();
        b.migration.batch_size = Some(500);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/config.yaml").is_err());
    }
}
