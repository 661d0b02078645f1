//! Structural configuration validation.
//!
//! Runs before any connection is opened; every failure names the offending
//! field so operators can fix the file without reading engine internals.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.uri.is_empty() {
        return Err(MigrateError::Config("source.uri is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.r#type != "mongodb" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mongodb', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    // Migration options - only range-check values that were explicitly set
    let m = &config.migration;
    if let Some(0) = m.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = m.max_parallel_collections {
        return Err(MigrateError::Config(
            "migration.max_parallel_collections must be at least 1".into(),
        ));
    }
    if let Some(0) = m.max_batch_payload_bytes {
        return Err(MigrateError::Config(
            "migration.max_batch_payload_bytes must be at least 1".into(),
        ));
    }
    if let Some(0) = m.checkpoint_interval {
        return Err(MigrateError::Config(
            "migration.checkpoint_interval must be at least 1".into(),
        ));
    }
    if let Some(0) = m.read_ahead_batches {
        return Err(MigrateError::Config(
            "migration.read_ahead_batches must be at least 1".into(),
        ));
    }
    if let Some(0) = m.memory_ceiling_bytes {
        return Err(MigrateError::Config(
            "migration.memory_ceiling_bytes must be greater than 0".into(),
        ));
    }
    if let Some(0) = m.validation_sample_size {
        return Err(MigrateError::Config(
            "migration.validation_sample_size must be at least 1".into(),
        ));
    }

    if let (Some(start), Some(end)) = (m.start_date, m.end_date) {
        if start >= end {
            return Err(MigrateError::Config(format!(
                "migration.start_date ({}) must be before migration.end_date ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn valid_config() -> Config {
        Config::from_yaml(
            r#"
source:
  uri: mongodb://localhost:27017
  database: clinical
target:
  host: localhost
  database: clinical
  user: postgres
  password: secret
"#,
        )
        .unwrap()
    }

    fn expect_field_error(config: &Config, field: &str) {
        match validate(config) {
            Err(MigrateError::Config(msg)) => {
                assert!(msg.contains(field), "expected '{}' in '{}'", field, msg)
            }
            other => panic!("expected Config error naming {}, got {:?}", field, other.err()),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_uri() {
        let mut config = valid_config();
        config.source.uri = String::new();
        expect_field_error(&config, "source.uri");
    }

    #[test]
    fn test_wrong_source_type() {
        let mut config = valid_config();
        config.source.r#type = "couchdb".to_string();
        expect_field_error(&config, "source.type");
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = String::new();
        expect_field_error(&config, "target.user");
    }

    #[test]
    fn test_zero_batch_size_names_field() {
        let mut config = valid_config();
        config.migration.batch_size = Some(0);
        expect_field_error(&config, "migration.batch_size");
    }

    #[test]
    fn test_zero_parallelism_names_field() {
        let mut config = valid_config();
        config.migration.max_parallel_collections = Some(0);
        expect_field_error(&config, "migration.max_parallel_collections");
    }

    #[test]
    fn test_zero_memory_ceiling_names_field() {
        let mut config = valid_config();
        config.migration.memory_ceiling_bytes = Some(0);
        expect_field_error(&config, "migration.memory_ceiling_bytes");
    }

    #[test]
    fn test_zero_payload_budget_names_field() {
        let mut config = valid_config();
        config.migration.max_batch_payload_bytes = Some(0);
        expect_field_error(&config, "migration.max_batch_payload_bytes");
    }

    #[test]
    fn test_inverted_date_range() {
        let mut config = valid_config();
        config.migration.start_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        config.migration.end_date = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        expect_field_error(&config, "start_date");
    }

    #[test]
    fn test_equal_dates_rejected() {
        let mut config = valid_config();
        let d = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        config.migration.start_date = Some(d);
        config.migration.end_date = Some(d);
        assert!(validate(&config).is_err());
    }
}
