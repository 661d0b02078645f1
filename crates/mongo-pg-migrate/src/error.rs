//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, out-of-range values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source store connection or query error.
    #[error("Source store error: {0}")]
    Source(#[from] mongodb::error::Error),

    /// Target database connection or query error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Target schema is missing or incompatible. Writing into it risks corruption.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Pre-migration validation failed with blocking errors.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Migration failed for a specific collection.
    #[error("Migration failed for collection {collection}: {message}")]
    Collection { collection: String, message: String },

    /// Backup or restore operation failed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// Rollback operation failed.
    #[error("Rollback error: {0}")]
    Rollback(String),

    /// Recovery operation failed.
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// No status entry exists for the given migration identifier.
    #[error("No status recorded for migration {0}")]
    StatusNotFound(String),

    /// An external operation exceeded its deadline.
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// IO error (file operations, subprocess spawning).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl From<deadpool_postgres::PoolError> for MigrateError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        MigrateError::Pool {
            message: e.to_string(),
            context: "deadpool-postgres".into(),
        }
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Collection error.
    pub fn collection(collection: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Collection {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create a Timeout error.
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        MigrateError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = MigrateError::Config("batch_size must be at least 1".into());
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_collection_helper() {
        let err = MigrateError::collection("entries", "cursor closed");
        assert_eq!(
            err.to_string(),
            "Migration failed for collection entries: cursor closed"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = MigrateError::timeout("pg_dump", 300);
        assert!(err.to_string().contains("pg_dump"));
        assert!(err.to_string().contains("300"));
    }

    #[test]
    fn test_status_not_found_is_distinct() {
        let err = MigrateError::StatusNotFound("abc".into());
        assert!(matches!(err, MigrateError::StatusNotFound(_)));
    }
}
