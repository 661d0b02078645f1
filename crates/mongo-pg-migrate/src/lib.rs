//! # mongo-pg-migrate
//!
//! Migration engine for moving schemaless clinical record collections from
//! MongoDB into a normalized PostgreSQL schema.
//!
//! The engine provides:
//!
//! - **Batched, transactional migration** with payload-bounded sub-batches
//!   and per-document fallback on batch failure
//! - **Bounded producer/consumer pipelines** per collection (backpressure)
//!   with configurable cross-collection parallelism
//! - **Durable checkpoints** in the target's `_migration` schema for resume
//! - **Schema and data validation** separating blocking errors from
//!   non-blocking conflicts
//! - **Rollback** (full, schema-only, partial, point-in-time) and
//!   **failure-classified recovery** with a static strategy catalog
//!
//! ## Example
//!
//! ```rust,no_run
//! use mongo_pg_migrate::{Config, MigrationEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mongo_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let engine = MigrationEngine::new(config).await?;
//!     let result = engine.migrate(CancellationToken::new()).await?;
//!     println!("Migrated {} documents", result.statistics.total_migrated());
//!     Ok(())
//! }
//! ```

pub mod analyze;
pub mod backup;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod index;
pub mod recovery;
pub mod rollback;
pub mod schema;
pub mod source;
pub mod state;
pub mod status;
pub mod target;
pub mod transform;
pub mod validate;

// Re-exports for convenient access
pub use config::{Config, MigrationOptions, SourceConfig, TargetConfig};
pub use engine::{MigrationEngine, MigrationResult};
pub use error::{MigrateError, Result};
pub use recovery::{RecoveryConfig, RecoveryService};
pub use rollback::{RollbackConfig, RollbackService, RollbackType};
pub use source::MongoSource;
pub use state::{MigrationCheckpoint, RollbackPoint, TrackingStore};
pub use status::{MigrationState, MigrationStatistics, MigrationStatus, StatusRegistry};
pub use target::PgPool;
