//! Durable migration-tracking state in the target database.
//!
//! Checkpoints are the only state that survives a process restart, so they
//! live in the target under a dedicated `_migration` schema together with
//! run records, rollback points, and the error log the recovery service
//! classifies from.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{MigrateError, Result};
use crate::target::PgPool;

/// Schema owned by the engine for its tracking tables.
pub const TRACKING_SCHEMA: &str = "_migration";

/// Durable record of migration progress within one collection.
///
/// Written strictly after the batch it describes has committed, so a
/// checkpoint never claims progress that was not durably written.
#[derive(Debug, Clone)]
pub struct MigrationCheckpoint {
    pub checkpoint_id: Uuid,
    pub migration_id: String,
    pub collection: String,
    /// Identifier of the last committed source document.
    pub last_document_id: String,
    /// Documents processed in this collection so far.
    pub documents_processed: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Relational state a rollback point corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    PreMigration,
    SchemaCreated,
    DataMigration,
    PostMigration,
}

pub fn rollback_state_to_str(state: RollbackState) -> &'static str {
    match state {
        RollbackState::PreMigration => "pre_migration",
        RollbackState::SchemaCreated => "schema_created",
        RollbackState::DataMigration => "data_migration",
        RollbackState::PostMigration => "post_migration",
    }
}

pub fn str_to_rollback_state(s: &str) -> Result<RollbackState> {
    match s {
        "pre_migration" => Ok(RollbackState::PreMigration),
        "schema_created" => Ok(RollbackState::SchemaCreated),
        "data_migration" => Ok(RollbackState::DataMigration),
        "post_migration" => Ok(RollbackState::PostMigration),
        _ => Err(MigrateError::Config(format!(
            "Invalid rollback state: {}",
            s
        ))),
    }
}

/// A named, addressable marker of migration state usable as a restore target.
#[derive(Debug, Clone)]
pub struct RollbackPoint {
    pub rollback_point_id: Uuid,
    pub migration_id: String,
    pub description: String,
    pub state: RollbackState,
    /// Collections fully migrated as of this point.
    pub collections_migrated: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the persisted engine log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub migration_id: String,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Store for migration-tracking tables in the target database.
pub struct TrackingStore {
    schema: String,
}

impl Default for TrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingStore {
    pub fn new() -> Self {
        Self {
            schema: TRACKING_SCHEMA.to_string(),
        }
    }

    /// Create the tracking schema and tables. Idempotent.
    pub async fn init_schema(&self, target: &PgPool) -> Result<()> {
        let conn = target.get().await?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.migration_runs (
                    migration_id TEXT PRIMARY KEY,
                    config_hash TEXT NOT NULL,
                    started_at TIMESTAMPTZ NOT NULL,
                    completed_at TIMESTAMPTZ,
                    state TEXT NOT NULL CHECK (state IN
                        ('initializing', 'running', 'completed', 'failed', 'cancelled'))
                )",
                self.schema
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.migration_checkpoints (
                    checkpoint_id UUID PRIMARY KEY,
                    migration_id TEXT NOT NULL,
                    collection TEXT NOT NULL,
                    last_document_id TEXT NOT NULL,
                    documents_processed BIGINT NOT NULL,
                    status TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.schema
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_checkpoints_migration
                    ON {}.migration_checkpoints(migration_id, collection, created_at DESC)",
                self.schema
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.rollback_points (
                    rollback_point_id UUID PRIMARY KEY,
                    migration_id TEXT NOT NULL,
                    description TEXT NOT NULL,
                    state TEXT NOT NULL CHECK (state IN
                        ('pre_migration', 'schema_created', 'data_migration', 'post_migration')),
                    collections_migrated TEXT[] NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.schema
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.migration_log (
                    id BIGSERIAL PRIMARY KEY,
                    migration_id TEXT NOT NULL,
                    level TEXT NOT NULL,
                    message TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.schema
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_migration_log_errors
                    ON {}.migration_log(migration_id, created_at DESC)
                    WHERE level = 'error'",
                self.schema
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    /// Record the start of a run.
    pub async fn record_run_start(
        &self,
        target: &PgPool,
        migration_id: &str,
        config_hash: &str,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = target.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO {}.migration_runs (migration_id, config_hash, started_at, state)
                 VALUES ($1, $2, $3, 'running')
                 ON CONFLICT (migration_id) DO NOTHING",
                self.schema
            ),
            &[&migration_id, &config_hash, &started_at],
        )
        .await?;
        Ok(())
    }

    /// Record a terminal (or intermediate) run state.
    pub async fn record_run_state(
        &self,
        target: &PgPool,
        migration_id: &str,
        state: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = target.get().await?;
        conn.execute(
            &format!(
                "UPDATE {}.migration_runs SET state = $2, completed_at = $3
                 WHERE migration_id = $1",
                self.schema
            ),
            &[&migration_id, &state, &completed_at],
        )
        .await?;
        Ok(())
    }

    /// Whether a run with this id exists.
    pub async fn run_exists(&self, target: &PgPool, migration_id: &str) -> Result<bool> {
        let conn = target.get().await?;
        let row = conn
            .query_one(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM {}.migration_runs WHERE migration_id = $1)",
                    self.schema
                ),
                &[&migration_id],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Persist a checkpoint. Each checkpoint row carries a fresh identifier,
    /// so concurrent collection workers never contend on a key.
    pub async fn write_checkpoint(
        &self,
        target: &PgPool,
        checkpoint: &MigrationCheckpoint,
    ) -> Result<()> {
        let conn = target.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO {}.migration_checkpoints
                 (checkpoint_id, migration_id, collection, last_document_id,
                  documents_processed, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                self.schema
            ),
            &[
                &checkpoint.checkpoint_id,
                &checkpoint.migration_id,
                &checkpoint.collection,
                &checkpoint.last_document_id,
                &checkpoint.documents_processed,
                &checkpoint.status,
                &checkpoint.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    /// Most recent checkpoint for a migration, optionally per collection.
    pub async fn latest_checkpoint(
        &self,
        target: &PgPool,
        migration_id: &str,
        collection: Option<&str>,
    ) -> Result<Option<MigrationCheckpoint>> {
        let conn = target.get().await?;
        let row = match collection {
            Some(collection) => {
                conn.query_opt(
                    &format!(
                        "SELECT checkpoint_id, migration_id, collection, last_document_id,
                                documents_processed, status, created_at
                         FROM {}.migration_checkpoints
                         WHERE migration_id = $1 AND collection = $2
                         ORDER BY created_at DESC LIMIT 1",
                        self.schema
                    ),
                    &[&migration_id, &collection],
                )
                .await?
            }
            None => {
                conn.query_opt(
                    &format!(
                        "SELECT checkpoint_id, migration_id, collection, last_document_id,
                                documents_processed, status, created_at
                         FROM {}.migration_checkpoints
                         WHERE migration_id = $1
                         ORDER BY created_at DESC LIMIT 1",
                        self.schema
                    ),
                    &[&migration_id],
                )
                .await?
            }
        };

        Ok(row.map(|row| MigrationCheckpoint {
            checkpoint_id: row.get(0),
            migration_id: row.get(1),
            collection: row.get(2),
            last_document_id: row.get(3),
            documents_processed: row.get(4),
            status: row.get(5),
            created_at: row.get(6),
        }))
    }

    /// Collections with at least one checkpoint for this migration.
    pub async fn checkpointed_collections(
        &self,
        target: &PgPool,
        migration_id: &str,
    ) -> Result<Vec<String>> {
        let conn = target.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT DISTINCT collection FROM {}.migration_checkpoints
                     WHERE migration_id = $1 ORDER BY collection",
                    self.schema
                ),
                &[&migration_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Create and persist a rollback point.
    pub async fn create_rollback_point(
        &self,
        target: &PgPool,
        migration_id: &str,
        description: &str,
        state: RollbackState,
        collections_migrated: Vec<String>,
    ) -> Result<RollbackPoint> {
        let point = RollbackPoint {
            rollback_point_id: Uuid::new_v4(),
            migration_id: migration_id.to_string(),
            description: description.to_string(),
            state,
            collections_migrated,
            created_at: Utc::now(),
        };

        let conn = target.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO {}.rollback_points
                 (rollback_point_id, migration_id, description, state,
                  collections_migrated, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                self.schema
            ),
            &[
                &point.rollback_point_id,
                &point.migration_id,
                &point.description,
                &rollback_state_to_str(point.state),
                &point.collections_migrated,
                &point.created_at,
            ],
        )
        .await?;

        Ok(point)
    }

    /// List rollback points for a migration, newest first.
    pub async fn list_rollback_points(
        &self,
        target: &PgPool,
        migration_id: &str,
    ) -> Result<Vec<RollbackPoint>> {
        let conn = target.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT rollback_point_id, migration_id, description, state,
                            collections_migrated, created_at
                     FROM {}.rollback_points
                     WHERE migration_id = $1
                     ORDER BY created_at DESC",
                    self.schema
                ),
                &[&migration_id],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(RollbackPoint {
                    rollback_point_id: row.get(0),
                    migration_id: row.get(1),
                    description: row.get(2),
                    state: str_to_rollback_state(row.get(3))?,
                    collections_migrated: row.get(4),
                    created_at: row.get(5),
                })
            })
            .collect()
    }

    /// Fetch one rollback point by id.
    pub async fn get_rollback_point(
        &self,
        target: &PgPool,
        rollback_point_id: Uuid,
    ) -> Result<Option<RollbackPoint>> {
        let conn = target.get().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT rollback_point_id, migration_id, description, state,
                            collections_migrated, created_at
                     FROM {}.rollback_points
                     WHERE rollback_point_id = $1",
                    self.schema
                ),
                &[&rollback_point_id],
            )
            .await?;

        row.map(|row| {
            Ok(RollbackPoint {
                rollback_point_id: row.get(0),
                migration_id: row.get(1),
                description: row.get(2),
                state: str_to_rollback_state(row.get(3))?,
                collections_migrated: row.get(4),
                created_at: row.get(5),
            })
        })
        .transpose()
    }

    /// Append a log entry.
    pub async fn log(
        &self,
        target: &PgPool,
        migration_id: &str,
        level: &str,
        message: &str,
    ) -> Result<()> {
        let conn = target.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO {}.migration_log (migration_id, level, message)
                 VALUES ($1, $2, $3)",
                self.schema
            ),
            &[&migration_id, &level, &message],
        )
        .await?;
        Ok(())
    }

    /// Most recent error-level log entry for a migration.
    pub async fn latest_error(
        &self,
        target: &PgPool,
        migration_id: &str,
    ) -> Result<Option<LogEntry>> {
        let conn = target.get().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT migration_id, level, message, created_at
                     FROM {}.migration_log
                     WHERE migration_id = $1 AND level = 'error'
                     ORDER BY created_at DESC LIMIT 1",
                    self.schema
                ),
                &[&migration_id],
            )
            .await?;

        Ok(row.map(|row| LogEntry {
            migration_id: row.get(0),
            level: row.get(1),
            message: row.get(2),
            created_at: row.get(3),
        }))
    }
}
