//! Migration rollback: full, schema-only, partial, and point-in-time.
//!
//! Destructive work is planned first as an explicit operation list, then
//! executed best-effort per table: one failed drop is recorded and the rest
//! proceed. A lightweight integrity check runs afterwards and is reported,
//! but does not retroactively fail a rollback whose drops succeeded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::{BackupMetadata, BackupService};
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::schema::expected_tables;
use crate::source::MongoSource;
use crate::state::{RollbackPoint, RollbackState, TrackingStore};
use crate::target::{qualify_table, PgPool};

/// What kind of rollback to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackType {
    /// Drop all migrated tables; optionally restore the source from backup.
    Full,
    /// Drop tables and indexes only; no data restore.
    SchemaOnly,
    /// Restrict by collection, date range, or explicit document ids.
    Partial,
    /// Restore to a previously recorded rollback point.
    PointInTime,
}

/// Rollback request.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub migration_id: String,
    pub rollback_type: RollbackType,
    /// Drop tables outright; false truncates them instead.
    pub drop_tables: bool,
    /// Restore the source store from this archive after dropping (Full only).
    pub restore_source_archive: Option<PathBuf>,
    /// Partial: restrict to these collections (empty = all migrated).
    pub collections: Vec<String>,
    /// Partial: restrict to rows dated at or after this instant.
    pub start_date: Option<DateTime<Utc>>,
    /// Partial: restrict to rows dated before this instant.
    pub end_date: Option<DateTime<Utc>>,
    /// Partial: restrict to these source document ids.
    pub document_ids: Vec<String>,
    /// PointInTime: the recorded point to restore to.
    pub rollback_point_id: Option<Uuid>,
    /// Validate and report without any destructive action.
    pub dry_run: bool,
    /// Operator confirmation for destructive actions.
    pub confirmed: bool,
}

impl RollbackConfig {
    pub fn full(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            rollback_type: RollbackType::Full,
            drop_tables: true,
            restore_source_archive: None,
            collections: Vec::new(),
            start_date: None,
            end_date: None,
            document_ids: Vec::new(),
            rollback_point_id: None,
            dry_run: false,
            confirmed: false,
        }
    }
}

/// One planned destructive operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOp {
    DropTable(String),
    TruncateTable(String),
    DeleteByDateRange {
        table: String,
        column: &'static str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    DeleteByIds {
        table: String,
    },
    RestoreSource(PathBuf),
}

/// Result of a rollback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub migration_id: String,
    pub rollback_type: RollbackType,
    pub success: bool,
    pub dry_run: bool,
    pub tables_attempted: usize,
    pub tables_dropped: usize,
    pub rows_deleted: i64,
    pub failed_operations: Vec<String>,
    /// Post-rollback reachability check; informational.
    pub integrity_ok: Option<bool>,
    pub duration_ms: i64,
}

/// Executes rollbacks against the target (and optionally the source).
pub struct RollbackService {
    config: Arc<Config>,
    source: Arc<MongoSource>,
    target: Arc<PgPool>,
    tracking: Arc<TrackingStore>,
    backup: BackupService,
    /// Deadline for the external restore process.
    pub restore_timeout: Duration,
}

impl RollbackService {
    pub fn new(
        config: Arc<Config>,
        source: Arc<MongoSource>,
        target: Arc<PgPool>,
        tracking: Arc<TrackingStore>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            tracking,
            backup: BackupService::new(),
            restore_timeout: Duration::from_secs(3_600),
        }
    }

    /// Validate a rollback request without executing it.
    pub async fn validate_rollback(&self, cfg: &RollbackConfig) -> Result<()> {
        if !self
            .tracking
            .run_exists(&self.target, &cfg.migration_id)
            .await?
        {
            return Err(MigrateError::Rollback(format!(
                "no migration run recorded with id {}",
                cfg.migration_id
            )));
        }

        match cfg.rollback_type {
            RollbackType::Partial => {
                let has_filter = !cfg.collections.is_empty()
                    || cfg.start_date.is_some()
                    || cfg.end_date.is_some()
                    || !cfg.document_ids.is_empty();
                if !has_filter {
                    return Err(MigrateError::Rollback(
                        "partial rollback requires a collection, date-range, or id filter".into(),
                    ));
                }
            }
            RollbackType::PointInTime => {
                let point_id = cfg.rollback_point_id.ok_or_else(|| {
                    MigrateError::Rollback(
                        "point-in-time rollback requires a rollback point id".into(),
                    )
                })?;
                if self
                    .tracking
                    .get_rollback_point(&self.target, point_id)
                    .await?
                    .is_none()
                {
                    return Err(MigrateError::Rollback(format!(
                        "rollback point {} does not exist",
                        point_id
                    )));
                }
            }
            _ => {}
        }

        if let Some(archive) = &cfg.restore_source_archive {
            let metadata = BackupMetadata::load(archive).map_err(|e| {
                MigrateError::Rollback(format!("cannot load backup metadata: {}", e))
            })?;
            let verification = self.backup.verify(&metadata).await?;
            if !verification.valid {
                return Err(MigrateError::Rollback(format!(
                    "backup archive failed verification: {}",
                    verification.issues.join("; ")
                )));
            }
        }

        Ok(())
    }

    /// Execute a rollback.
    pub async fn rollback(&self, cfg: &RollbackConfig) -> Result<RollbackResult> {
        let started = Instant::now();
        self.validate_rollback(cfg).await?;

        let migrated = self
            .tracking
            .checkpointed_collections(&self.target, &cfg.migration_id)
            .await?;
        let point = match cfg.rollback_point_id {
            Some(id) => self.tracking.get_rollback_point(&self.target, id).await?,
            None => None,
        };

        let plan = plan_rollback(cfg, &migrated, point.as_ref());

        if cfg.dry_run {
            info!(
                "Dry-run rollback for {}: {} planned operations",
                cfg.migration_id,
                plan.len()
            );
            return Ok(RollbackResult {
                migration_id: cfg.migration_id.clone(),
                rollback_type: cfg.rollback_type,
                success: true,
                dry_run: true,
                tables_attempted: plan.len(),
                tables_dropped: 0,
                rows_deleted: 0,
                failed_operations: Vec::new(),
                integrity_ok: None,
                duration_ms: started.elapsed().as_millis() as i64,
            });
        }

        // Safety gate: no destructive action without explicit confirmation.
        if !cfg.confirmed {
            return Err(MigrateError::Rollback(
                "rollback is destructive; set confirmed=true to proceed".into(),
            ));
        }
        info!(
            "Rollback confirmed for migration {} ({:?}, {} operations)",
            cfg.migration_id,
            cfg.rollback_type,
            plan.len()
        );

        let mut result = RollbackResult {
            migration_id: cfg.migration_id.clone(),
            rollback_type: cfg.rollback_type,
            success: true,
            dry_run: false,
            tables_attempted: 0,
            tables_dropped: 0,
            rows_deleted: 0,
            failed_operations: Vec::new(),
            integrity_ok: None,
            duration_ms: 0,
        };
        let mut restored_source = false;

        for op in &plan {
            match op {
                RollbackOp::DropTable(table) => {
                    result.tables_attempted += 1;
                    match self.target.drop_table(&self.target.schema, table).await {
                        Ok(()) => result.tables_dropped += 1,
                        Err(e) => {
                            warn!("failed to drop {}: {}", table, e);
                            result
                                .failed_operations
                                .push(format!("drop {}: {}", table, e));
                        }
                    }
                }
                RollbackOp::TruncateTable(table) => {
                    result.tables_attempted += 1;
                    match self.target.truncate_table(&self.target.schema, table).await {
                        Ok(()) => result.tables_dropped += 1,
                        Err(e) => {
                            warn!("failed to truncate {}: {}", table, e);
                            result
                                .failed_operations
                                .push(format!("truncate {}: {}", table, e));
                        }
                    }
                }
                RollbackOp::DeleteByDateRange {
                    table,
                    column,
                    start,
                    end,
                } => match self.delete_by_date(table, column, *start, *end).await {
                    Ok(deleted) => result.rows_deleted += deleted,
                    Err(e) => {
                        warn!("failed to delete from {}: {}", table, e);
                        result
                            .failed_operations
                            .push(format!("delete {}: {}", table, e));
                    }
                },
                RollbackOp::DeleteByIds { table } => {
                    match self.delete_by_ids(table, &cfg.document_ids).await {
                        Ok(deleted) => result.rows_deleted += deleted,
                        Err(e) => {
                            warn!("failed to delete ids from {}: {}", table, e);
                            result
                                .failed_operations
                                .push(format!("delete {}: {}", table, e));
                        }
                    }
                }
                RollbackOp::RestoreSource(archive) => {
                    let metadata = BackupMetadata::load(archive)?;
                    match self
                        .backup
                        .restore_source(&self.config.source, &metadata, self.restore_timeout)
                        .await
                    {
                        Ok(()) => restored_source = true,
                        Err(e) => {
                            warn!("source restore failed: {}", e);
                            result.success = false;
                            result
                                .failed_operations
                                .push(format!("restore source: {}", e));
                        }
                    }
                }
            }
        }

        // Integrity check: reported, not retroactively fatal for drops that
        // already succeeded.
        let mut integrity = self.target.ping().await.is_ok();
        if restored_source {
            integrity &= self.source.ping().await.is_ok();
        }
        result.integrity_ok = Some(integrity);

        result.duration_ms = started.elapsed().as_millis() as i64;
        info!(
            "Rollback for {} finished: {}/{} tables, {} rows deleted, {} failed ops",
            cfg.migration_id,
            result.tables_dropped,
            result.tables_attempted,
            result.rows_deleted,
            result.failed_operations.len()
        );
        Ok(result)
    }

    /// Execute a partial rollback. Thin alias over [`rollback`] that insists
    /// on the Partial type.
    pub async fn partial_rollback(&self, cfg: &RollbackConfig) -> Result<RollbackResult> {
        if cfg.rollback_type != RollbackType::Partial {
            return Err(MigrateError::Rollback(
                "partial_rollback requires rollback_type = Partial".into(),
            ));
        }
        self.rollback(cfg).await
    }

    /// List rollback points for a migration.
    pub async fn list_rollback_points(&self, migration_id: &str) -> Result<Vec<RollbackPoint>> {
        self.tracking
            .list_rollback_points(&self.target, migration_id)
            .await
    }

    /// Record a rollback point capturing the current migration state.
    pub async fn create_rollback_point(
        &self,
        migration_id: &str,
        description: &str,
    ) -> Result<RollbackPoint> {
        let migrated = self
            .tracking
            .checkpointed_collections(&self.target, migration_id)
            .await?;
        let state = if migrated.is_empty() {
            RollbackState::PreMigration
        } else {
            RollbackState::DataMigration
        };
        self.tracking
            .create_rollback_point(&self.target, migration_id, description, state, migrated)
            .await
    }

    async fn delete_by_date(
        &self,
        table: &str,
        column: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let conn = self.target.get().await?;
        let qualified = qualify_table(&self.target.schema, table);

        let deleted = match (start, end) {
            (Some(start), Some(end)) => {
                conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE \"{}\" >= $1 AND \"{}\" < $2",
                        qualified, column, column
                    ),
                    &[&start, &end],
                )
                .await?
            }
            (Some(start), None) => {
                conn.execute(
                    &format!("DELETE FROM {} WHERE \"{}\" >= $1", qualified, column),
                    &[&start],
                )
                .await?
            }
            (None, Some(end)) => {
                conn.execute(
                    &format!("DELETE FROM {} WHERE \"{}\" < $1", qualified, column),
                    &[&end],
                )
                .await?
            }
            (None, None) => {
                conn.execute(&format!("DELETE FROM {}", qualified), &[])
                    .await?
            }
        };
        Ok(deleted as i64)
    }

    async fn delete_by_ids(&self, table: &str, ids: &[String]) -> Result<i64> {
        let conn = self.target.get().await?;
        let ids: Vec<String> = ids.to_vec();
        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE \"source_id\" = ANY($1)",
                    qualify_table(&self.target.schema, table)
                ),
                &[&ids],
            )
            .await?;
        Ok(deleted as i64)
    }
}

/// Date column used for partial date-range rollbacks, per table.
fn target_date_column(table: &str) -> &'static str {
    match table {
        "entries" => "date",
        "profile" => "start_date",
        _ => "created_at",
    }
}

/// Build the operation list for a rollback request.
///
/// Point-in-time semantics: tables of collections *not* recorded as migrated
/// at the point are truncated; recorded collections are left intact.
pub fn plan_rollback(
    cfg: &RollbackConfig,
    migrated_collections: &[String],
    point: Option<&RollbackPoint>,
) -> Vec<RollbackOp> {
    // With no checkpoints recorded, fall back to the full expected set so a
    // failed run that never checkpointed can still be rolled back.
    let migrated: Vec<String> = if migrated_collections.is_empty() {
        expected_tables().iter().map(|t| t.name.to_string()).collect()
    } else {
        migrated_collections.to_vec()
    };

    let mut plan = Vec::new();

    match cfg.rollback_type {
        RollbackType::Full | RollbackType::SchemaOnly => {
            for table in &migrated {
                if cfg.drop_tables {
                    plan.push(RollbackOp::DropTable(table.clone()));
                } else {
                    plan.push(RollbackOp::TruncateTable(table.clone()));
                }
            }
            if cfg.rollback_type == RollbackType::Full {
                if let Some(archive) = &cfg.restore_source_archive {
                    plan.push(RollbackOp::RestoreSource(archive.clone()));
                }
            }
        }
        RollbackType::Partial => {
            let tables: Vec<String> = if cfg.collections.is_empty() {
                migrated
            } else {
                cfg.collections
                    .iter()
                    .filter(|c| migrated.contains(c))
                    .cloned()
                    .collect()
            };

            for table in tables {
                if !cfg.document_ids.is_empty() {
                    plan.push(RollbackOp::DeleteByIds {
                        table: table.clone(),
                    });
                } else {
                    plan.push(RollbackOp::DeleteByDateRange {
                        column: target_date_column(&table),
                        table,
                        start: cfg.start_date,
                        end: cfg.end_date,
                    });
                }
            }
        }
        RollbackType::PointInTime => {
            if let Some(point) = point {
                for table in &migrated {
                    if !point.collections_migrated.contains(table) {
                        plan.push(RollbackOp::TruncateTable(table.clone()));
                    }
                }
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Vec<String> {
        vec!["entries".to_string(), "treatments".to_string()]
    }

    #[test]
    fn test_plan_full_drops_every_migrated_table() {
        let cfg = RollbackConfig {
            confirmed: true,
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), None);
        assert_eq!(
            plan,
            vec![
                RollbackOp::DropTable("entries".into()),
                RollbackOp::DropTable("treatments".into()),
            ]
        );
    }

    #[test]
    fn test_plan_full_without_drop_truncates() {
        let cfg = RollbackConfig {
            drop_tables: false,
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), None);
        assert!(matches!(plan[0], RollbackOp::TruncateTable(_)));
    }

    #[test]
    fn test_plan_full_with_restore_appends_restore() {
        let cfg = RollbackConfig {
            restore_source_archive: Some(PathBuf::from("/backups/x.archive")),
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), None);
        assert!(matches!(plan.last(), Some(RollbackOp::RestoreSource(_))));
    }

    #[test]
    fn test_plan_without_checkpoints_covers_expected_tables() {
        let cfg = RollbackConfig::full("m1");
        let plan = plan_rollback(&cfg, &[], None);
        assert_eq!(plan.len(), expected_tables().len());
    }

    #[test]
    fn test_plan_partial_by_ids() {
        let cfg = RollbackConfig {
            rollback_type: RollbackType::Partial,
            collections: vec!["entries".to_string()],
            document_ids: vec!["a".into(), "b".into()],
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), None);
        assert_eq!(
            plan,
            vec![RollbackOp::DeleteByIds {
                table: "entries".into()
            }]
        );
    }

    #[test]
    fn test_plan_partial_by_date_uses_per_table_column() {
        let cfg = RollbackConfig {
            rollback_type: RollbackType::Partial,
            start_date: Some(Utc::now()),
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), None);
        match &plan[0] {
            RollbackOp::DeleteByDateRange { table, column, .. } => {
                assert_eq!(table, "entries");
                assert_eq!(*column, "date");
            }
            other => panic!("expected date-range delete, got {:?}", other),
        }
        match &plan[1] {
            RollbackOp::DeleteByDateRange { table, column, .. } => {
                assert_eq!(table, "treatments");
                assert_eq!(*column, "created_at");
            }
            other => panic!("expected date-range delete, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_partial_ignores_unmigrated_collections() {
        let cfg = RollbackConfig {
            rollback_type: RollbackType::Partial,
            collections: vec!["food".to_string()],
            start_date: Some(Utc::now()),
            ..RollbackConfig::full("m1")
        };
        assert!(plan_rollback(&cfg, &migrated(), None).is_empty());
    }

    #[test]
    fn test_plan_point_in_time_truncates_complement() {
        let point = RollbackPoint {
            rollback_point_id: Uuid::new_v4(),
            migration_id: "m1".into(),
            description: "before treatments".into(),
            state: RollbackState::DataMigration,
            collections_migrated: vec!["entries".to_string()],
            created_at: Utc::now(),
        };
        let cfg = RollbackConfig {
            rollback_type: RollbackType::PointInTime,
            rollback_point_id: Some(point.rollback_point_id),
            ..RollbackConfig::full("m1")
        };
        let plan = plan_rollback(&cfg, &migrated(), Some(&point));
        assert_eq!(plan, vec![RollbackOp::TruncateTable("treatments".into())]);
    }

    #[test]
    fn test_target_date_column() {
        assert_eq!(target_date_column("entries"), "date");
        assert_eq!(target_date_column("profile"), "start_date");
        assert_eq!(target_date_column("activity"), "created_at");
    }
}
