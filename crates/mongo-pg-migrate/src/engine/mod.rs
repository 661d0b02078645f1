//! Migration engine - main workflow coordinator.
//!
//! Drives the end-to-end run: validation → schema preparation → index
//! planning → per-collection batched migration → checkpointing → statistics
//! aggregation. Collections migrate in parallel up to a configured degree;
//! within one collection, batches are strictly sequential so checkpoints
//! always describe a prefix of the collection.

pub mod batch;
pub mod memory;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, MigrationOptions};
use crate::core::SourceDocument;
use crate::error::{MigrateError, Result};
use crate::index::IndexOptimizer;
use crate::schema::SchemaIntrospector;
use crate::source::MongoSource;
use crate::state::{MigrationCheckpoint, TrackingStore};
use crate::status::{
    CollectionStatistics, MigrationState, MigrationStatistics, MigrationStatus, StatusRegistry,
};
use crate::target::PgPool;
use crate::transform::{Transformer, TransformerRegistry};
use crate::validate::Validator;

use batch::BatchWriter;
use memory::MemoryGuard;

/// Result of a migration run.
///
/// Produced even on partial failure so progress stays observable and the
/// per-collection breakdown shows where failures concentrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique migration identifier.
    pub migration_id: String,

    /// Whether the run completed without blocking errors.
    pub success: bool,

    /// Terminal state of the run.
    pub state: MigrationState,

    /// Human-readable failure summary, when not successful.
    pub message: Option<String>,

    /// Full statistics, present even on partial failure.
    pub statistics: MigrationStatistics,
}

/// Migration engine.
pub struct MigrationEngine {
    config: Arc<Config>,
    source: Arc<MongoSource>,
    target: Arc<PgPool>,
    tracking: Arc<TrackingStore>,
    registry: Arc<TransformerRegistry>,
    status: Arc<StatusRegistry>,
    introspector: Arc<SchemaIntrospector>,
    /// Mutual-exclusion guard for checkpoint writes and the memory check.
    checkpoint_gate: Arc<Semaphore>,
    memory: Arc<MemoryGuard>,
}

impl MigrationEngine {
    /// Create a new engine.
    ///
    /// Configuration is validated structurally before any connection is
    /// attempted; an invalid configuration never touches either store.
    pub async fn new(config: Config) -> Result<Self> {
        crate::config::validate(&config)?;

        let source = MongoSource::connect(&config.source).await?;
        let max_conns = config.migration.get_max_parallel_collections() * 2 + 2;
        let target = PgPool::connect(&config.target, max_conns).await?;
        let memory = MemoryGuard::new(config.migration.get_memory_ceiling_bytes());

        Ok(Self {
            config: Arc::new(config),
            source: Arc::new(source),
            target: Arc::new(target),
            tracking: Arc::new(TrackingStore::new()),
            registry: Arc::new(TransformerRegistry::with_defaults()),
            status: Arc::new(StatusRegistry::new()),
            introspector: Arc::new(SchemaIntrospector::new()),
            checkpoint_gate: Arc::new(Semaphore::new(1)),
            memory: Arc::new(memory),
        })
    }

    /// Status registry for concurrent status queries.
    pub fn status_registry(&self) -> Arc<StatusRegistry> {
        self.status.clone()
    }

    /// Tracking store handle (shared with rollback/recovery services).
    pub fn tracking(&self) -> Arc<TrackingStore> {
        self.tracking.clone()
    }

    pub fn source(&self) -> Arc<MongoSource> {
        self.source.clone()
    }

    pub fn target(&self) -> Arc<PgPool> {
        self.target.clone()
    }

    /// Run a fresh migration.
    pub async fn migrate(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let migration_id = Uuid::new_v4().to_string();
        self.run(migration_id, None, cancel).await
    }

    /// Resume a previous migration from its latest checkpoints.
    pub async fn resume(
        &self,
        migration_id: String,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        self.run(migration_id.clone(), Some(migration_id), cancel)
            .await
    }

    async fn run(
        &self,
        migration_id: String,
        resume_from: Option<String>,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let options = &self.config.migration;

        info!("Starting migration run: {}", migration_id);
        self.status
            .put(MigrationStatus::new(migration_id.clone(), started_at));

        // Tracking tables must exist before anything is recorded.
        self.tracking.init_schema(&self.target).await?;
        self.tracking
            .record_run_start(&self.target, &migration_id, &self.config.hash(), started_at)
            .await?;

        // Phase 1: pre-migration validation.
        self.set_operation(&migration_id, "validating");
        let worklist = self.resolve_worklist().await?;
        if let Err(e) = self.validate_pre_migration(&worklist).await {
            return self.finish_failed(migration_id, started_at, e).await;
        }

        if options.dry_run {
            info!("Dry run requested; validation passed, skipping migration");
            return self
                .finish(migration_id, started_at, MigrationState::Completed, None)
                .await;
        }

        // Phase 2: prepare target schema.
        self.set_operation(&migration_id, "preparing target");
        if let Err(e) = self.prepare_target(&worklist).await {
            return self.finish_failed(migration_id, started_at, e).await;
        }

        // Phase 3: index strategies. An index is an optimization, not a
        // correctness requirement; failures are logged and do not abort.
        if options.create_indexes {
            self.set_operation(&migration_id, "planning indexes");
            let optimizer = IndexOptimizer::new(&self.source, &self.target);
            match optimizer.derive_strategies(&worklist).await {
                Ok(strategies) => {
                    let applied = optimizer.apply(&strategies).await;
                    info!("Applied {}/{} index strategies", applied, strategies.len());
                }
                Err(e) => warn!("Index planning failed (continuing): {}", e),
            }
        }

        // Phase 4: per-collection migration with bounded parallelism.
        self.set_operation(&migration_id, "migrating collections");
        self.status.update(&migration_id, |current| {
            let mut next = current.clone();
            next.state = MigrationState::Running;
            next
        });

        info!(
            "Migrating {} collections with parallelism {}",
            worklist.len(),
            options.get_max_parallel_collections()
        );

        let semaphore = Arc::new(Semaphore::new(options.get_max_parallel_collections()));
        let mut handles = Vec::new();

        for collection in worklist.iter().cloned() {
            // Cancellation is observed between collections.
            if cancel.is_cancelled() {
                info!("Cancellation requested, not starting further collections");
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("worklist semaphore closed");

            let transformer = self
                .registry
                .get(&collection)
                .expect("worklist filtered to registered transformers");

            let worker = CollectionWorker {
                source: self.source.clone(),
                target: self.target.clone(),
                tracking: self.tracking.clone(),
                status: self.status.clone(),
                checkpoint_gate: self.checkpoint_gate.clone(),
                memory: self.memory.clone(),
                options: self.config.clone(),
                migration_id: migration_id.clone(),
                transformer,
                cancel: cancel.clone(),
                resume_from: resume_from.clone(),
            };

            let name = collection.clone();
            let handle = tokio::spawn(async move {
                let result = worker.migrate_collection(&name).await;
                drop(permit);
                (name, result)
            });

            handles.push(handle);
        }

        // Collect results.
        let mut statistics = MigrationStatistics::new(started_at);
        let mut failed_collections = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((collection, Ok(stats))) => {
                    info!(
                        "{}: migrated {} / {} documents ({} failed, {} skipped)",
                        collection,
                        stats.documents_migrated,
                        stats.total_documents,
                        stats.documents_failed,
                        stats.documents_skipped
                    );
                    statistics.collections.insert(collection, stats);
                }
                Ok((collection, Err(e))) => {
                    error!("{}: failed - {}", collection, e);
                    self.log_error(&migration_id, &format!("{}: {}", collection, e))
                        .await;
                    statistics
                        .collections
                        .insert(collection.clone(), CollectionStatistics::default());
                    failed_collections.push(collection);
                }
                Err(e) => {
                    error!("Collection task panicked: {}", e);
                    self.log_error(&migration_id, &format!("worker panic: {}", e))
                        .await;
                    failed_collections.push("<panicked>".into());
                }
            }
        }

        statistics.completed_at = Some(Utc::now());

        let (state, message) = if !failed_collections.is_empty() {
            (
                MigrationState::Failed,
                Some(format!(
                    "collections failed: {}",
                    failed_collections.join(", ")
                )),
            )
        } else if cancel.is_cancelled() {
            (MigrationState::Cancelled, None)
        } else {
            (MigrationState::Completed, None)
        };

        self.finish_with_stats(migration_id, statistics, state, message)
            .await
    }

    /// Resolve the collection worklist: the configured allowlist (or all
    /// source collections) intersected with registered transformers.
    async fn resolve_worklist(&self) -> Result<Vec<String>> {
        let source_collections = self.source.list_collections().await?;
        let allowlist = &self.config.migration.collections;
        Ok(resolve_worklist(
            allowlist,
            &source_collections,
            &self.registry.collections(),
        ))
    }

    async fn validate_pre_migration(&self, worklist: &[String]) -> Result<()> {
        let options = &self.config.migration;
        let plan = ValidationPlan::for_options(options);
        let validator = Validator::new(&self.source, &self.target, &self.introspector);

        let mut result = crate::validate::ValidationResult::ok();

        if plan.schema {
            result.merge(validator.validate_schema().await?);
        }
        if plan.data {
            result.merge(
                validator
                    .validate_data_compatibility(
                        &self.registry,
                        worklist,
                        options.get_validation_sample_size(),
                    )
                    .await?,
            );
        }
        if plan.conflicts {
            let conflicts = validator.detect_conflicts(worklist, 100).await?;
            result.conflicts.extend(conflicts);
        }
        // Referential integrity runs regardless of the other toggles.
        result.merge(validator.validate_referential_integrity(worklist).await?);

        for conflict in &result.conflicts {
            warn!(
                "validation conflict [{}]: {} (options: {})",
                conflict.conflict_type,
                conflict.description,
                conflict.resolution_options.join(" | ")
            );
        }

        if !result.success {
            let summary = result
                .errors
                .iter()
                .take(5)
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(MigrateError::Validation(summary));
        }

        Ok(())
    }

    /// Verify required tables exist; truncate them when configured.
    ///
    /// Base tables are provisioned by a separate process, so a missing table
    /// is fatal - creating it here would silently diverge from that tooling.
    async fn prepare_target(&self, worklist: &[String]) -> Result<()> {
        for collection in worklist {
            let exists = self
                .target
                .table_exists(&self.target.schema, collection)
                .await?;
            if !exists {
                return Err(MigrateError::Schema(format!(
                    "required table {}.{} does not exist",
                    self.target.schema, collection
                )));
            }

            if self.config.migration.drop_existing_tables {
                info!("Truncating existing table {}", collection);
                self.target
                    .truncate_table(&self.target.schema, collection)
                    .await?;
            }
        }
        Ok(())
    }

    fn set_operation(&self, migration_id: &str, operation: &str) {
        self.status.update(migration_id, |current| {
            let mut next = current.clone();
            next.current_operation = operation.to_string();
            next
        });
    }

    async fn log_error(&self, migration_id: &str, message: &str) {
        if let Err(e) = self
            .tracking
            .log(&self.target, migration_id, "error", message)
            .await
        {
            warn!("failed to persist error log entry: {}", e);
        }
    }

    async fn finish_failed(
        &self,
        migration_id: String,
        started_at: chrono::DateTime<Utc>,
        err: MigrateError,
    ) -> Result<MigrationResult> {
        self.log_error(&migration_id, &err.to_string()).await;
        self.finish(
            migration_id,
            started_at,
            MigrationState::Failed,
            Some(err.to_string()),
        )
        .await
    }

    async fn finish(
        &self,
        migration_id: String,
        started_at: chrono::DateTime<Utc>,
        state: MigrationState,
        message: Option<String>,
    ) -> Result<MigrationResult> {
        let mut statistics = MigrationStatistics::new(started_at);
        statistics.completed_at = Some(Utc::now());
        self.finish_with_stats(migration_id, statistics, state, message)
            .await
    }

    async fn finish_with_stats(
        &self,
        migration_id: String,
        statistics: MigrationStatistics,
        state: MigrationState,
        message: Option<String>,
    ) -> Result<MigrationResult> {
        let state_str = match state {
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
            MigrationState::Cancelled => "cancelled",
            _ => "running",
        };
        self.tracking
            .record_run_state(&self.target, &migration_id, state_str, statistics.completed_at)
            .await?;

        let stats_for_status = statistics.clone();
        self.status.update(&migration_id, |current| {
            let mut next = current.clone();
            next.state = state;
            next.progress_percent = 100.0;
            next.statistics = stats_for_status.clone();
            next
        });

        let result = MigrationResult {
            migration_id,
            success: state == MigrationState::Completed,
            state,
            message,
            statistics,
        };

        info!(
            "Migration {}: {} ({} migrated, {} failed, {} skipped)",
            result.migration_id,
            state_str,
            result.statistics.total_migrated(),
            result.statistics.total_failed(),
            result.statistics.total_skipped()
        );

        Ok(result)
    }
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Which validation passes run, given the configured options.
///
/// Truncating the target makes schema/data validation of existing rows
/// pointless, so those passes are skipped; referential integrity always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPlan {
    pub schema: bool,
    pub data: bool,
    pub conflicts: bool,
    pub referential: bool,
}

impl ValidationPlan {
    pub fn for_options(options: &MigrationOptions) -> Self {
        let dropping = options.drop_existing_tables;
        Self {
            schema: options.validate_schema && !dropping,
            data: options.validate_data && !dropping,
            conflicts: options.detect_conflicts,
            referential: true,
        }
    }
}

/// Worklist = (allowlist or all source collections) ∩ registered transformers.
fn resolve_worklist(
    allowlist: &[String],
    source_collections: &[String],
    transformer_collections: &[&str],
) -> Vec<String> {
    let candidates: Vec<&String> = if allowlist.is_empty() {
        source_collections.iter().collect()
    } else {
        allowlist.iter().collect()
    };

    let mut worklist: Vec<String> = candidates
        .into_iter()
        .filter(|c| transformer_collections.contains(&c.as_str()))
        .filter(|c| source_collections.contains(*c))
        .cloned()
        .collect();
    worklist.sort();
    worklist.dedup();
    worklist
}

/// Checkpoint cadence: fires every `interval` committed batches.
#[derive(Debug)]
struct CheckpointCadence {
    interval: usize,
    batches_committed: usize,
}

impl CheckpointCadence {
    fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            batches_committed: 0,
        }
    }

    /// Record a committed batch; returns whether a checkpoint is due.
    fn on_batch_committed(&mut self) -> bool {
        self.batches_committed += 1;
        self.batches_committed % self.interval == 0
    }
}

/// Everything one collection worker needs, cloned per spawned task.
struct CollectionWorker {
    source: Arc<MongoSource>,
    target: Arc<PgPool>,
    tracking: Arc<TrackingStore>,
    status: Arc<StatusRegistry>,
    checkpoint_gate: Arc<Semaphore>,
    memory: Arc<MemoryGuard>,
    options: Arc<Config>,
    migration_id: String,
    transformer: Arc<dyn Transformer>,
    cancel: CancellationToken,
    resume_from: Option<String>,
}

impl CollectionWorker {
    async fn migrate_collection(&self, collection: &str) -> Result<CollectionStatistics> {
        let started = Instant::now();
        let options = &self.options.migration;
        let batch_size = options.get_batch_size();

        // Resume position, if any: the last committed document id plus the
        // processed count it represents.
        let (resume_after, mut processed) = match &self.resume_from {
            Some(migration_id) => {
                match self
                    .tracking
                    .latest_checkpoint(&self.target, migration_id, Some(collection))
                    .await?
                {
                    Some(cp) => {
                        info!(
                            "{}: resuming after {} ({} documents already processed)",
                            collection, cp.last_document_id, cp.documents_processed
                        );
                        (Some(cp.last_document_id), cp.documents_processed)
                    }
                    None => (None, 0),
                }
            }
            None => (None, 0),
        };

        let total = self
            .source
            .count_documents(collection, options.start_date, options.end_date)
            .await?
            + processed;

        let mut stats = CollectionStatistics {
            total_documents: total,
            ..Default::default()
        };

        // Bounded producer/consumer pipeline: the producer suspends once
        // `read_ahead_batches` batches are in flight. That is the explicit
        // backpressure keeping the reader from running unbounded ahead.
        let (tx, mut rx) = mpsc::channel::<Vec<SourceDocument>>(options.get_read_ahead_batches());

        let producer_source = self.source.clone();
        let producer_collection = collection.to_string();
        let start_date = options.start_date;
        let end_date = options.end_date;
        let producer = tokio::spawn(async move {
            let mut stream = producer_source
                .stream(
                    &producer_collection,
                    start_date,
                    end_date,
                    resume_after.as_deref(),
                    batch_size,
                )
                .await?;

            let mut malformed = 0i64;
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                match stream.next().await? {
                    Some(Ok(doc)) => batch.push(doc),
                    Some(Err(e)) => {
                        debug!("{}: skipping malformed document: {}", producer_collection, e);
                        malformed += 1;
                    }
                    None => break,
                }
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(full).await.is_err() {
                        // Consumer stopped (cancellation or failure).
                        return Ok(malformed);
                    }
                }
            }
            if !batch.is_empty() {
                let _ = tx.send(batch).await;
            }
            Ok::<i64, MigrateError>(malformed)
        });

        let writer = BatchWriter::new(
            &self.target,
            collection,
            self.transformer.columns(),
            options.skip_duplicates,
            options.get_max_batch_payload_bytes(),
        );

        let mut cadence = CheckpointCadence::new(options.get_checkpoint_interval());
        let mut cancelled = false;

        while let Some(docs) = rx.recv().await {
            // Cancellation is observed between batches, never mid-commit.
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let batch_len = docs.len() as i64;
            let last_id = docs.last().map(|d| d.id.clone());

            // Transformation failures are document-local.
            let mut rows = Vec::with_capacity(docs.len());
            for doc in &docs {
                match self.transformer.transform(doc) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        debug!("{}: document {} failed transform: {}", collection, doc.id, e);
                        stats.documents_failed += 1;
                    }
                }
            }

            let report = writer.write(rows).await?;
            stats.documents_migrated += report.migrated;
            stats.documents_failed += report.failed;
            stats.documents_skipped += report.skipped;
            processed += batch_len;

            // Checkpoint strictly after commit, under the engine-wide gate
            // that also serializes the memory-pressure check.
            if cadence.on_batch_committed() {
                if let Some(last_id) = last_id {
                    let _permit = self
                        .checkpoint_gate
                        .acquire()
                        .await
                        .expect("checkpoint gate closed");
                    self.memory.check_and_reclaim().await;
                    self.tracking
                        .write_checkpoint(
                            &self.target,
                            &MigrationCheckpoint {
                                checkpoint_id: Uuid::new_v4(),
                                migration_id: self.migration_id.clone(),
                                collection: collection.to_string(),
                                last_document_id: last_id,
                                documents_processed: processed,
                                status: "in_progress".into(),
                                created_at: Utc::now(),
                            },
                        )
                        .await?;
                    debug!("{}: checkpoint at {} documents", collection, processed);
                }
            } else {
                self.memory.check_and_reclaim().await;
            }

            self.publish_progress(collection, &stats);
        }

        // Dropping the receiver unblocks a suspended producer; it observes
        // the closed channel and stops reading.
        drop(rx);
        match producer.await {
            Ok(Ok(malformed)) => stats.documents_failed += malformed,
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(MigrateError::collection(
                    collection,
                    format!("reader task panicked: {}", e),
                ))
            }
        }

        if cancelled {
            info!("{}: cancelled after {} documents", collection, processed);
        }

        stats.duration_ms = started.elapsed().as_millis() as i64;
        Ok(stats)
    }

    fn publish_progress(&self, collection: &str, stats: &CollectionStatistics) {
        let collection = collection.to_string();
        let stats = stats.clone();
        self.status.update(&self.migration_id, |current| {
            let mut next = current.clone();
            next.statistics.collections.insert(collection.clone(), stats.clone());
            let total: i64 = next.statistics.total_documents();
            let done: i64 = next.statistics.total_migrated()
                + next.statistics.total_failed()
                + next.statistics.total_skipped();
            next.progress_percent = if total > 0 {
                (done as f64 / total as f64 * 100.0).min(100.0)
            } else {
                0.0
            };
            next
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_worklist_allowlist_intersection() {
        let allow = vec!["entries".to_string(), "users".to_string()];
        let source = vec![
            "entries".to_string(),
            "treatments".to_string(),
            "users".to_string(),
        ];
        let transformers = vec!["entries", "treatments"];
        assert_eq!(
            resolve_worklist(&allow, &source, &transformers),
            vec!["entries"]
        );
    }

    #[test]
    fn test_resolve_worklist_empty_allowlist_takes_all() {
        let source = vec![
            "treatments".to_string(),
            "entries".to_string(),
            "system.indexes".to_string(),
        ];
        let transformers = vec!["entries", "treatments", "food"];
        assert_eq!(
            resolve_worklist(&[], &source, &transformers),
            vec!["entries", "treatments"]
        );
    }

    #[test]
    fn test_resolve_worklist_skips_absent_collections() {
        let allow = vec!["food".to_string()];
        let source = vec!["entries".to_string()];
        let transformers = vec!["entries", "food"];
        assert!(resolve_worklist(&allow, &source, &transformers).is_empty());
    }

    #[test]
    fn test_validation_plan_default_runs_everything() {
        let options = MigrationOptions {
            validate_schema: true,
            validate_data: true,
            detect_conflicts: true,
            ..Default::default()
        };
        let plan = ValidationPlan::for_options(&options);
        assert!(plan.schema && plan.data && plan.conflicts && plan.referential);
    }

    #[test]
    fn test_validation_plan_drop_tables_skips_schema_and_data() {
        let options = MigrationOptions {
            validate_schema: true,
            validate_data: true,
            detect_conflicts: true,
            drop_existing_tables: true,
            ..Default::default()
        };
        let plan = ValidationPlan::for_options(&options);
        assert!(!plan.schema);
        assert!(!plan.data);
        // Conflict detection and referential integrity still run.
        assert!(plan.conflicts);
        assert!(plan.referential);
    }

    #[test]
    fn test_checkpoint_cadence_every_n_batches() {
        let mut cadence = CheckpointCadence::new(5);
        let fires: Vec<bool> = (0..11).map(|_| cadence.on_batch_committed()).collect();
        let fired_at: Vec<usize> = fires
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(fired_at, vec![5, 10]);
    }

    #[test]
    fn test_checkpoint_scenario_10050_documents() {
        // 10,050 documents, batch size 1,000, checkpoint interval 5:
        // 11 batches; checkpoints after batches 5 and 10 with processed
        // counts 5,000 and 10,000; the trailing 50 commit without one.
        let total = 10_050i64;
        let batch_size = 1_000i64;
        let mut cadence = CheckpointCadence::new(5);

        let mut processed = 0i64;
        let mut checkpoints = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let batch = remaining.min(batch_size);
            processed += batch;
            remaining -= batch;
            if cadence.on_batch_committed() {
                checkpoints.push(processed);
            }
        }

        assert_eq!(checkpoints, vec![5_000, 10_000]);
        assert_eq!(processed, 10_050);
        // Checkpoint monotonicity: values never decrease and never exceed
        // the total document count.
        assert!(checkpoints.windows(2).all(|w| w[0] <= w[1]));
        assert!(checkpoints.iter().all(|c| *c <= total));
    }

    #[test]
    fn test_checkpoint_cadence_interval_one() {
        let mut cadence = CheckpointCadence::new(1);
        assert!(cadence.on_batch_committed());
        assert!(cadence.on_batch_committed());
    }
}
