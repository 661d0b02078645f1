//! Failure classification and recovery.
//!
//! A failed migration's most recent error log entry is classified by keyword
//! into a coarse failure type; each type maps to a fixed, ordered catalog of
//! recovery strategies. Strategy selection is a pure function of the
//! classification - strategies are selected, never created, at recovery time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::{BackupOptions, BackupService};
use crate::config::Config;
use crate::engine::memory::MemoryGuard;
use crate::error::{MigrateError, Result};
use crate::source::MongoSource;
use crate::state::TrackingStore;
use crate::target::PgPool;

/// Coarse failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    NetworkFailure,
    DatabaseConnectionFailure,
    OutOfMemory,
    DiskFull,
    DataCorruption,
    UserCancelled,
    SystemCrash,
    Timeout,
    AuthenticationFailure,
    SchemaValidationFailure,
    TransformationFailure,
    Unknown,
}

/// Concrete action a strategy executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    ResumeFromCheckpoint,
    RestoreConnections,
    ForceMemoryCleanup,
    AdjustConfigAndRetry,
    SkipFailedDocuments,
    RestoreFromBackup,
}

/// Operator-facing risk grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A static recovery strategy record.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStrategy {
    pub id: &'static str,
    pub name: &'static str,
    pub applicable_failures: Vec<FailureType>,
    /// Estimated probability of success, 0.0-1.0.
    pub success_rate: f64,
    pub estimated_duration: Duration,
    pub risk: RiskLevel,
    pub action: RecoveryAction,
    /// Free-form tuning parameters for the action.
    pub parameters: HashMap<String, String>,
}

/// Classify an error message by keyword.
///
/// Order matters: the more specific conditions are checked before the broad
/// connectivity buckets.
pub fn classify_failure(message: &str) -> FailureType {
    let msg = message.to_lowercase();

    if msg.contains("authentication") || msg.contains("password") || msg.contains("permission denied")
    {
        return FailureType::AuthenticationFailure;
    }
    if msg.contains("cancelled") || msg.contains("canceled") {
        return FailureType::UserCancelled;
    }
    if msg.contains("out of memory") || msg.contains("cannot allocate") || msg.contains("oom") {
        return FailureType::OutOfMemory;
    }
    if msg.contains("no space left") || msg.contains("disk full") {
        return FailureType::DiskFull;
    }
    if msg.contains("corrupt") || msg.contains("checksum mismatch") {
        return FailureType::DataCorruption;
    }
    if msg.contains("timed out") || msg.contains("timeout") {
        return FailureType::Timeout;
    }
    if msg.contains("panic") || msg.contains("killed") || msg.contains("crash") {
        return FailureType::SystemCrash;
    }
    if msg.contains("schema") {
        return FailureType::SchemaValidationFailure;
    }
    if msg.contains("transform") {
        return FailureType::TransformationFailure;
    }
    if msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unreachable")
        || msg.contains("network")
    {
        return FailureType::NetworkFailure;
    }
    if msg.contains("pool error") || msg.contains("connection") || msg.contains("database") {
        return FailureType::DatabaseConnectionFailure;
    }

    FailureType::Unknown
}

fn strategy(
    id: &'static str,
    name: &'static str,
    applicable: &[FailureType],
    success_rate: f64,
    minutes: u64,
    risk: RiskLevel,
    action: RecoveryAction,
    parameters: &[(&str, &str)],
) -> RecoveryStrategy {
    RecoveryStrategy {
        id,
        name,
        applicable_failures: applicable.to_vec(),
        success_rate,
        estimated_duration: Duration::from_secs(minutes * 60),
        risk,
        action,
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Full static strategy catalog.
fn catalog() -> Vec<RecoveryStrategy> {
    use FailureType::*;
    use RecoveryAction::*;

    vec![
        strategy(
            "resume-checkpoint",
            "Resume from latest checkpoint",
            &[UserCancelled, SystemCrash, NetworkFailure, DatabaseConnectionFailure, Timeout, Unknown],
            0.95,
            5,
            RiskLevel::Low,
            ResumeFromCheckpoint,
            &[],
        ),
        strategy(
            "retry-adjusted-timeouts",
            "Retry with adjusted timeouts",
            &[NetworkFailure, Timeout],
            0.85,
            10,
            RiskLevel::Low,
            AdjustConfigAndRetry,
            &[("timeout_multiplier", "2")],
        ),
        strategy(
            "restore-connections",
            "Re-establish store connections",
            &[DatabaseConnectionFailure, NetworkFailure, AuthenticationFailure],
            0.80,
            5,
            RiskLevel::Low,
            RestoreConnections,
            &[],
        ),
        strategy(
            "cleanup-reduce-batch",
            "Force memory cleanup and reduce batch size",
            &[OutOfMemory],
            0.80,
            10,
            RiskLevel::Medium,
            ForceMemoryCleanup,
            &[("batch_size_divisor", "2")],
        ),
        strategy(
            "increase-memory",
            "Increase memory allocation",
            &[OutOfMemory],
            0.60,
            30,
            RiskLevel::Medium,
            AdjustConfigAndRetry,
            &[("memory_ceiling_multiplier", "2")],
        ),
        strategy(
            "free-disk-resume",
            "Free disk space and resume",
            &[DiskFull],
            0.55,
            30,
            RiskLevel::High,
            ResumeFromCheckpoint,
            &[],
        ),
        strategy(
            "restore-backup",
            "Restore stores from pre-migration backup",
            &[DataCorruption],
            0.65,
            60,
            RiskLevel::High,
            RestoreFromBackup,
            &[],
        ),
        strategy(
            "skip-bad-documents",
            "Skip failing documents and continue",
            &[DataCorruption, TransformationFailure],
            0.75,
            10,
            RiskLevel::Medium,
            SkipFailedDocuments,
            &[],
        ),
        strategy(
            "revalidate-schema",
            "Re-run validation after schema fix",
            &[SchemaValidationFailure],
            0.50,
            15,
            RiskLevel::Low,
            AdjustConfigAndRetry,
            &[("revalidate", "true")],
        ),
    ]
}

/// Strategies applicable to a failure type, ordered by estimated success
/// rate, best first.
pub fn recovery_strategies(failure: FailureType) -> Vec<RecoveryStrategy> {
    let mut strategies: Vec<_> = catalog()
        .into_iter()
        .filter(|s| s.applicable_failures.contains(&failure))
        .collect();
    strategies.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    strategies
}

/// Result of failure analysis.
#[derive(Debug, Clone)]
pub struct FailureAnalysis {
    pub migration_id: String,
    pub failure_type: FailureType,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    /// Applicable strategies, best first.
    pub strategies: Vec<RecoveryStrategy>,
}

/// Recovery request.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub migration_id: String,
    /// Strategy to execute; defaults to the best applicable one.
    pub strategy_id: Option<String>,
    /// Take a target backup before executing the strategy.
    pub pre_recovery_backup: bool,
    pub backup_options: BackupOptions,
    /// Hard deadline for the recovery action.
    pub timeout: Duration,
}

impl RecoveryConfig {
    pub fn new(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            strategy_id: None,
            pre_recovery_backup: false,
            backup_options: BackupOptions::default(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Lifecycle state of one recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub recovery_id: String,
    pub migration_id: String,
    pub strategy_name: String,
    pub state: RecoveryRunState,
    pub started_at: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryRunState {
    Running,
    Completed,
    Failed,
}

/// Result of a recovery attempt.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub recovery_id: String,
    pub migration_id: String,
    pub failure_type: FailureType,
    pub strategy_id: String,
    pub success: bool,
    /// Whether the migration can resume.
    pub can_resume: bool,
    /// Checkpoint to resume from, when resumable.
    pub resume_checkpoint: Option<Uuid>,
    pub message: Option<String>,
}

/// Executes recovery strategies.
pub struct RecoveryService {
    config: Arc<Config>,
    source: Arc<MongoSource>,
    target: Arc<PgPool>,
    tracking: Arc<TrackingStore>,
    backup: BackupService,
    statuses: RwLock<HashMap<String, RecoveryStatus>>,
}

impl RecoveryService {
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
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// A migration qualifies for recovery only if it actually failed:
    /// at least one error-level log entry must exist.
    pub async fn validate_recovery(&self, migration_id: &str) -> Result<()> {
        if !self.tracking.run_exists(&self.target, migration_id).await? {
            return Err(MigrateError::Recovery(format!(
                "no migration run recorded with id {}",
                migration_id
            )));
        }
        match self
            .tracking
            .latest_error(&self.target, migration_id)
            .await?
        {
            Some(_) => Ok(()),
            None => Err(MigrateError::Recovery(format!(
                "migration {} has no error log entries - nothing to recover from",
                migration_id
            ))),
        }
    }

    /// Classify the most recent failure and list applicable strategies.
    pub async fn analyze_failure(&self, migration_id: &str) -> Result<FailureAnalysis> {
        self.validate_recovery(migration_id).await?;

        let entry = self
            .tracking
            .latest_error(&self.target, migration_id)
            .await?
            .expect("validate_recovery guarantees an error entry");

        let failure_type = classify_failure(&entry.message);
        info!(
            "{}: classified failure as {:?} from '{}'",
            migration_id, failure_type, entry.message
        );

        Ok(FailureAnalysis {
            migration_id: migration_id.to_string(),
            failure_type,
            message: entry.message,
            occurred_at: entry.created_at,
            strategies: recovery_strategies(failure_type),
        })
    }

    /// Status of a previous recovery attempt.
    pub fn recovery_status(&self, recovery_id: &str) -> Result<RecoveryStatus> {
        self.statuses
            .read()
            .unwrap()
            .get(recovery_id)
            .cloned()
            .ok_or_else(|| {
                MigrateError::Recovery(format!("no recovery recorded with id {}", recovery_id))
            })
    }

    /// Execute a recovery.
    pub async fn recover(&self, cfg: &RecoveryConfig) -> Result<RecoveryResult> {
        let analysis = self.analyze_failure(&cfg.migration_id).await?;

        let strategy = match &cfg.strategy_id {
            Some(id) => analysis
                .strategies
                .iter()
                .find(|s| s.id == id.as_str())
                .cloned()
                .ok_or_else(|| {
                    MigrateError::Recovery(format!(
                        "strategy '{}' is not applicable to {:?}",
                        id, analysis.failure_type
                    ))
                })?,
            None => analysis.strategies.first().cloned().ok_or_else(|| {
                MigrateError::Recovery(format!(
                    "no strategy available for {:?}",
                    analysis.failure_type
                ))
            })?,
        };

        let recovery_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.set_status(RecoveryStatus {
            recovery_id: recovery_id.clone(),
            migration_id: cfg.migration_id.clone(),
            strategy_name: strategy.name.to_string(),
            state: RecoveryRunState::Running,
            started_at,
            message: None,
        });

        info!(
            "Recovery {} for {}: executing '{}' ({:?})",
            recovery_id, cfg.migration_id, strategy.name, strategy.action
        );

        if cfg.pre_recovery_backup {
            match self
                .backup
                .backup_target(&self.config.target, &cfg.backup_options)
                .await
            {
                Ok(meta) => info!("pre-recovery backup at {}", meta.archive_path.display()),
                Err(e) => warn!("pre-recovery backup failed (continuing): {}", e),
            }
        }

        let action_result = tokio::time::timeout(
            cfg.timeout,
            self.execute_action(&cfg.migration_id, &strategy),
        )
        .await
        .map_err(|_| MigrateError::timeout("recovery action", cfg.timeout.as_secs()))
        .and_then(|r| r);

        // Verification: both stores must be reachable for the migration to
        // be resumable at all.
        let connectivity = self.verify_connectivity().await;

        let (success, resume_checkpoint, message) = match (action_result, connectivity) {
            (Ok(checkpoint), Ok(())) => (true, checkpoint, None),
            (Ok(_), Err(e)) => (false, None, Some(format!("stores unreachable: {}", e))),
            (Err(e), _) => (false, None, Some(e.to_string())),
        };

        let can_resume = success
            && matches!(
                strategy.action,
                RecoveryAction::ResumeFromCheckpoint
                    | RecoveryAction::RestoreConnections
                    | RecoveryAction::ForceMemoryCleanup
                    | RecoveryAction::SkipFailedDocuments
            );

        self.set_status(RecoveryStatus {
            recovery_id: recovery_id.clone(),
            migration_id: cfg.migration_id.clone(),
            strategy_name: strategy.name.to_string(),
            state: if success {
                RecoveryRunState::Completed
            } else {
                RecoveryRunState::Failed
            },
            started_at,
            message: message.clone(),
        });

        Ok(RecoveryResult {
            recovery_id,
            migration_id: cfg.migration_id.clone(),
            failure_type: analysis.failure_type,
            strategy_id: strategy.id.to_string(),
            success,
            can_resume,
            resume_checkpoint,
            message,
        })
    }

    /// Execute the strategy's concrete action; returns a resume checkpoint
    /// id when one is relevant.
    async fn execute_action(
        &self,
        migration_id: &str,
        strategy: &RecoveryStrategy,
    ) -> Result<Option<Uuid>> {
        match strategy.action {
            RecoveryAction::ResumeFromCheckpoint | RecoveryAction::SkipFailedDocuments => {
                let checkpoint = self
                    .tracking
                    .latest_checkpoint(&self.target, migration_id, None)
                    .await?;
                Ok(checkpoint.map(|c| c.checkpoint_id))
            }
            RecoveryAction::RestoreConnections => {
                self.verify_connectivity().await?;
                let checkpoint = self
                    .tracking
                    .latest_checkpoint(&self.target, migration_id, None)
                    .await?;
                Ok(checkpoint.map(|c| c.checkpoint_id))
            }
            RecoveryAction::ForceMemoryCleanup => {
                let guard =
                    MemoryGuard::new(self.config.migration.get_memory_ceiling_bytes());
                guard.check_and_reclaim().await;
                let checkpoint = self
                    .tracking
                    .latest_checkpoint(&self.target, migration_id, None)
                    .await?;
                Ok(checkpoint.map(|c| c.checkpoint_id))
            }
            RecoveryAction::AdjustConfigAndRetry => {
                // The adjusted values are surfaced through the strategy's
                // parameters; applying them is the caller's retry.
                Ok(None)
            }
            RecoveryAction::RestoreFromBackup => Err(MigrateError::Recovery(
                "restore-from-backup requires an explicit rollback with a backup archive".into(),
            )),
        }
    }

    async fn verify_connectivity(&self) -> Result<()> {
        self.source.ping().await?;
        self.target.ping().await?;
        Ok(())
    }

    fn set_status(&self, status: RecoveryStatus) {
        self.statuses
            .write()
            .unwrap()
            .insert(status.recovery_id.clone(), status);
    }
}

/// Apply a strategy's configuration adjustments to migration options.
///
/// Used by callers that retry after an `AdjustConfigAndRetry` strategy.
pub fn adjust_options(
    options: &crate::config::MigrationOptions,
    strategy: &RecoveryStrategy,
) -> crate::config::MigrationOptions {
    let mut adjusted = options.clone();

    if let Some(divisor) = strategy
        .parameters
        .get("batch_size_divisor")
        .and_then(|v| v.parse::<usize>().ok())
    {
        adjusted.batch_size = Some((options.get_batch_size() / divisor).max(1));
    }
    if let Some(multiplier) = strategy
        .parameters
        .get("memory_ceiling_multiplier")
        .and_then(|v| v.parse::<u64>().ok())
    {
        adjusted.memory_ceiling_bytes =
            Some(options.get_memory_ceiling_bytes().saturating_mul(multiplier));
    }

    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connection_refused_never_unknown() {
        let classified = classify_failure("Source store error: connection refused (os error 111)");
        assert!(
            classified == FailureType::NetworkFailure
                || classified == FailureType::DatabaseConnectionFailure,
            "got {:?}",
            classified
        );
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(
            classify_failure("Pool error: timed out waiting for connection"),
            FailureType::Timeout
        );
        assert_eq!(
            classify_failure("password authentication failed for user"),
            FailureType::AuthenticationFailure
        );
        assert_eq!(classify_failure("out of memory"), FailureType::OutOfMemory);
        assert_eq!(
            classify_failure("No space left on device"),
            FailureType::DiskFull
        );
        assert_eq!(
            classify_failure("archive checksum mismatch detected"),
            FailureType::DataCorruption
        );
        assert_eq!(
            classify_failure("Migration cancelled"),
            FailureType::UserCancelled
        );
        assert_eq!(
            classify_failure("worker panic: index out of bounds"),
            FailureType::SystemCrash
        );
        assert_eq!(
            classify_failure("Schema error: required table public.entries does not exist"),
            FailureType::SchemaValidationFailure
        );
        assert_eq!(
            classify_failure("document t3 failed transform: field 'date'"),
            FailureType::TransformationFailure
        );
        assert_eq!(
            classify_failure("something entirely else"),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_strategies_ordered_by_success_rate() {
        for failure in [
            FailureType::NetworkFailure,
            FailureType::OutOfMemory,
            FailureType::DataCorruption,
            FailureType::Timeout,
        ] {
            let strategies = recovery_strategies(failure);
            assert!(!strategies.is_empty(), "{:?} has no strategies", failure);
            for pair in strategies.windows(2) {
                assert!(
                    pair[0].success_rate >= pair[1].success_rate,
                    "{:?} strategies out of order",
                    failure
                );
            }
        }
    }

    #[test]
    fn test_every_failure_type_has_a_strategy() {
        let all = [
            FailureType::NetworkFailure,
            FailureType::DatabaseConnectionFailure,
            FailureType::OutOfMemory,
            FailureType::DiskFull,
            FailureType::DataCorruption,
            FailureType::UserCancelled,
            FailureType::SystemCrash,
            FailureType::Timeout,
            FailureType::AuthenticationFailure,
            FailureType::SchemaValidationFailure,
            FailureType::TransformationFailure,
            FailureType::Unknown,
        ];
        for failure in all {
            assert!(
                !recovery_strategies(failure).is_empty(),
                "{:?} has no applicable strategy",
                failure
            );
        }
    }

    #[test]
    fn test_strategies_applicability_is_consistent() {
        for failure in [FailureType::OutOfMemory, FailureType::UserCancelled] {
            for s in recovery_strategies(failure) {
                assert!(s.applicable_failures.contains(&failure));
            }
        }
    }

    #[test]
    fn test_out_of_memory_prefers_cleanup() {
        let strategies = recovery_strategies(FailureType::OutOfMemory);
        assert_eq!(strategies[0].id, "cleanup-reduce-batch");
    }

    #[test]
    fn test_adjust_options_halves_batch_size() {
        let options = crate::config::MigrationOptions {
            batch_size: Some(1_000),
            ..Default::default()
        };
        let strategies = recovery_strategies(FailureType::OutOfMemory);
        let adjusted = adjust_options(&options, &strategies[0]);
        assert_eq!(adjusted.batch_size, Some(500));
    }

    #[test]
    fn test_adjust_options_scales_memory_ceiling() {
        let options = crate::config::MigrationOptions {
            memory_ceiling_bytes: Some(512),
            ..Default::default()
        };
        let increase = recovery_strategies(FailureType::OutOfMemory)
            .into_iter()
            .find(|s| s.id == "increase-memory")
            .unwrap();
        let adjusted = adjust_options(&options, &increase);
        assert_eq!(adjusted.memory_ceiling_bytes, Some(1_024));
    }
}
