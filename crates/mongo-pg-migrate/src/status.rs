//! In-memory migration status tracking.
//!
//! Statuses are keyed by migration identifier, mutated only by the engine,
//! and read concurrently by status queries. Updates always install a fresh
//! snapshot under the key; values are never mutated in place.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Lifecycle state of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Initializing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Cancelled
        )
    }
}

/// Per-collection migration counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStatistics {
    /// Documents eligible in the source (after date filtering).
    pub total_documents: i64,

    /// Documents durably written to the target.
    pub documents_migrated: i64,

    /// Documents that failed transformation or isolated write.
    pub documents_failed: i64,

    /// Documents skipped as duplicates.
    pub documents_skipped: i64,

    /// Wall-clock duration of this collection's migration in milliseconds.
    pub duration_ms: i64,
}

/// Statistics for one run. Append-only while the run is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatistics {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub collections: BTreeMap<String, CollectionStatistics>,
}

impl MigrationStatistics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            completed_at: None,
            collections: BTreeMap::new(),
        }
    }

    pub fn total_migrated(&self) -> i64 {
        self.collections.values().map(|c| c.documents_migrated).sum()
    }

    pub fn total_failed(&self) -> i64 {
        self.collections.values().map(|c| c.documents_failed).sum()
    }

    pub fn total_skipped(&self) -> i64 {
        self.collections.values().map(|c| c.documents_skipped).sum()
    }

    pub fn total_documents(&self) -> i64 {
        self.collections.values().map(|c| c.total_documents).sum()
    }
}

/// Point-in-time status of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub migration_id: String,
    pub state: MigrationState,
    /// 0.0–100.0, derived from completed collections and document counts.
    pub progress_percent: f64,
    /// Operator-facing label for the current phase.
    pub current_operation: String,
    pub statistics: MigrationStatistics,
}

impl MigrationStatus {
    pub fn new(migration_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            migration_id,
            state: MigrationState::Initializing,
            progress_percent: 0.0,
            current_operation: "initializing".into(),
            statistics: MigrationStatistics::new(started_at),
        }
    }
}

/// Concurrent status store with replace-on-key update semantics.
///
/// Entries are retained after terminal states so results remain inspectable
/// for the life of the process.
#[derive(Default)]
pub struct StatusRegistry {
    statuses: RwLock<HashMap<String, Arc<MigrationStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh status snapshot for its migration id.
    pub fn put(&self, status: MigrationStatus) {
        let mut statuses = self.statuses.write().unwrap();
        statuses.insert(status.migration_id.clone(), Arc::new(status));
    }

    /// Replace the status under `migration_id` with an updated snapshot.
    ///
    /// The closure receives the current snapshot and returns the new one;
    /// no-op when the id is unknown.
    pub fn update<F>(&self, migration_id: &str, f: F)
    where
        F: FnOnce(&MigrationStatus) -> MigrationStatus,
    {
        let mut statuses = self.statuses.write().unwrap();
        if let Some(current) = statuses.get(migration_id) {
            let updated = f(current);
            statuses.insert(migration_id.to_string(), Arc::new(updated));
        }
    }

    /// Query by migration identifier. Unknown ids are a distinct error, not
    /// an empty value: once evicted, a status is irrecoverable without logs.
    pub fn get(&self, migration_id: &str) -> Result<Arc<MigrationStatus>> {
        self.statuses
            .read()
            .unwrap()
            .get(migration_id)
            .cloned()
            .ok_or_else(|| MigrateError::StatusNotFound(migration_id.to_string()))
    }

    /// All known migration ids.
    pub fn ids(&self) -> Vec<String> {
        self.statuses.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let registry = StatusRegistry::new();
        registry.put(MigrationStatus::new("m1".into(), Utc::now()));
        let status = registry.get("m1").unwrap();
        assert_eq!(status.state, MigrationState::Initializing);
    }

    #[test]
    fn test_get_unknown_is_distinct_error() {
        let registry = StatusRegistry::new();
        match registry.get("nope") {
            Err(MigrateError::StatusNotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected StatusNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let registry = StatusRegistry::new();
        registry.put(MigrationStatus::new("m1".into(), Utc::now()));

        let before = registry.get("m1").unwrap();
        registry.update("m1", |current| {
            let mut next = current.clone();
            next.state = MigrationState::Running;
            next.progress_percent = 40.0;
            next
        });
        let after = registry.get("m1").unwrap();

        // Old snapshot is untouched; readers holding it see consistent data.
        assert_eq!(before.state, MigrationState::Initializing);
        assert_eq!(after.state, MigrationState::Running);
        assert_eq!(after.progress_percent, 40.0);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let registry = StatusRegistry::new();
        registry.update("ghost", |c| c.clone());
        assert!(registry.get("ghost").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(MigrationState::Completed.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(MigrationState::Cancelled.is_terminal());
        assert!(!MigrationState::Running.is_terminal());
    }

    #[test]
    fn test_statistics_totals() {
        let mut stats = MigrationStatistics::new(Utc::now());
        stats.collections.insert(
            "entries".into(),
            CollectionStatistics {
                total_documents: 100,
                documents_migrated: 90,
                documents_failed: 5,
                documents_skipped: 5,
                duration_ms: 1000,
            },
        );
        stats.collections.insert(
            "treatments".into(),
            CollectionStatistics {
                total_documents: 10,
                documents_migrated: 10,
                ..Default::default()
            },
        );
        assert_eq!(stats.total_documents(), 110);
        assert_eq!(stats.total_migrated(), 100);
        assert_eq!(stats.total_failed(), 5);
        assert_eq!(stats.total_skipped(), 5);
    }
}
