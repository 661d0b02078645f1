//! Per-field transformation statistics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::core::FieldKind;

#[derive(Debug, Default, Clone)]
struct Counter {
    present: u64,
    missing: u64,
    null: u64,
    failed: u64,
    kinds: HashMap<FieldKind, u64>,
}

/// Synchronized per-field counters for one transformer.
///
/// Recorded on every field read so post-run reports can show how uniform the
/// source data actually was; the validator reuses the observed-kind counts
/// for inconsistent-type conflict detection.
#[derive(Debug, Default)]
pub struct FieldStats {
    fields: Mutex<HashMap<String, Counter>>,
}

impl FieldStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_present(&self, field: &str, kind: FieldKind) {
        let mut fields = self.fields.lock().unwrap();
        let counter = fields.entry(field.to_string()).or_default();
        counter.present += 1;
        *counter.kinds.entry(kind).or_insert(0) += 1;
    }

    pub fn record_missing(&self, field: &str) {
        let mut fields = self.fields.lock().unwrap();
        fields.entry(field.to_string()).or_default().missing += 1;
    }

    pub fn record_null(&self, field: &str) {
        let mut fields = self.fields.lock().unwrap();
        fields.entry(field.to_string()).or_default().null += 1;
    }

    pub fn record_failed(&self, field: &str) {
        let mut fields = self.fields.lock().unwrap();
        fields.entry(field.to_string()).or_default().failed += 1;
    }

    /// Immutable snapshot, ordered by field name for stable reporting.
    pub fn snapshot(&self) -> FieldStatsSnapshot {
        let fields = self.fields.lock().unwrap();
        let fields = fields
            .iter()
            .map(|(name, counter)| {
                let most_frequent_kind = counter
                    .kinds
                    .iter()
                    .max_by_key(|(_, count)| **count)
                    .map(|(kind, _)| *kind);
                (
                    name.clone(),
                    FieldCounts {
                        present: counter.present,
                        missing: counter.missing,
                        null: counter.null,
                        failed: counter.failed,
                        most_frequent_kind,
                        observed_kinds: counter.kinds.len(),
                    },
                )
            })
            .collect();
        FieldStatsSnapshot { fields }
    }
}

/// Snapshot counters for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCounts {
    pub present: u64,
    pub missing: u64,
    pub null: u64,
    pub failed: u64,
    pub most_frequent_kind: Option<FieldKind>,
    /// Number of distinct kinds observed (>1 means inconsistent typing).
    pub observed_kinds: usize,
}

/// Point-in-time view of a transformer's field statistics.
#[derive(Debug, Clone, Default)]
pub struct FieldStatsSnapshot {
    fields: BTreeMap<String, FieldCounts>,
}

impl FieldStatsSnapshot {
    pub fn field(&self, name: &str) -> Option<&FieldCounts> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldCounts)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let stats = FieldStats::new();
        stats.record_present("sgv", FieldKind::Int);
        stats.record_present("sgv", FieldKind::Int);
        stats.record_missing("sgv");
        stats.record_failed("sgv");

        let snapshot = stats.snapshot();
        let counts = snapshot.field("sgv").unwrap();
        assert_eq!(counts.present, 2);
        assert_eq!(counts.missing, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.most_frequent_kind, Some(FieldKind::Int));
    }

    #[test]
    fn test_most_frequent_kind_tracks_majority() {
        let stats = FieldStats::new();
        stats.record_present("trend", FieldKind::String);
        stats.record_present("trend", FieldKind::Int);
        stats.record_present("trend", FieldKind::Int);

        let snapshot = stats.snapshot();
        let counts = snapshot.field("trend").unwrap();
        assert_eq!(counts.most_frequent_kind, Some(FieldKind::Int));
        assert_eq!(counts.observed_kinds, 2);
    }

    #[test]
    fn test_unknown_field_absent_from_snapshot() {
        let stats = FieldStats::new();
        assert!(stats.snapshot().field("nope").is_none());
    }
}
