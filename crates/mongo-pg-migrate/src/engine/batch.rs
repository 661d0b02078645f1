//! Transactional batch writer with per-document fallback.
//!
//! A batch maps to one target transaction. Within the transaction the batch
//! is flushed in payload-bounded sub-batches so a run of unexpectedly large
//! documents cannot exceed a statement limit. A whole-batch commit failure
//! falls back to committing documents one at a time, so a single poisoned
//! document cannot sink the batch.

use std::ops::Range;

use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::core::TargetRow;
use crate::error::{MigrateError, Result};
use crate::target::{qualify_table, PgPool};

/// PostgreSQL caps bind parameters per statement at 65535.
const MAX_PARAMS_PER_STATEMENT: usize = 65_535;

/// Outcome of the first, whole-batch commit attempt.
///
/// Modeled explicitly rather than as a caught exception so the retry loop
/// below is a visible state machine.
#[derive(Debug)]
enum CommitOutcome {
    /// The transaction committed; `inserted` rows were written.
    BatchCommitted { inserted: u64 },
    /// The transaction failed wholesale; retry documents one at a time.
    FallbackToPerDocument { reason: String },
}

/// Result of writing one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub migrated: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Per-document failure detail (source id, message).
    pub failures: Vec<(String, String)>,
}

/// Writes batches of transformed rows for one collection.
pub struct BatchWriter<'a> {
    target: &'a PgPool,
    table: &'a str,
    columns: &'static [&'static str],
    skip_duplicates: bool,
    max_payload_bytes: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(
        target: &'a PgPool,
        table: &'a str,
        columns: &'static [&'static str],
        skip_duplicates: bool,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            target,
            table,
            columns,
            skip_duplicates,
            max_payload_bytes,
        }
    }

    /// Write one batch: whole-batch transaction first, per-document fallback
    /// on wholesale failure.
    pub async fn write(&self, rows: Vec<TargetRow>) -> Result<BatchReport> {
        if rows.is_empty() {
            return Ok(BatchReport::default());
        }

        match self.try_commit_batch(&rows).await? {
            CommitOutcome::BatchCommitted { inserted } => {
                let staged = rows.len() as i64;
                let inserted = inserted as i64;
                // With ON CONFLICT DO NOTHING, staged - inserted rows were
                // pre-existing duplicates.
                Ok(BatchReport {
                    migrated: inserted,
                    failed: 0,
                    skipped: staged - inserted,
                    failures: Vec::new(),
                })
            }
            CommitOutcome::FallbackToPerDocument { reason } => {
                warn!(
                    "{}: batch commit failed, retrying {} documents individually: {}",
                    self.table,
                    rows.len(),
                    reason
                );
                self.commit_per_document(rows).await
            }
        }
    }

    async fn try_commit_batch(&self, rows: &[TargetRow]) -> Result<CommitOutcome> {
        let mut conn = self.target.get().await?;

        let attempt = async {
            let tx = conn.transaction().await?;
            let mut inserted = 0u64;
            for range in split_batch(rows, self.max_payload_bytes, self.max_rows_per_statement()) {
                inserted += self.flush_sub_batch(&tx, &rows[range]).await?;
            }
            tx.commit().await?;
            Ok::<u64, MigrateError>(inserted)
        };

        match attempt.await {
            Ok(inserted) => Ok(CommitOutcome::BatchCommitted { inserted }),
            // Connectivity loss is not a data problem; retrying documents
            // one by one would just fail the whole batch slowly.
            Err(e @ MigrateError::Pool { .. }) => Err(e),
            Err(e) => Ok(CommitOutcome::FallbackToPerDocument {
                reason: e.to_string(),
            }),
        }
    }

    /// Flush one sub-batch as a single multi-row INSERT inside `tx`.
    async fn flush_sub_batch(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        rows: &[TargetRow],
    ) -> Result<u64> {
        let sql = self.insert_statement(rows.len());
        let params: Vec<&(dyn ToSql + Sync)> = rows
            .iter()
            .flat_map(|row| row.values.iter().map(|v| v as &(dyn ToSql + Sync)))
            .collect();

        let inserted = tx.execute(&sql, &params).await?;
        debug!(
            "{}: flushed sub-batch of {} rows ({} inserted)",
            self.table,
            rows.len(),
            inserted
        );
        Ok(inserted)
    }

    /// Commit documents one at a time, clearing staged state between
    /// attempts. Duplicate-key violations count as skips when configured.
    async fn commit_per_document(&self, rows: Vec<TargetRow>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let sql = self.insert_statement(1);
        let mut conn = self.target.get().await?;

        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> = row
                .values
                .iter()
                .map(|v| v as &(dyn ToSql + Sync))
                .collect();

            let attempt = async {
                let tx = conn.transaction().await?;
                let inserted = tx.execute(&sql, &params).await?;
                tx.commit().await?;
                Ok::<u64, MigrateError>(inserted)
            };

            match attempt.await {
                Ok(1) => report.migrated += 1,
                Ok(_) => report.skipped += 1,
                Err(e) if self.skip_duplicates && is_unique_violation(&e) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    report.failures.push((row.source_id.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    fn insert_statement(&self, row_count: usize) -> String {
        let column_list = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");

        let width = self.columns.len();
        let values = (0..row_count)
            .map(|row| {
                let placeholders = (0..width)
                    .map(|col| format!("${}", row * width + col + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", placeholders)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            qualify_table(&self.target.schema, self.table),
            column_list,
            values
        );
        if self.skip_duplicates {
            sql.push_str(" ON CONFLICT (\"source_id\") DO NOTHING");
        }
        sql
    }

    fn max_rows_per_statement(&self) -> usize {
        (MAX_PARAMS_PER_STATEMENT / self.columns.len()).max(1)
    }
}

fn is_unique_violation(err: &MigrateError) -> bool {
    match err {
        MigrateError::Target(e) => e.code() == Some(&SqlState::UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Split a batch into sub-batch ranges bounded by a serialized-payload byte
/// budget and a row cap.
///
/// Every sub-batch holds at least one row, so a single oversized document
/// still flushes (as its own statement) instead of looping forever.
pub fn split_batch(rows: &[TargetRow], max_payload_bytes: usize, max_rows: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut bytes = 0usize;

    for (i, row) in rows.iter().enumerate() {
        let row_bytes = row.payload_bytes;
        let len = i - start;

        if len > 0 && (bytes + row_bytes > max_payload_bytes || len >= max_rows) {
            ranges.push(start..i);
            start = i;
            bytes = 0;
        }
        bytes += row_bytes;
    }

    if start < rows.len() {
        ranges.push(start..rows.len());
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;

    fn row(payload_bytes: usize) -> TargetRow {
        TargetRow {
            source_id: "id".into(),
            values: vec![SqlValue::Null],
            payload_bytes,
        }
    }

    #[test]
    fn test_split_batch_empty() {
        assert!(split_batch(&[], 1024, 100).is_empty());
    }

    #[test]
    fn test_split_batch_all_fit() {
        let rows: Vec<_> = (0..10).map(|_| row(10)).collect();
        assert_eq!(split_batch(&rows, 1024, 100), vec![0..10]);
    }

    #[test]
    fn test_split_batch_by_payload() {
        let rows: Vec<_> = (0..6).map(|_| row(100)).collect();
        // Budget fits two rows per flush.
        let ranges = split_batch(&rows, 200, 100);
        assert_eq!(ranges, vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn test_split_batch_oversized_row_flushes_alone() {
        let rows = vec![row(10), row(5000), row(10)];
        let ranges = split_batch(&rows, 100, 100);
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_split_batch_row_cap() {
        let rows: Vec<_> = (0..10).map(|_| row(1)).collect();
        let ranges = split_batch(&rows, usize::MAX, 4);
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_split_batch_covers_every_row_once() {
        let rows: Vec<_> = (0..37).map(|i| row(i * 7 % 50)).collect();
        let ranges = split_batch(&rows, 64, 5);
        let covered: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(covered, rows.len());
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_insert_statement_single_row() {
        let target = fake_pool();
        let writer = BatchWriter::new(&target, "entries", &["source_id", "sgv"], true, 1024);
        let sql = writer.insert_statement(1);
        assert!(sql.contains("INSERT INTO \"public\".\"entries\""));
        assert!(sql.contains("($1, $2)"));
        assert!(sql.ends_with("ON CONFLICT (\"source_id\") DO NOTHING"));
    }

    #[test]
    fn test_insert_statement_multi_row_numbering() {
        let target = fake_pool();
        let writer = BatchWriter::new(&target, "entries", &["source_id", "sgv"], false, 1024);
        let sql = writer.insert_statement(3);
        assert!(sql.contains("($1, $2), ($3, $4), ($5, $6)"));
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn test_max_rows_per_statement_respects_param_cap() {
        let target = fake_pool();
        let writer = BatchWriter::new(&target, "treatments", &["a"; 15], true, 1024);
        assert_eq!(writer.max_rows_per_statement(), 65_535 / 15);
    }

    // A pool that is never connected; only statement-building is exercised.
    fn fake_pool() -> PgPool {
        PgPool::disconnected("public")
    }
}
