//! Index strategy derivation for the target database.
//!
//! Inspects source collection indexes and the known query patterns of each
//! entity and derives CREATE INDEX statements for the target. Index creation
//! is an optimization: failures are logged, never fatal.

use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::expected_table;
use crate::source::{MongoSource, SourceIndex};
use crate::target::{qualify_table, quote_ident, PgPool};

/// One derived index-creation strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStrategy {
    pub collection: String,
    pub index_name: String,
    pub columns: Vec<String>,
    /// Where the strategy came from, for operator-facing reports.
    pub reason: String,
}

impl IndexStrategy {
    /// CREATE INDEX statement for this strategy.
    pub fn create_sql(&self, schema: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&self.index_name),
            qualify_table(schema, &self.collection),
            columns
        )
    }

    /// DROP INDEX statement for this strategy.
    pub fn drop_sql(&self, schema: &str) -> String {
        format!(
            "DROP INDEX IF EXISTS {}.{}",
            quote_ident(schema),
            quote_ident(&self.index_name)
        )
    }
}

/// Derives and applies target index strategies.
pub struct IndexOptimizer<'a> {
    source: &'a MongoSource,
    target: &'a PgPool,
}

impl<'a> IndexOptimizer<'a> {
    pub fn new(source: &'a MongoSource, target: &'a PgPool) -> Self {
        Self { source, target }
    }

    /// Derive strategies for the given collections.
    ///
    /// Expected query-pattern indexes come first, then source indexes whose
    /// fields map onto target columns; duplicates collapse.
    pub async fn derive_strategies(&self, collections: &[String]) -> Result<Vec<IndexStrategy>> {
        let mut strategies = Vec::new();

        for collection in collections {
            let expected = match expected_table(collection) {
                Some(t) => t,
                None => continue,
            };

            for index in &expected.indexes {
                let columns: Vec<String> = index.columns.iter().map(|c| c.to_string()).collect();
                push_unique(
                    &mut strategies,
                    make_strategy(collection, columns, "expected query pattern"),
                );
            }

            let source_indexes = self.source.list_indexes(collection).await?;
            for index in source_indexes {
                if let Some(strategy) = strategy_from_source_index(collection, &index) {
                    push_unique(&mut strategies, strategy);
                }
            }
        }

        debug!("Derived {} index strategies", strategies.len());
        Ok(strategies)
    }

    /// Apply strategies; returns how many succeeded. Failures are logged.
    pub async fn apply(&self, strategies: &[IndexStrategy]) -> usize {
        let mut applied = 0;
        for strategy in strategies {
            let sql = strategy.create_sql(&self.target.schema);
            match self.target.execute_ddl(&sql).await {
                Ok(()) => {
                    debug!("Created index {}", strategy.index_name);
                    applied += 1;
                }
                Err(e) => warn!("Failed to create index {}: {}", strategy.index_name, e),
            }
        }
        applied
    }

    /// Drop a previously created index.
    pub async fn drop(&self, strategy: &IndexStrategy) -> Result<()> {
        self.target
            .execute_ddl(&strategy.drop_sql(&self.target.schema))
            .await
    }
}

/// Map a source index onto target columns, skipping indexes whose fields
/// have no column counterpart.
fn strategy_from_source_index(collection: &str, index: &SourceIndex) -> Option<IndexStrategy> {
    let columns: Option<Vec<String>> = index
        .fields
        .iter()
        .map(|f| map_field_to_column(collection, f))
        .collect();

    columns.map(|columns| make_strategy(collection, columns, "mirrors source index"))
}

/// Translate a source field name to its target column, when one exists.
fn map_field_to_column(collection: &str, field: &str) -> Option<String> {
    // Camel-case source names that were normalized in the target schema.
    let renamed = match field {
        "eventType" => Some("event_type"),
        "glucoseType" => Some("glucose_type"),
        "enteredBy" => Some("entered_by"),
        "startDate" => Some("start_date"),
        "defaultProfile" => Some("default_profile"),
        "uploaderBattery" => Some("uploader_battery"),
        "type" => Some("entry_type"),
        _ => None,
    };
    if let Some(renamed) = renamed {
        return expected_table(collection)
            .and_then(|t| t.column(renamed).map(|c| c.name.to_string()));
    }

    expected_table(collection).and_then(|t| t.column(field).map(|c| c.name.to_string()))
}

fn make_strategy(collection: &str, columns: Vec<String>, reason: &str) -> IndexStrategy {
    let index_name = format!("idx_{}_{}", collection, columns.join("_"));
    IndexStrategy {
        collection: collection.to_string(),
        index_name,
        columns,
        reason: reason.to_string(),
    }
}

fn push_unique(strategies: &mut Vec<IndexStrategy>, strategy: IndexStrategy) {
    let exists = strategies
        .iter()
        .any(|s| s.collection == strategy.collection && s.columns == strategy.columns);
    if !exists {
        strategies.push(strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql() {
        let strategy = make_strategy(
            "entries",
            vec!["date".into(), "device".into()],
            "expected query pattern",
        );
        assert_eq!(strategy.index_name, "idx_entries_date_device");
        assert_eq!(
            strategy.create_sql("public"),
            "CREATE INDEX IF NOT EXISTS \"idx_entries_date_device\" \
             ON \"public\".\"entries\" (\"date\", \"device\")"
        );
    }

    #[test]
    fn test_drop_sql() {
        let strategy = make_strategy("entries", vec!["date".into()], "x");
        assert_eq!(
            strategy.drop_sql("public"),
            "DROP INDEX IF EXISTS \"public\".\"idx_entries_date\""
        );
    }

    #[test]
    fn test_map_field_renames_camel_case() {
        assert_eq!(
            map_field_to_column("treatments", "eventType"),
            Some("event_type".to_string())
        );
        assert_eq!(
            map_field_to_column("profile", "startDate"),
            Some("start_date".to_string())
        );
    }

    #[test]
    fn test_map_field_direct_match() {
        assert_eq!(
            map_field_to_column("entries", "date"),
            Some("date".to_string())
        );
        assert_eq!(map_field_to_column("entries", "nope"), None);
    }

    #[test]
    fn test_strategy_from_source_index_skips_unmappable() {
        let index = SourceIndex {
            name: "weird".into(),
            fields: vec!["date".into(), "mystery_field".into()],
        };
        assert!(strategy_from_source_index("entries", &index).is_none());
    }

    #[test]
    fn test_strategy_from_source_index_maps() {
        let index = SourceIndex {
            name: "by_event".into(),
            fields: vec!["eventType".into(), "created_at".into()],
        };
        let strategy = strategy_from_source_index("treatments", &index).unwrap();
        assert_eq!(strategy.columns, vec!["event_type", "created_at"]);
    }

    #[test]
    fn test_push_unique_dedups_by_columns() {
        let mut strategies = Vec::new();
        push_unique(&mut strategies, make_strategy("entries", vec!["date".into()], "a"));
        push_unique(&mut strategies, make_strategy("entries", vec!["date".into()], "b"));
        assert_eq!(strategies.len(), 1);
    }
}
