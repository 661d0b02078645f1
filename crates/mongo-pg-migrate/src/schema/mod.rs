//! Target schema discovery.
//!
//! Queries the system catalogs for tables, columns, and indexes, caching
//! results per pool so repeated validation passes don't re-query.

pub mod expected;

pub use expected::{
    expected_table, expected_tables, ExpectedColumn, ExpectedIndex, ExpectedTable, TypeFamily,
};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::target::PgPool;

/// An observed column.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// An observed index.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
}

/// An observed table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether some index covers exactly the given leading columns.
    pub fn has_index_on(&self, columns: &[&str]) -> bool {
        self.indexes
            .iter()
            .any(|idx| idx.columns.len() >= columns.len() && idx.columns[..columns.len()] == *columns)
    }
}

/// Caching introspector over the target's system catalogs.
pub struct SchemaIntrospector {
    cache: RwLock<HashMap<String, Arc<TableInfo>>>,
}

impl Default for SchemaIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Discover a table's shape, or `None` if it does not exist.
    pub async fn table(
        &self,
        target: &PgPool,
        schema: &str,
        table: &str,
    ) -> Result<Option<Arc<TableInfo>>> {
        let key = format!("{}.{}", schema, table);

        if let Some(info) = self.cache.read().await.get(&key) {
            return Ok(Some(info.clone()));
        }

        let info = match introspect_table(target, schema, table).await? {
            Some(info) => Arc::new(info),
            None => return Ok(None),
        };

        self.cache.write().await.insert(key, info.clone());
        Ok(Some(info))
    }

    /// List table names in a schema (uncached; used for planning only).
    pub async fn list_tables(&self, target: &PgPool, schema: &str) -> Result<Vec<String>> {
        let conn = target.get().await?;
        let rows = conn
            .query(
                "SELECT table_name FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Drop all cached results (after DDL changes).
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}

async fn introspect_table(
    target: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Option<TableInfo>> {
    let conn = target.get().await?;

    let column_rows = conn
        .query(
            "SELECT column_name, data_type, is_nullable
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;

    if column_rows.is_empty() {
        return Ok(None);
    }

    let columns = column_rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get(0),
            data_type: row.get(1),
            is_nullable: row.get::<_, String>(2) == "YES",
        })
        .collect();

    let index_rows = conn
        .query(
            "SELECT i.relname, a.attname
             FROM pg_class t
             JOIN pg_namespace n ON n.oid = t.relnamespace
             JOIN pg_index ix ON t.oid = ix.indrelid
             JOIN pg_class i ON i.oid = ix.indexrelid
             JOIN unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
             WHERE n.nspname = $1 AND t.relname = $2
             ORDER BY i.relname, k.ord",
            &[&schema, &table],
        )
        .await?;

    let mut indexes: Vec<IndexInfo> = Vec::new();
    for row in index_rows {
        let index_name: String = row.get(0);
        let column_name: String = row.get(1);
        match indexes.iter_mut().find(|i| i.name == index_name) {
            Some(index) => index.columns.push(column_name),
            None => indexes.push(IndexInfo {
                name: index_name,
                columns: vec![column_name],
            }),
        }
    }

    debug!(
        "Introspected {}.{}: {} columns, {} indexes",
        schema,
        table,
        column_rows.len(),
        indexes.len()
    );

    Ok(Some(TableInfo {
        name: table.to_string(),
        columns,
        indexes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_indexes() -> TableInfo {
        TableInfo {
            name: "entries".into(),
            columns: vec![],
            indexes: vec![
                IndexInfo {
                    name: "entries_pkey".into(),
                    columns: vec!["source_id".into()],
                },
                IndexInfo {
                    name: "idx_entries_date_device".into(),
                    columns: vec!["date".into(), "device".into()],
                },
            ],
        }
    }

    #[test]
    fn test_has_index_on_exact() {
        let table = table_with_indexes();
        assert!(table.has_index_on(&["source_id"]));
    }

    #[test]
    fn test_has_index_on_leading_prefix() {
        let table = table_with_indexes();
        assert!(table.has_index_on(&["date"]));
        assert!(table.has_index_on(&["date", "device"]));
    }

    #[test]
    fn test_has_index_on_missing() {
        let table = table_with_indexes();
        assert!(!table.has_index_on(&["device"]));
    }
}
