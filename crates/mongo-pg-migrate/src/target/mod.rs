//! PostgreSQL target database operations.
//!
//! The target owns transactions, bulk inserts, and catalog queries. Base
//! tables are assumed pre-provisioned; this module never creates them.

use deadpool_postgres::{Config as PoolConfig, Object, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

/// Quote a PostgreSQL identifier.
///
/// Identifiers cannot be parameterized in prepared statements, so dynamic
/// table/column names are quoted and embedded-quote-escaped instead.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with its schema, quoting both parts.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Pooled PostgreSQL target connection.
pub struct PgPool {
    pool: Pool,
    /// Schema holding the migrated entity tables.
    pub schema: String,
}

impl PgPool {
    /// Create a connection pool for the target database.
    pub async fn connect(config: &TargetConfig, max_connections: usize) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| MigrateError::pool(e.to_string(), "creating target pool"))?;

        let target = Self {
            pool,
            schema: config.schema.clone(),
        };

        // Fail fast on unreachable targets.
        target.ping().await?;
        debug!(
            "Connected to target database {} (schema {})",
            config.database, config.schema
        );

        Ok(target)
    }

    /// Pool handle that has never connected. Statement building and
    /// planning logic run against it in tests; any `get()` will fail.
    #[cfg(test)]
    pub(crate) fn disconnected(schema: &str) -> Self {
        let mut cfg = PoolConfig::new();
        cfg.host = Some("localhost".into());
        cfg.dbname = Some("unused".into());
        cfg.user = Some("unused".into());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .expect("lazy pool creation cannot fail");
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    /// Check out a connection from the pool.
    pub async fn get(&self) -> Result<Object> {
        Ok(self.pool.get().await?)
    }

    /// Verify the database is still reachable.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.get().await?;
        conn.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Whether a table exists in the given schema.
    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let conn = self.get().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                 )",
                &[&schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Row count of a table.
    pub async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let conn = self.get().await?;
        let query = format!("SELECT COUNT(*) FROM {}", qualify_table(schema, table));
        let row = conn.query_one(&query, &[]).await?;
        Ok(row.get(0))
    }

    /// Drop a table if it exists.
    pub async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let conn = self.get().await?;
        let query = format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            qualify_table(schema, table)
        );
        conn.execute(&query, &[]).await?;
        Ok(())
    }

    /// Truncate a table.
    pub async fn truncate_table(&self, schema: &str, table: &str) -> Result<()> {
        let conn = self.get().await?;
        let query = format!("TRUNCATE TABLE {} CASCADE", qualify_table(schema, table));
        conn.execute(&query, &[]).await?;
        Ok(())
    }

    /// Execute a DDL statement (index creation/removal).
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let conn = self.get().await?;
        conn.execute(sql, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_plain() {
        assert_eq!(quote_ident("entries"), "\"entries\"");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(qualify_table("public", "entries"), "\"public\".\"entries\"");
    }
}
