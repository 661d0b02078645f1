//! SQL value types for writing transformed rows to the target.

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

/// SQL value enum for type-safe row handling.
///
/// Values are owned: rows cross task boundaries through the transfer
/// pipeline, so borrowing from source buffers is not an option here.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL. Target column type is known from the prepared statement.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 64-bit floating point (double precision).
    F64(f64),

    /// Text data.
    Text(String),

    /// UUID value.
    Uuid(Uuid),

    /// Timestamp with timezone.
    Timestamp(DateTime<Utc>),

    /// Semi-structured data (json/jsonb columns).
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Wrap an optional value, mapping `None` to NULL.
    pub fn from_opt<T: Into<SqlValue>>(value: Option<T>) -> SqlValue {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I32(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The prepared statement supplies the column type; each inner
        // to_sql rejects genuinely incompatible combinations.
        true
    }

    to_sql_checked!();
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

/// One transformed row, ready for staging into the target.
#[derive(Debug, Clone)]
pub struct TargetRow {
    /// Identifier of the source document this row was derived from.
    pub source_id: String,

    /// Values aligned with the owning transformer's column list.
    pub values: Vec<SqlValue>,

    /// Estimated serialized size of the source document, carried through
    /// for sub-batch payload budgeting.
    pub payload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_opt_none_is_null() {
        let v = SqlValue::from_opt(Option::<i64>::None);
        assert!(v.is_null());
    }

    #[test]
    fn test_from_opt_some() {
        assert_eq!(SqlValue::from_opt(Some(7i32)), SqlValue::I32(7));
    }

    #[test]
    fn test_from_implementations() {
        let v: SqlValue = 42i32.into();
        assert_eq!(v, SqlValue::I32(42));

        let v: SqlValue = "hello".into();
        assert_eq!(v, SqlValue::Text("hello".to_string()));
    }
}
