//! Schemaless source document model.
//!
//! Source documents have no fixed schema, so each one is represented as an
//! ordered field-name→value map over a small closed set of value kinds.
//! Transformers pattern-match over expected field names and route anything
//! unrecognized into a generic additional-properties bag.
//!
//! Conversion from BSON happens once, at the source boundary; everything
//! downstream (transformers, validator, statistics) works on [`FieldValue`].

use bson::{Bson, Document};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{MigrateError, Result};

/// Closed set of value kinds a source field can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(FieldMap),
}

/// Kind tag for [`FieldValue`], used by field statistics and conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Date,
    Array,
    Map,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldKind::Null => "null",
            FieldKind::Bool => "boolean",
            FieldKind::Int => "integer",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::Date => "date",
            FieldKind::Array => "array",
            FieldKind::Map => "map",
        };
        f.write_str(s)
    }
}

impl FieldValue {
    /// Kind tag for this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Null => FieldKind::Null,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::String(_) => FieldKind::String,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::Array(_) => FieldKind::Array,
            FieldValue::Map(_) => FieldKind::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Borrow as a string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to f64: floats, integers, and numeric strings qualify.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Coerce to i64: integers, whole floats, and numeric strings qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Coerce to a UTC instant.
    ///
    /// Accepts native dates, epoch milliseconds (integer or float, the wire
    /// format of CGM entry timestamps), and RFC 3339 strings.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::Int(ms) => Utc.timestamp_millis_opt(*ms).single(),
            FieldValue::Float(ms) => Utc.timestamp_millis_opt(*ms as i64).single(),
            FieldValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Convert to a JSON value for JSONB columns and the extra-properties bag.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(v) => serde_json::Value::from(*v),
            FieldValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::String(s) => serde_json::Value::String(s.clone()),
            FieldValue::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            FieldValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            FieldValue::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Rough serialized size in bytes, used for payload budgeting.
    pub fn estimated_size(&self) -> usize {
        match self {
            FieldValue::Null => 1,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) => 8,
            FieldValue::Float(_) => 8,
            FieldValue::String(s) => s.len() + 5,
            FieldValue::Date(_) => 8,
            FieldValue::Array(items) => {
                5 + items.iter().map(|v| v.estimated_size()).sum::<usize>()
            }
            FieldValue::Map(map) => {
                5 + map
                    .iter()
                    .map(|(k, v)| k.len() + 2 + v.estimated_size())
                    .sum::<usize>()
            }
        }
    }
}

/// Ordered field map. Preserves source document field order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.entries.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One source document, converted from BSON at the source boundary.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Primary identifier (`_id`), rendered as a string.
    pub id: String,

    /// All fields except `_id`, in source order.
    pub fields: FieldMap,

    /// Estimated serialized size, used for sub-batch payload budgeting.
    pub payload_bytes: usize,
}

impl SourceDocument {
    /// Convert a raw BSON document.
    ///
    /// Fails only when the document has no usable `_id`; every other shape
    /// oddity is preserved in the field map for the transformer to judge.
    pub fn from_bson(doc: Document) -> Result<Self> {
        let id = match doc.get("_id") {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            Some(Bson::String(s)) => s.clone(),
            Some(Bson::Int32(v)) => v.to_string(),
            Some(Bson::Int64(v)) => v.to_string(),
            Some(other) => {
                return Err(MigrateError::Validation(format!(
                    "document has unsupported _id kind: {:?}",
                    other.element_type()
                )))
            }
            None => {
                return Err(MigrateError::Validation(
                    "document has no _id field".into(),
                ))
            }
        };

        let mut fields = FieldMap::new();
        for (key, value) in doc {
            if key == "_id" {
                continue;
            }
            fields.insert(key, convert_bson(value));
        }

        let payload_bytes = id.len()
            + 8
            + fields
                .iter()
                .map(|(k, v)| k.len() + 2 + v.estimated_size())
                .sum::<usize>();

        Ok(Self {
            id,
            fields,
            payload_bytes,
        })
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

fn convert_bson(value: Bson) -> FieldValue {
    match value {
        Bson::Double(v) => FieldValue::Float(v),
        Bson::String(s) => FieldValue::String(s),
        Bson::Array(items) => FieldValue::Array(items.into_iter().map(convert_bson).collect()),
        Bson::Document(doc) => FieldValue::Map(
            doc.into_iter()
                .map(|(k, v)| (k, convert_bson(v)))
                .collect(),
        ),
        Bson::Boolean(b) => FieldValue::Bool(b),
        Bson::Null | Bson::Undefined => FieldValue::Null,
        Bson::Int32(v) => FieldValue::Int(v as i64),
        Bson::Int64(v) => FieldValue::Int(v),
        Bson::DateTime(dt) => FieldValue::Date(dt.to_chrono()),
        Bson::Timestamp(ts) => Utc
            .timestamp_opt(ts.time as i64, 0)
            .single()
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Null),
        Bson::ObjectId(oid) => FieldValue::String(oid.to_hex()),
        Bson::Decimal128(d) => FieldValue::String(d.to_string()),
        Bson::Binary(b) => FieldValue::String(hex::encode(b.bytes)),
        Bson::RegularExpression(re) => FieldValue::String(re.pattern),
        Bson::JavaScriptCode(code) => FieldValue::String(code),
        Bson::Symbol(s) => FieldValue::String(s),
        other => FieldValue::String(other.to_string()),
    }
}
