//! Document transformers: one per target entity type.
//!
//! A transformer converts a raw source document into a target-entity row and
//! can validate a document without transforming it. Transformers are pure
//! with respect to the document; each owns a synchronized statistics
//! accumulator so they can be shared across collection workers.

mod activity;
mod devicestatus;
mod entries;
mod food;
mod profile;
mod stats;
mod treatments;

pub use activity::ActivityTransformer;
pub use devicestatus::DeviceStatusTransformer;
pub use entries::EntriesTransformer;
pub use food::FoodTransformer;
pub use profile::ProfileTransformer;
pub use stats::{FieldStats, FieldStatsSnapshot};
pub use treatments::TreatmentsTransformer;

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{FieldValue, SourceDocument, SqlValue, TargetRow};

/// Document-local transformation failure.
///
/// Never aborts a batch; the document is counted failed and the rest of the
/// batch continues.
#[derive(Debug, Clone)]
pub struct TransformError {
    /// Field that could not be mapped, when attributable.
    pub field: Option<String>,
    pub message: String,
}

impl TransformError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "field '{}': {}", field, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransformError {}

/// One finding from document validation.
#[derive(Debug, Clone)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// Result of validating one document against its transformer.
#[derive(Debug, Clone, Default)]
pub struct DocumentValidation {
    pub is_valid: bool,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

/// Converts source documents of one collection into target rows.
pub trait Transformer: Send + Sync {
    /// Source collection (and target table) this transformer handles.
    fn collection(&self) -> &'static str;

    /// Target column list, aligned with the values produced by `transform`.
    fn columns(&self) -> &'static [&'static str];

    /// Convert one document. Errors are document-local.
    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError>;

    /// Validate one document without producing a row.
    fn validate(&self, doc: &SourceDocument) -> DocumentValidation;

    /// Snapshot of the per-field statistics accumulated so far.
    fn stats(&self) -> FieldStatsSnapshot;
}

/// Registry of transformers keyed by collection name.
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: HashMap<&'static str, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in entity transformers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EntriesTransformer::new()));
        registry.register(Arc::new(TreatmentsTransformer::new()));
        registry.register(Arc::new(DeviceStatusTransformer::new()));
        registry.register(Arc::new(ProfileTransformer::new()));
        registry.register(Arc::new(FoodTransformer::new()));
        registry.register(Arc::new(ActivityTransformer::new()));
        registry
    }

    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers
            .insert(transformer.collection(), transformer);
    }

    pub fn get(&self, collection: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(collection).cloned()
    }

    /// Collections a transformer exists for, sorted for stable worklists.
    pub fn collections(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.transformers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Field access helper used by the entity transformers.
///
/// Reads record per-field statistics as a side effect, and consumed field
/// names are tracked so everything else can be routed to the `extra` bag.
pub(crate) struct FieldReader<'a> {
    doc: &'a SourceDocument,
    stats: &'a FieldStats,
    consumed: std::cell::RefCell<Vec<&'a str>>,
}

impl<'a> FieldReader<'a> {
    pub fn new(doc: &'a SourceDocument, stats: &'a FieldStats) -> Self {
        Self {
            doc,
            stats,
            consumed: std::cell::RefCell::new(Vec::new()),
        }
    }

    fn lookup(&self, name: &'a str) -> Option<&'a FieldValue> {
        match self.doc.get(name) {
            Some(FieldValue::Null) => {
                self.stats.record_null(name);
                self.consumed.borrow_mut().push(name);
                None
            }
            Some(value) => {
                self.stats.record_present(name, value.kind());
                Some(value)
            }
            None => {
                self.stats.record_missing(name);
                None
            }
        }
    }

    fn take<T>(
        &self,
        name: &'a str,
        coerce: impl Fn(&FieldValue) -> Option<T>,
    ) -> Option<T> {
        let value = self.lookup(name)?;
        match coerce(value) {
            Some(out) => {
                self.consumed.borrow_mut().push(name);
                Some(out)
            }
            None => {
                // Wrong kind: counted failed, value stays in the extra bag.
                self.stats.record_failed(name);
                None
            }
        }
    }

    pub fn opt_string(&self, name: &'a str) -> SqlValue {
        SqlValue::from_opt(self.take(name, |v| v.as_str().map(str::to_string)))
    }

    pub fn opt_f64(&self, name: &'a str) -> SqlValue {
        SqlValue::from_opt(self.take(name, FieldValue::as_f64))
    }

    pub fn opt_i32(&self, name: &'a str) -> SqlValue {
        SqlValue::from_opt(
            self.take(name, FieldValue::as_i64)
                .and_then(|v| i32::try_from(v).ok()),
        )
    }

    pub fn opt_date(&self, name: &'a str) -> SqlValue {
        SqlValue::from_opt(self.take(name, FieldValue::as_date))
    }

    pub fn opt_json(&self, name: &'a str) -> SqlValue {
        SqlValue::from_opt(self.take(name, |v| match v {
            FieldValue::Map(_) | FieldValue::Array(_) => Some(v.to_json()),
            _ => None,
        }))
    }

    /// Required date; tries each candidate field in order.
    pub fn req_date(&self, candidates: &[&'a str]) -> Result<SqlValue, TransformError> {
        for &name in candidates {
            if let Some(date) = self.take(name, FieldValue::as_date) {
                return Ok(SqlValue::Timestamp(date));
            }
        }
        Err(TransformError::field(
            candidates[0],
            "required date is missing or unparseable",
        ))
    }

    /// Required string.
    pub fn req_string(&self, name: &'a str) -> Result<SqlValue, TransformError> {
        self.take(name, |v| v.as_str().map(str::to_string))
            .map(SqlValue::Text)
            .ok_or_else(|| TransformError::field(name, "required field is missing or not a string"))
    }

    /// Everything not consumed, as the additional-properties bag.
    pub fn extra(&self) -> SqlValue {
        let consumed = self.consumed.borrow();
        let bag: serde_json::Map<String, serde_json::Value> = self
            .doc
            .fields
            .iter()
            .filter(|(k, _)| !consumed.iter().any(|c| c == k))
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        if bag.is_empty() {
            SqlValue::Null
        } else {
            SqlValue::Json(serde_json::Value::Object(bag))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn doc_from(raw: bson::Document) -> SourceDocument {
        SourceDocument::from_bson(raw).unwrap()
    }

    #[test]
    fn test_registry_with_defaults_covers_entities() {
        let registry = TransformerRegistry::with_defaults();
        assert_eq!(
            registry.collections(),
            vec![
                "activity",
                "devicestatus",
                "entries",
                "food",
                "profile",
                "treatments"
            ]
        );
    }

    #[test]
    fn test_registry_get_unknown() {
        let registry = TransformerRegistry::with_defaults();
        assert!(registry.get("users").is_none());
    }

    #[test]
    fn test_field_reader_routes_unknown_to_extra() {
        let stats = FieldStats::new();
        let doc = doc_from(doc! { "_id": "a", "sgv": 120, "mystery": "x" });
        let reader = FieldReader::new(&doc, &stats);
        let _ = reader.opt_i32("sgv");
        match reader.extra() {
            SqlValue::Json(bag) => {
                assert!(bag.get("mystery").is_some());
                assert!(bag.get("sgv").is_none());
            }
            other => panic!("expected json bag, got {:?}", other),
        }
    }

    #[test]
    fn test_field_reader_failed_coercion_stays_in_extra() {
        let stats = FieldStats::new();
        let doc = doc_from(doc! { "_id": "a", "sgv": "not-a-number" });
        let reader = FieldReader::new(&doc, &stats);
        assert!(reader.opt_i32("sgv").is_null());
        match reader.extra() {
            SqlValue::Json(bag) => assert_eq!(bag["sgv"], "not-a-number"),
            other => panic!("expected json bag, got {:?}", other),
        }
        assert_eq!(stats.snapshot().field("sgv").unwrap().failed, 1);
    }

    #[test]
    fn test_field_reader_null_counts_null() {
        let stats = FieldStats::new();
        let doc = doc_from(doc! { "_id": "a", "device": bson::Bson::Null });
        let reader = FieldReader::new(&doc, &stats);
        assert!(reader.opt_string("device").is_null());
        assert_eq!(stats.snapshot().field("device").unwrap().null, 1);
    }
}
