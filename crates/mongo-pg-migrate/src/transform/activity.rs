//! Transformer for activity records.

use crate::core::{SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "created_at",
    "activity_type",
    "duration",
    "notes",
    "extra",
];

#[derive(Default)]
pub struct ActivityTransformer {
    stats: FieldStats,
}

impl ActivityTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for ActivityTransformer {
    fn collection(&self) -> &'static str {
        "activity"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let created_at = reader.req_date(&["created_at", "timestamp"])?;

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            created_at,
            reader.opt_string("type"),
            reader.opt_f64("duration"),
            reader.opt_string("notes"),
            reader.extra(),
        ];

        Ok(TargetRow {
            source_id: doc.id.clone(),
            values,
            payload_bytes: doc.payload_bytes,
        })
    }

    fn validate(&self, doc: &SourceDocument) -> DocumentValidation {
        let mut result = DocumentValidation {
            is_valid: true,
            ..Default::default()
        };

        let has_date = ["created_at", "timestamp"]
            .iter()
            .any(|f| doc.get(f).map(|v| v.as_date().is_some()).unwrap_or(false));
        if !has_date {
            result.is_valid = false;
            result.errors.push(FieldIssue {
                field: "created_at".into(),
                message: "no parseable timestamp in created_at or timestamp".into(),
            });
        }

        result
    }

    fn stats(&self) -> FieldStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_transform_activity() {
        let t = ActivityTransformer::new();
        let doc = SourceDocument::from_bson(doc! {
            "_id": "a1",
            "created_at": "2024-03-01T17:00:00Z",
            "type": "exercise",
            "duration": 45,
            "notes": "evening run",
        })
        .unwrap();
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values.len(), COLUMNS.len());
        assert_eq!(row.values[2], SqlValue::Text("exercise".into()));
        assert_eq!(row.values[3], SqlValue::F64(45.0));
    }

    #[test]
    fn test_transform_missing_timestamp_fails() {
        let t = ActivityTransformer::new();
        let doc = SourceDocument::from_bson(doc! { "_id": "a1", "notes": "walk" }).unwrap();
        assert!(t.transform(&doc).is_err());
    }
}
