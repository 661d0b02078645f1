//! Transformer for treatment records (boluses, carbs, temp basals, notes).

use crate::core::{SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "event_type",
    "created_at",
    "glucose",
    "glucose_type",
    "carbs",
    "protein",
    "fat",
    "insulin",
    "duration",
    "percent",
    "absolute",
    "entered_by",
    "notes",
    "extra",
];

#[derive(Default)]
pub struct TreatmentsTransformer {
    stats: FieldStats,
}

impl TreatmentsTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for TreatmentsTransformer {
    fn collection(&self) -> &'static str {
        "treatments"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let event_type = reader.req_string("eventType")?;
        let created_at = reader.req_date(&["created_at", "timestamp"])?;

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            event_type,
            created_at,
            // Glucose may be the string "LOW"/"HIGH" on meter records; a
            // non-numeric value stays in the extra bag.
            reader.opt_f64("glucose"),
            reader.opt_string("glucoseType"),
            reader.opt_f64("carbs"),
            reader.opt_f64("protein"),
            reader.opt_f64("fat"),
            reader.opt_f64("insulin"),
            reader.opt_f64("duration"),
            reader.opt_f64("percent"),
            reader.opt_f64("absolute"),
            reader.opt_string("enteredBy"),
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

        if doc.get("eventType").and_then(|v| v.as_str()).is_none() {
            result.is_valid = false;
            result.errors.push(FieldIssue {
                field: "eventType".into(),
                message: "required field is missing or not a string".into(),
            });
        }

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

        if let Some(glucose) = doc.get("glucose") {
            if glucose.as_f64().is_none() && !glucose.is_null() {
                result
                    .warnings
                    .push("glucose is non-numeric and will be kept in extra".into());
                result
                    .suggested_fixes
                    .push("convert glucose to a number or drop the field".into());
            }
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

    fn source(raw: bson::Document) -> SourceDocument {
        SourceDocument::from_bson(raw).unwrap()
    }

    #[test]
    fn test_transform_bolus() {
        let t = TreatmentsTransformer::new();
        let doc = source(doc! {
            "_id": "t1",
            "eventType": "Meal Bolus",
            "created_at": "2024-03-01T08:00:00Z",
            "carbs": 45.0,
            "insulin": 5.5,
            "enteredBy": "loop://iPhone",
        });

        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values.len(), COLUMNS.len());
        assert_eq!(row.values[1], SqlValue::Text("Meal Bolus".into()));
        assert_eq!(row.values[5], SqlValue::F64(45.0));
        assert_eq!(row.values[8], SqlValue::F64(5.5));
    }

    #[test]
    fn test_transform_missing_event_type_fails() {
        let t = TreatmentsTransformer::new();
        let doc = source(doc! { "_id": "t1", "created_at": "2024-03-01T08:00:00Z" });
        let err = t.transform(&doc).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("eventType"));
    }

    #[test]
    fn test_transform_non_numeric_glucose_to_extra() {
        let t = TreatmentsTransformer::new();
        let doc = source(doc! {
            "_id": "t1",
            "eventType": "BG Check",
            "created_at": "2024-03-01T08:00:00Z",
            "glucose": "LOW",
        });
        let row = t.transform(&doc).unwrap();
        assert!(row.values[3].is_null());
        match &row.values[14] {
            SqlValue::Json(bag) => assert_eq!(bag["glucose"], "LOW"),
            other => panic!("expected extra bag, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_timestamp_fallback() {
        let t = TreatmentsTransformer::new();
        let doc = source(doc! {
            "_id": "t1",
            "eventType": "Temp Basal",
            "timestamp": "2024-03-01T08:00:00Z",
            "duration": 30,
            "percent": -50,
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values[9], SqlValue::F64(30.0));
        assert_eq!(row.values[10], SqlValue::F64(-50.0));
    }

    #[test]
    fn test_validate_reports_both_required_fields() {
        let t = TreatmentsTransformer::new();
        let doc = source(doc! { "_id": "t1", "notes": "hello" });
        let v = t.validate(&doc);
        assert!(!v.is_valid);
        assert_eq!(v.errors.len(), 2);
    }
}
