//! Transformer for food database records.

use crate::core::{SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "name",
    "category",
    "subcategory",
    "carbs",
    "fat",
    "protein",
    "energy",
    "gi",
    "unit",
    "portion",
    "extra",
];

#[derive(Default)]
pub struct FoodTransformer {
    stats: FieldStats,
}

impl FoodTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for FoodTransformer {
    fn collection(&self) -> &'static str {
        "food"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let name = reader.req_string("name")?;

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            name,
            reader.opt_string("category"),
            reader.opt_string("subcategory"),
            reader.opt_f64("carbs"),
            reader.opt_f64("fat"),
            reader.opt_f64("protein"),
            reader.opt_f64("energy"),
            reader.opt_i32("gi"),
            reader.opt_string("unit"),
            reader.opt_f64("portion"),
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

        if doc.get("name").and_then(|v| v.as_str()).is_none() {
            result.is_valid = false;
            result.errors.push(FieldIssue {
                field: "name".into(),
                message: "required field is missing or not a string".into(),
            });
        }

        if doc.get("carbs").map(|v| v.as_f64().is_none()).unwrap_or(false) {
            result
                .warnings
                .push("carbs is non-numeric and will be kept in extra".into());
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
    fn test_transform_food() {
        let t = FoodTransformer::new();
        let doc = source(doc! {
            "_id": "f1",
            "name": "Oatmeal",
            "category": "Breakfast",
            "carbs": 27.0,
            "gi": 2,
            "unit": "g",
            "portion": 40,
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values[1], SqlValue::Text("Oatmeal".into()));
        assert_eq!(row.values[4], SqlValue::F64(27.0));
        assert_eq!(row.values[8], SqlValue::I32(2));
        assert_eq!(row.values[10], SqlValue::F64(40.0));
    }

    #[test]
    fn test_transform_unnamed_food_fails() {
        let t = FoodTransformer::new();
        let doc = source(doc! { "_id": "f1", "carbs": 12.0 });
        let err = t.transform(&doc).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("name"));
    }
}
