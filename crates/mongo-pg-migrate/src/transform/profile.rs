//! Transformer for therapy profiles.

use crate::core::{SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "start_date",
    "default_profile",
    "units",
    "timezone",
    "store",
    "extra",
];

#[derive(Default)]
pub struct ProfileTransformer {
    stats: FieldStats,
}

impl ProfileTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for ProfileTransformer {
    fn collection(&self) -> &'static str {
        "profile"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let start_date = reader.req_date(&["startDate", "created_at"])?;

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            start_date,
            reader.opt_string("defaultProfile"),
            reader.opt_string("units"),
            reader.opt_string("timezone"),
            reader.opt_json("store"),
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

        let has_date = ["startDate", "created_at"]
            .iter()
            .any(|f| doc.get(f).map(|v| v.as_date().is_some()).unwrap_or(false));
        if !has_date {
            result.is_valid = false;
            result.errors.push(FieldIssue {
                field: "startDate".into(),
                message: "no parseable timestamp in startDate or created_at".into(),
            });
        }

        if let Some(default_profile) = doc.get("defaultProfile").and_then(|v| v.as_str()) {
            let in_store = doc
                .get("store")
                .map(|v| match v {
                    crate::core::FieldValue::Map(store) => store.contains_key(default_profile),
                    _ => false,
                })
                .unwrap_or(false);
            if !in_store {
                result
                    .warnings
                    .push(format!("defaultProfile '{}' not present in store", default_profile));
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
    fn test_transform_profile() {
        let t = ProfileTransformer::new();
        let doc = source(doc! {
            "_id": "p1",
            "startDate": "2024-01-15T00:00:00Z",
            "defaultProfile": "Default",
            "units": "mg/dl",
            "store": { "Default": { "dia": 5, "carbratio": [] } },
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values.len(), COLUMNS.len());
        assert_eq!(row.values[2], SqlValue::Text("Default".into()));
        match &row.values[5] {
            SqlValue::Json(store) => assert_eq!(store["Default"]["dia"], 5),
            other => panic!("expected store json, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_warns_on_dangling_default() {
        let t = ProfileTransformer::new();
        let doc = source(doc! {
            "_id": "p1",
            "startDate": "2024-01-15T00:00:00Z",
            "defaultProfile": "Night",
            "store": { "Default": {} },
        });
        let v = t.validate(&doc);
        assert!(v.is_valid);
        assert_eq!(v.warnings.len(), 1);
    }
}
