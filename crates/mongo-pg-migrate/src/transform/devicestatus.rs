//! Transformer for device status snapshots (pump, uploader, closed-loop).

use crate::core::{FieldValue, SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "created_at",
    "device",
    "uploader_battery",
    "pump",
    "openaps",
    "extra",
];

#[derive(Default)]
pub struct DeviceStatusTransformer {
    stats: FieldStats,
}

impl DeviceStatusTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for DeviceStatusTransformer {
    fn collection(&self) -> &'static str {
        "devicestatus"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let created_at = reader.req_date(&["created_at", "timestamp"])?;

        // Battery level appears either flat (uploaderBattery) or nested
        // (uploader.battery) depending on uploader generation.
        let mut battery = reader.opt_i32("uploaderBattery");
        if battery.is_null() {
            if let Some(FieldValue::Map(uploader)) = doc.get("uploader") {
                if let Some(level) = uploader.get("battery").and_then(|v| v.as_i64()) {
                    if let Ok(level) = i32::try_from(level) {
                        battery = SqlValue::I32(level);
                    }
                }
            }
        }

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            created_at,
            reader.opt_string("device"),
            battery,
            reader.opt_json("pump"),
            reader.opt_json("openaps"),
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

        if doc.get("pump").is_none() && doc.get("openaps").is_none() {
            result
                .warnings
                .push("status has neither pump nor openaps payload".into());
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
    fn test_transform_pump_status() {
        let t = DeviceStatusTransformer::new();
        let doc = source(doc! {
            "_id": "d1",
            "created_at": "2024-03-01T08:00:00Z",
            "device": "openaps://rig",
            "pump": { "reservoir": 112.3, "battery": { "voltage": 1.52 } },
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values.len(), COLUMNS.len());
        match &row.values[4] {
            SqlValue::Json(pump) => assert_eq!(pump["reservoir"], 112.3),
            other => panic!("expected pump json, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_flat_battery() {
        let t = DeviceStatusTransformer::new();
        let doc = source(doc! {
            "_id": "d1",
            "created_at": "2024-03-01T08:00:00Z",
            "uploaderBattery": 85,
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values[3], SqlValue::I32(85));
    }

    #[test]
    fn test_transform_nested_battery() {
        let t = DeviceStatusTransformer::new();
        let doc = source(doc! {
            "_id": "d1",
            "created_at": "2024-03-01T08:00:00Z",
            "uploader": { "battery": 62 },
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values[3], SqlValue::I32(62));
    }

    #[test]
    fn test_transform_missing_timestamp_fails() {
        let t = DeviceStatusTransformer::new();
        let doc = source(doc! { "_id": "d1", "device": "rig" });
        assert!(t.transform(&doc).is_err());
    }
}
