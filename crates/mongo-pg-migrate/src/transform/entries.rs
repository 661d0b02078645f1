//! Transformer for CGM sensor entries.
//!
//! Entries are the highest-volume collection. Timestamps arrive as epoch
//! milliseconds in `date`, with `dateString`/`sysTime` RFC 3339 fallbacks on
//! older uploader versions.

use crate::core::{SourceDocument, SqlValue, TargetRow};

use super::{
    DocumentValidation, FieldIssue, FieldReader, FieldStats, FieldStatsSnapshot, TransformError,
    Transformer,
};

const COLUMNS: &[&str] = &[
    "source_id",
    "device",
    "date",
    "sgv",
    "direction",
    "trend",
    "filtered",
    "unfiltered",
    "rssi",
    "noise",
    "entry_type",
    "extra",
];

#[derive(Default)]
pub struct EntriesTransformer {
    stats: FieldStats,
}

impl EntriesTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for EntriesTransformer {
    fn collection(&self) -> &'static str {
        "entries"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn transform(&self, doc: &SourceDocument) -> Result<TargetRow, TransformError> {
        let reader = FieldReader::new(doc, &self.stats);
        let date = reader.req_date(&["date", "dateString", "sysTime"])?;

        let values = vec![
            SqlValue::Text(doc.id.clone()),
            reader.opt_string("device"),
            date,
            reader.opt_i32("sgv"),
            reader.opt_string("direction"),
            reader.opt_i32("trend"),
            reader.opt_f64("filtered"),
            reader.opt_f64("unfiltered"),
            reader.opt_i32("rssi"),
            reader.opt_i32("noise"),
            reader.opt_string("type"),
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

        let has_date = ["date", "dateString", "sysTime"]
            .iter()
            .any(|f| doc.get(f).map(|v| v.as_date().is_some()).unwrap_or(false));
        if !has_date {
            result.is_valid = false;
            result.errors.push(FieldIssue {
                field: "date".into(),
                message: "no parseable timestamp in date, dateString, or sysTime".into(),
            });
        }

        let entry_type = doc.get("type").and_then(|v| v.as_str());
        if entry_type == Some("sgv") && doc.get("sgv").and_then(|v| v.as_i64()).is_none() {
            result
                .warnings
                .push("entry of type 'sgv' has no numeric sgv value".into());
        }

        if doc.get("date").is_none() && doc.get("dateString").is_some() {
            result
                .suggested_fixes
                .push("derive epoch-millisecond date from dateString".into());
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
    use chrono::{TimeZone, Utc};

    fn source(raw: bson::Document) -> SourceDocument {
        SourceDocument::from_bson(raw).unwrap()
    }

    #[test]
    fn test_transform_typical_sgv_entry() {
        let t = EntriesTransformer::new();
        let doc = source(doc! {
            "_id": "abc",
            "device": "xDrip-DexcomG6",
            "date": 1_700_000_000_000i64,
            "sgv": 124,
            "direction": "Flat",
            "type": "sgv",
            "utcOffset": 120,
        });

        let row = t.transform(&doc).unwrap();
        assert_eq!(row.source_id, "abc");
        assert_eq!(row.values.len(), COLUMNS.len());
        assert_eq!(row.values[0], SqlValue::Text("abc".into()));
        assert_eq!(row.values[3], SqlValue::I32(124));
        assert_eq!(
            row.values[2],
            SqlValue::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
        // utcOffset is unrecognized and lands in the extra bag
        match &row.values[11] {
            SqlValue::Json(bag) => assert_eq!(bag["utcOffset"], 120),
            other => panic!("expected extra bag, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_falls_back_to_date_string() {
        let t = EntriesTransformer::new();
        let doc = source(doc! {
            "_id": "abc",
            "dateString": "2024-03-01T12:30:00Z",
            "sgv": 100,
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(
            row.values[2],
            SqlValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_transform_missing_date_fails() {
        let t = EntriesTransformer::new();
        let doc = source(doc! { "_id": "abc", "sgv": 100 });
        let err = t.transform(&doc).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("date"));
    }

    #[test]
    fn test_transform_string_trend_coerced() {
        let t = EntriesTransformer::new();
        let doc = source(doc! {
            "_id": "abc",
            "date": 1_700_000_000_000i64,
            "trend": "4",
        });
        let row = t.transform(&doc).unwrap();
        assert_eq!(row.values[5], SqlValue::I32(4));
    }

    #[test]
    fn test_validate_flags_missing_date() {
        let t = EntriesTransformer::new();
        let doc = source(doc! { "_id": "abc", "sgv": 100 });
        let v = t.validate(&doc);
        assert!(!v.is_valid);
        assert_eq!(v.errors[0].field, "date");
    }

    #[test]
    fn test_validate_warns_on_sgv_without_value() {
        let t = EntriesTransformer::new();
        let doc = source(doc! {
            "_id": "abc",
            "date": 1_700_000_000_000i64,
            "type": "sgv",
        });
        let v = t.validate(&doc);
        assert!(v.is_valid);
        assert_eq!(v.warnings.len(), 1);
    }

    #[test]
    fn test_stats_accumulate_across_documents() {
        let t = EntriesTransformer::new();
        for sgv in [100, 110] {
            let doc = source(doc! { "_id": "x", "date": 1_700_000_000_000i64, "sgv": sgv });
            t.transform(&doc).unwrap();
        }
        let doc = source(doc! { "_id": "x", "date": 1_700_000_000_000i64 });
        t.transform(&doc).unwrap();

        let stats = t.stats();
        let sgv = stats.field("sgv").unwrap();
        assert_eq!(sgv.present, 2);
        assert_eq!(sgv.missing, 1);
        assert_eq!(sgv.most_frequent_kind, Some(crate::core::FieldKind::Int));
    }
}
