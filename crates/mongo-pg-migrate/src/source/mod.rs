//! MongoDB source store operations.
//!
//! The source is read-only: streaming cursors over collections, collection
//! enumeration, index listing, and the aggregation queries the validator
//! needs for duplicate detection.

use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{Client, Database, IndexModel};
use tracing::debug;

use crate::config::SourceConfig;
use crate::core::SourceDocument;
use crate::error::Result;

/// Known date-like field per collection, used for sorting and date filtering.
///
/// CGM entries carry an epoch-milliseconds `date`; everything else carries an
/// RFC 3339 `created_at` string, except profiles which use `startDate`.
pub fn date_field(collection: &str) -> &'static str {
    match collection {
        "entries" => "date",
        "profile" => "startDate",
        _ => "created_at",
    }
}

/// Whether a collection's date field holds epoch milliseconds (vs RFC 3339 text).
fn date_field_is_millis(collection: &str) -> bool {
    collection == "entries"
}

/// Build the BSON filter for an optional date range on a collection.
///
/// RFC 3339 strings compare lexicographically in timestamp order, so string
/// date fields are filtered with their rendered form.
pub fn date_range_filter(
    collection: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Document {
    let field = date_field(collection);
    let mut bounds = Document::new();

    if let Some(start) = start {
        bounds.insert("$gte", render_date(collection, start));
    }
    if let Some(end) = end {
        bounds.insert("$lt", render_date(collection, end));
    }

    if bounds.is_empty() {
        Document::new()
    } else {
        doc! { field: bounds }
    }
}

fn render_date(collection: &str, instant: DateTime<Utc>) -> Bson {
    if date_field_is_millis(collection) {
        Bson::Int64(instant.timestamp_millis())
    } else {
        Bson::String(instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

/// Stable sort order for a collection: date field, then identifier.
///
/// This ordering is what makes checkpoints prefixes of the collection.
pub fn sort_order(collection: &str) -> Document {
    doc! { date_field(collection): 1, "_id": 1 }
}

/// A secondary index observed on a source collection.
#[derive(Debug, Clone)]
pub struct SourceIndex {
    /// Index name.
    pub name: String,
    /// Indexed field names in key order.
    pub fields: Vec<String>,
}

/// A duplicate natural-key group found by aggregation.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// Rendered key value shared by the duplicates.
    pub key: String,
    /// Number of documents sharing it.
    pub count: i64,
}

/// MongoDB source store.
pub struct MongoSource {
    db: Database,
}

impl MongoSource {
    /// Connect to the source store.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        let db = client.database(&config.database);

        // Fail fast on unreachable stores rather than at first cursor read.
        db.run_command(doc! { "ping": 1 }).await?;
        debug!("Connected to source database {}", config.database);

        Ok(Self { db })
    }

    /// Verify the store is still reachable.
    pub async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    /// Enumerate collection names.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self.db.list_collection_names().await?;
        names.sort();
        Ok(names)
    }

    /// Count documents in a collection, honoring the optional date range.
    pub async fn count_documents(
        &self,
        collection: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let filter = date_range_filter(collection, start, end);
        let count = self
            .db
            .collection::<Document>(collection)
            .count_documents(filter)
            .await?;
        Ok(count as i64)
    }

    /// Earliest and latest date values observed in a collection.
    ///
    /// Returns `None` for empty collections or ones whose date field is
    /// missing entirely.
    pub async fn date_range(
        &self,
        collection: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let field = date_field(collection);
        let coll = self.db.collection::<Document>(collection);

        let first = coll
            .find_one(doc! { field: { "$exists": true } })
            .sort(doc! { field: 1 })
            .await?;
        let last = coll
            .find_one(doc! { field: { "$exists": true } })
            .sort(doc! { field: -1 })
            .await?;

        let parse = |raw: Document| -> Option<DateTime<Utc>> {
            let doc = SourceDocument::from_bson(raw).ok()?;
            doc.get(field).and_then(|v| v.as_date())
        };

        Ok(match (first.and_then(parse), last.and_then(parse)) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    /// Open a streaming cursor over a collection in stable sort order.
    ///
    /// `resume_after` skips documents at or before the given identifier;
    /// identifiers are insertion-ordered in this store, so the result is a
    /// suffix under the stable sort for append-only clinical data.
    pub async fn stream(
        &self,
        collection: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        resume_after: Option<&str>,
        batch_size: usize,
    ) -> Result<DocumentStream> {
        let mut filter = date_range_filter(collection, start, end);
        if let Some(last_id) = resume_after {
            filter.insert("_id", doc! { "$gt": parse_id(last_id) });
        }

        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(filter)
            .sort(sort_order(collection))
            .batch_size(batch_size as u32)
            .await?;

        Ok(DocumentStream { cursor })
    }

    /// Fetch a bounded sample of documents for validation.
    pub async fn sample(&self, collection: &str, limit: usize) -> Result<Vec<SourceDocument>> {
        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .find(Document::new())
            .sort(sort_order(collection))
            .limit(limit as i64)
            .await?;

        let mut docs = Vec::new();
        while let Some(raw) = cursor.try_next().await? {
            if let Ok(doc) = SourceDocument::from_bson(raw) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// List secondary indexes on a collection.
    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<SourceIndex>> {
        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .list_indexes()
            .await?;

        let mut indexes = Vec::new();
        while let Some(model) = cursor.try_next().await? {
            if let Some(index) = convert_index(&model) {
                indexes.push(index);
            }
        }
        Ok(indexes)
    }

    /// Find natural-key duplicates within a collection.
    ///
    /// Groups on the collection's date-like key (the de-duplication identity
    /// for clinical records) and returns groups with more than one member,
    /// capped to keep the result set bounded on pathological data.
    pub async fn find_duplicates(
        &self,
        collection: &str,
        cap: usize,
    ) -> Result<Vec<DuplicateGroup>> {
        let field = format!("${}", date_field(collection));
        let pipeline = vec![
            doc! { "$group": { "_id": field, "count": { "$sum": 1 } } },
            doc! { "$match": { "count": { "$gt": 1 } } },
            doc! { "$limit": cap as i64 },
        ];

        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .await?;

        let mut groups = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            let key = doc
                .get("_id")
                .map(render_bson_key)
                .unwrap_or_else(|| "<missing>".to_string());
            let count = doc.get_i64("count").unwrap_or_else(|_| {
                doc.get_i32("count").map(|v| v as i64).unwrap_or(0)
            });
            groups.push(DuplicateGroup { key, count });
        }
        Ok(groups)
    }
}

/// Streaming cursor yielding converted source documents.
pub struct DocumentStream {
    cursor: mongodb::Cursor<Document>,
}

impl DocumentStream {
    /// Next document, or `None` at end of stream.
    ///
    /// Documents without a usable identifier are surfaced as errors so the
    /// pipeline can count them failed without stopping the stream.
    pub async fn next(&mut self) -> Result<Option<Result<SourceDocument>>> {
        match self.cursor.try_next().await? {
            Some(raw) => Ok(Some(SourceDocument::from_bson(raw))),
            None => Ok(None),
        }
    }
}

fn parse_id(id: &str) -> Bson {
    match bson::oid::ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn convert_index(model: &IndexModel) -> Option<SourceIndex> {
    let name = model
        .options
        .as_ref()
        .and_then(|o| o.name.clone())
        .unwrap_or_default();
    let fields: Vec<String> = model.keys.keys().map(|k| k.to_string()).collect();
    if fields.is_empty() || fields == ["_id"] {
        return None;
    }
    Some(SourceIndex { name, fields })
}

fn render_bson_key(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) => v.to_string(),
        Bson::Null => "<null>".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_field_mapping() {
        assert_eq!(date_field("entries"), "date");
        assert_eq!(date_field("treatments"), "created_at");
        assert_eq!(date_field("profile"), "startDate");
        assert_eq!(date_field("devicestatus"), "created_at");
    }

    #[test]
    fn test_date_range_filter_entries_uses_millis() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filter = date_range_filter("entries", Some(start), None);
        let bounds = filter.get_document("date").unwrap();
        assert_eq!(
            bounds.get("$gte"),
            Some(&Bson::Int64(start.timestamp_millis()))
        );
    }

    #[test]
    fn test_date_range_filter_treatments_uses_strings() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let filter = date_range_filter("treatments", Some(start), Some(end));
        let bounds = filter.get_document("created_at").unwrap();
        assert_eq!(
            bounds.get_str("$gte").unwrap(),
            "2024-01-01T00:00:00.000Z"
        );
        assert_eq!(bounds.get_str("$lt").unwrap(), "2024-06-01T00:00:00.000Z");
    }

    #[test]
    fn test_date_range_filter_empty_when_unbounded() {
        let filter = date_range_filter("entries", None, None);
        assert!(filter.is_empty());
    }

    #[test]
    fn test_sort_order_is_date_then_id() {
        let sort = sort_order("entries");
        let keys: Vec<_> = sort.keys().collect();
        assert_eq!(keys, vec!["date", "_id"]);
    }

    #[test]
    fn test_parse_id_object_id_roundtrip() {
        let oid = bson::oid::ObjectId::new();
        match parse_id(&oid.to_hex()) {
            Bson::ObjectId(parsed) => assert_eq!(parsed, oid),
            other => panic!("expected ObjectId, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_id_plain_string() {
        assert_eq!(parse_id("custom-id"), Bson::String("custom-id".into()));
    }

    #[test]
    fn test_convert_index_skips_id_index() {
        let model = IndexModel::builder().keys(doc! { "_id": 1 }).build();
        assert!(convert_index(&model).is_none());
    }

    #[test]
    fn test_convert_index_compound() {
        let model = IndexModel::builder()
            .keys(doc! { "date": 1, "device": 1 })
            .build();
        let index = convert_index(&model).unwrap();
        assert_eq!(index.fields, vec!["date", "device"]);
    }
}
