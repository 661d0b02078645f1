//! Source collection analysis for planning and reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::MigrationOptions;
use crate::error::Result;
use crate::source::MongoSource;

/// Analysis of one source collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionAnalysis {
    pub collection: String,
    /// Documents eligible under the configured date range.
    pub document_count: i64,
    /// Earliest observed date value, if any.
    pub first_date: Option<DateTime<Utc>>,
    /// Latest observed date value, if any.
    pub last_date: Option<DateTime<Utc>>,
}

/// Computes per-collection document counts and date ranges.
pub struct CollectionAnalyzer<'a> {
    source: &'a MongoSource,
}

impl<'a> CollectionAnalyzer<'a> {
    pub fn new(source: &'a MongoSource) -> Self {
        Self { source }
    }

    /// Analyze one collection under the configured date filter.
    pub async fn analyze(
        &self,
        collection: &str,
        options: &MigrationOptions,
    ) -> Result<CollectionAnalysis> {
        let document_count = self
            .source
            .count_documents(collection, options.start_date, options.end_date)
            .await?;
        let range = self.source.date_range(collection).await?;

        let analysis = CollectionAnalysis {
            collection: collection.to_string(),
            document_count,
            first_date: range.map(|(first, _)| first),
            last_date: range.map(|(_, last)| last),
        };

        info!(
            "{}: {} documents ({:?} .. {:?})",
            analysis.collection, analysis.document_count, analysis.first_date, analysis.last_date
        );

        Ok(analysis)
    }

    /// Analyze every named collection, preserving order.
    pub async fn analyze_all(
        &self,
        collections: &[String],
        options: &MigrationOptions,
    ) -> Result<Vec<CollectionAnalysis>> {
        let mut results = Vec::with_capacity(collections.len());
        for collection in collections {
            results.push(self.analyze(collection, options).await?);
        }
        Ok(results)
    }
}
