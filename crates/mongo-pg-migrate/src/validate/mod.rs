//! Schema and data validation.
//!
//! Errors block migration: writing into an incompatible schema risks
//! corruption. Conflicts never block; they are surfaced with
//! machine-readable resolution options so an operator or policy can decide,
//! which lets day-to-day migrations proceed despite cosmetic drift.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::{FieldKind, SourceDocument};
use crate::error::Result;
use crate::schema::{expected_table, expected_tables, SchemaIntrospector, TypeFamily};
use crate::source::MongoSource;
use crate::target::PgPool;
use crate::transform::TransformerRegistry;

/// A blocking validation finding.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

/// A non-blocking validation finding with resolution options.
#[derive(Debug, Clone)]
pub struct ValidationConflict {
    pub conflict_type: String,
    pub description: String,
    pub value: Option<String>,
    pub resolution_options: Vec<String>,
}

/// Outcome of one or more validation passes.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub success: bool,
    pub errors: Vec<ValidationError>,
    pub conflicts: Vec<ValidationConflict>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>, value: Option<String>) {
        self.success = false;
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
            value,
        });
    }

    pub fn push_conflict(
        &mut self,
        conflict_type: impl Into<String>,
        description: impl Into<String>,
        value: Option<String>,
        resolution_options: &[&str],
    ) {
        self.conflicts.push(ValidationConflict {
            conflict_type: conflict_type.into(),
            description: description.into(),
            value,
            resolution_options: resolution_options.iter().map(|s| s.to_string()).collect(),
        });
    }

    /// Fold another result in; errors accumulate and success is the
    /// conjunction.
    pub fn merge(&mut self, other: ValidationResult) {
        self.success &= other.success;
        self.errors.extend(other.errors);
        self.conflicts.extend(other.conflicts);
    }
}

/// Schema and data validator.
pub struct Validator<'a> {
    source: &'a MongoSource,
    target: &'a PgPool,
    introspector: &'a SchemaIntrospector,
}

impl<'a> Validator<'a> {
    pub fn new(
        source: &'a MongoSource,
        target: &'a PgPool,
        introspector: &'a SchemaIntrospector,
    ) -> Self {
        Self {
            source,
            target,
            introspector,
        }
    }

    /// Validate the target schema against the expected shape.
    ///
    /// Missing tables, incompatible column types, nullability mismatches,
    /// and missing indexes are all errors.
    pub async fn validate_schema(&self) -> Result<ValidationResult> {
        let mut result = ValidationResult::ok();

        for expected in expected_tables() {
            let observed = self
                .introspector
                .table(self.target, &self.target.schema, expected.name)
                .await?;

            let observed = match observed {
                Some(info) => info,
                None => {
                    result.push_error(
                        expected.name,
                        format!("table {}.{} does not exist", self.target.schema, expected.name),
                        None,
                    );
                    continue;
                }
            };

            for column in &expected.columns {
                let qualified = format!("{}.{}", expected.name, column.name);
                match observed.column(column.name) {
                    None => {
                        result.push_error(&qualified, "expected column is missing", None);
                    }
                    Some(actual) => {
                        if !column.family.matches(&actual.data_type) {
                            result.push_error(
                                &qualified,
                                format!(
                                    "type {} is not in the {} family",
                                    actual.data_type, column.family
                                ),
                                Some(actual.data_type.clone()),
                            );
                        }
                        if actual.is_nullable != column.nullable {
                            result.push_error(
                                &qualified,
                                format!(
                                    "nullability mismatch (expected {}, found {})",
                                    if column.nullable { "NULL" } else { "NOT NULL" },
                                    if actual.is_nullable { "NULL" } else { "NOT NULL" },
                                ),
                                None,
                            );
                        }
                    }
                }
            }

            for index in &expected.indexes {
                if !observed.has_index_on(index.columns) {
                    result.push_error(
                        expected.name,
                        format!("expected index on ({}) is missing", index.columns.join(", ")),
                        None,
                    );
                }
            }
        }

        debug!(
            "schema validation: {} errors",
            result.errors.len()
        );
        Ok(result)
    }

    /// Sample source documents and check they can land in the target.
    ///
    /// Required-field violations are errors; type mismatches and reserved
    /// field names are conflicts with resolution options.
    pub async fn validate_data_compatibility(
        &self,
        registry: &TransformerRegistry,
        collections: &[String],
        sample_size: usize,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::ok();

        for collection in collections {
            let transformer = match registry.get(collection) {
                Some(t) => t,
                None => continue,
            };
            let expected = match expected_table(collection) {
                Some(t) => t,
                None => continue,
            };

            let sample = self.source.sample(collection, sample_size).await?;
            debug!("{}: validating {} sampled documents", collection, sample.len());

            for doc in &sample {
                let validation = transformer.validate(doc);
                for issue in validation.errors {
                    result.push_error(
                        format!("{}.{}", collection, issue.field),
                        issue.message,
                        Some(doc.id.clone()),
                    );
                }

                for (field, value) in doc.fields.iter() {
                    if is_reserved_word(field) {
                        result.push_conflict(
                            "reserved_keyword",
                            format!(
                                "{}: field '{}' collides with a reserved keyword",
                                collection, field
                            ),
                            Some(field.clone()),
                            &["rename", "quote-identifier", "skip"],
                        );
                    }

                    if let Some(column) = expected.column(field) {
                        if !value.is_null() && !kind_fits_family(value.kind(), column.family) {
                            result.push_conflict(
                                "type_mismatch",
                                format!(
                                    "{}.{}: observed {} where the target expects {}",
                                    collection,
                                    field,
                                    value.kind(),
                                    column.family
                                ),
                                Some(doc.id.clone()),
                                &["convert", "skip", "use-default"],
                            );
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Validate one document against its collection's transformer.
    pub fn validate_document(
        &self,
        registry: &TransformerRegistry,
        collection: &str,
        doc: &SourceDocument,
    ) -> Option<crate::transform::DocumentValidation> {
        registry.get(collection).map(|t| t.validate(doc))
    }

    /// Scan for duplicate identifiers and inconsistent field types.
    pub async fn detect_conflicts(
        &self,
        collections: &[String],
        cap: usize,
    ) -> Result<Vec<ValidationConflict>> {
        let mut conflicts = Vec::new();

        for collection in collections {
            for group in self.source.find_duplicates(collection, cap).await? {
                conflicts.push(ValidationConflict {
                    conflict_type: "duplicate_identifier".into(),
                    description: format!(
                        "{}: {} documents share key {}",
                        collection, group.count, group.key
                    ),
                    value: Some(group.key),
                    resolution_options: vec![
                        "keep-first".into(),
                        "keep-latest".into(),
                        "skip".into(),
                    ],
                });
            }

            let sample = self.source.sample(collection, 100).await?;
            for (field, kinds) in detect_inconsistent_kinds(&sample) {
                let mut kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
                kinds.sort();
                conflicts.push(ValidationConflict {
                    conflict_type: "inconsistent_field_type".into(),
                    description: format!(
                        "{}.{}: observed kinds vary across documents ({})",
                        collection,
                        field,
                        kinds.join(", ")
                    ),
                    value: Some(field),
                    resolution_options: vec![
                        "convert-to-string".into(),
                        "use-first-type".into(),
                        "skip".into(),
                    ],
                });
            }
        }

        Ok(conflicts)
    }

    /// Cross-store reachability and tracking-schema consistency.
    pub async fn validate_referential_integrity(
        &self,
        collections: &[String],
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::ok();

        if let Err(e) = self.source.ping().await {
            result.push_error("source", format!("source store unreachable: {}", e), None);
        }
        if let Err(e) = self.target.ping().await {
            result.push_error("target", format!("target database unreachable: {}", e), None);
        }

        for collection in collections {
            if expected_table(collection).is_none() {
                result.push_error(
                    collection,
                    "collection has no expected target table definition",
                    None,
                );
            }
        }

        Ok(result)
    }
}

/// Whether an observed value kind can land in a column of the given family
/// without operator intervention.
fn kind_fits_family(kind: FieldKind, family: TypeFamily) -> bool {
    match family {
        TypeFamily::Identifier => matches!(kind, FieldKind::String | FieldKind::Int),
        TypeFamily::Integer => matches!(kind, FieldKind::Int),
        TypeFamily::Float => matches!(kind, FieldKind::Int | FieldKind::Float),
        TypeFamily::Boolean => matches!(kind, FieldKind::Bool),
        TypeFamily::Timestamp => {
            matches!(kind, FieldKind::Date | FieldKind::Int | FieldKind::String)
        }
        TypeFamily::Text => matches!(kind, FieldKind::String),
        TypeFamily::Json => matches!(kind, FieldKind::Map | FieldKind::Array),
    }
}

/// Fields whose observed value kind varies across the sampled documents.
/// Null is not a kind of its own for this purpose.
fn detect_inconsistent_kinds(docs: &[SourceDocument]) -> Vec<(String, HashSet<FieldKind>)> {
    let mut observed: HashMap<String, HashSet<FieldKind>> = HashMap::new();

    for doc in docs {
        for (field, value) in doc.fields.iter() {
            if value.is_null() {
                continue;
            }
            observed
                .entry(field.clone())
                .or_default()
                .insert(value.kind());
        }
    }

    let mut inconsistent: Vec<_> = observed
        .into_iter()
        .filter(|(_, kinds)| kinds.len() > 1)
        .collect();
    inconsistent.sort_by(|a, b| a.0.cmp(&b.0));
    inconsistent
}

/// PostgreSQL reserved keywords that commonly appear as document field names.
fn is_reserved_word(field: &str) -> bool {
    const RESERVED: &[&str] = &[
        "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "between", "both",
        "case", "cast", "check", "collate", "column", "constraint", "create", "current_date",
        "current_time", "default", "desc", "distinct", "do", "else", "end", "except", "false",
        "for", "foreign", "from", "grant", "group", "having", "in", "initially", "intersect",
        "into", "leading", "limit", "localtime", "new", "not", "null", "off", "offset", "old",
        "on", "only", "or", "order", "placing", "primary", "references", "returning", "select",
        "session_user", "some", "symmetric", "table", "then", "to", "trailing", "true", "union",
        "unique", "user", "using", "when", "where", "window", "with",
    ];
    RESERVED.contains(&field.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn source_doc(raw: bson::Document) -> SourceDocument {
        SourceDocument::from_bson(raw).unwrap()
    }

    #[test]
    fn test_merge_accumulates_and_ands_success() {
        let mut a = ValidationResult::ok();
        let mut b = ValidationResult::ok();
        b.push_error("f", "bad", None);
        a.merge(b);
        assert!(!a.success);
        assert_eq!(a.errors.len(), 1);
    }

    #[test]
    fn test_conflicts_do_not_flip_success() {
        let mut r = ValidationResult::ok();
        r.push_conflict("type_mismatch", "odd but workable", None, &["convert"]);
        assert!(r.success);
        assert_eq!(r.conflicts.len(), 1);
    }

    #[test]
    fn test_kind_fits_family_matrix() {
        assert!(kind_fits_family(FieldKind::Int, TypeFamily::Integer));
        assert!(kind_fits_family(FieldKind::Int, TypeFamily::Float));
        assert!(!kind_fits_family(FieldKind::Float, TypeFamily::Integer));
        assert!(!kind_fits_family(FieldKind::String, TypeFamily::Integer));
        assert!(kind_fits_family(FieldKind::String, TypeFamily::Timestamp));
        assert!(kind_fits_family(FieldKind::Date, TypeFamily::Timestamp));
        assert!(kind_fits_family(FieldKind::Map, TypeFamily::Json));
        assert!(!kind_fits_family(FieldKind::Map, TypeFamily::Text));
        assert!(kind_fits_family(FieldKind::Bool, TypeFamily::Boolean));
    }

    #[test]
    fn test_detect_inconsistent_kinds() {
        let docs = vec![
            source_doc(doc! { "_id": "1", "sgv": 120, "device": "g6" }),
            source_doc(doc! { "_id": "2", "sgv": "121", "device": "g6" }),
            source_doc(doc! { "_id": "3", "sgv": 122, "device": bson::Bson::Null }),
        ];

        let inconsistent = detect_inconsistent_kinds(&docs);
        assert_eq!(inconsistent.len(), 1);
        assert_eq!(inconsistent[0].0, "sgv");
        assert!(inconsistent[0].1.contains(&FieldKind::Int));
        assert!(inconsistent[0].1.contains(&FieldKind::String));
    }

    #[test]
    fn test_detect_inconsistent_kinds_ignores_null() {
        let docs = vec![
            source_doc(doc! { "_id": "1", "notes": "x" }),
            source_doc(doc! { "_id": "2", "notes": bson::Bson::Null }),
        ];
        assert!(detect_inconsistent_kinds(&docs).is_empty());
    }

    #[test]
    fn test_reserved_words() {
        assert!(is_reserved_word("user"));
        assert!(is_reserved_word("ORDER"));
        assert!(is_reserved_word("group"));
        assert!(!is_reserved_word("sgv"));
        assert!(!is_reserved_word("created_at"));
    }
}
