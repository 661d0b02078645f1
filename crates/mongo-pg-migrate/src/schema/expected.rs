//! Expected target schema for the migrated entity tables.
//!
//! The relational schema is provisioned by separate tooling; this catalog
//! records the shape the engine requires so the validator can confirm it
//! before any write happens.

/// Coarse type family for column compatibility checks.
///
/// Exact type equality is deliberately not required: a provisioning tool may
/// choose `varchar` over `text` or `numeric` over `double precision` without
/// breaking the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    /// Identifiers: text/varchar/uuid.
    Identifier,
    /// Whole-number family.
    Integer,
    /// Floating point / arbitrary precision.
    Float,
    /// Booleans.
    Boolean,
    /// Date/time family.
    Timestamp,
    /// Free-form text.
    Text,
    /// Semi-structured (json/jsonb).
    Json,
}

impl TypeFamily {
    /// Whether a PostgreSQL data type (as reported by information_schema)
    /// belongs to this family.
    pub fn matches(&self, pg_type: &str) -> bool {
        let t = pg_type.to_lowercase();
        match self {
            TypeFamily::Identifier => {
                matches!(
                    t.as_str(),
                    "text" | "character varying" | "varchar" | "uuid" | "character" | "char"
                )
            }
            TypeFamily::Integer => {
                matches!(t.as_str(), "smallint" | "integer" | "int" | "bigint")
            }
            TypeFamily::Float => matches!(
                t.as_str(),
                "real" | "double precision" | "numeric" | "decimal"
            ),
            TypeFamily::Boolean => matches!(t.as_str(), "boolean" | "bool"),
            TypeFamily::Timestamp => matches!(
                t.as_str(),
                "timestamp with time zone"
                    | "timestamp without time zone"
                    | "timestamptz"
                    | "timestamp"
                    | "date"
            ),
            TypeFamily::Text => {
                matches!(
                    t.as_str(),
                    "text" | "character varying" | "varchar" | "character" | "char"
                )
            }
            TypeFamily::Json => matches!(t.as_str(), "json" | "jsonb"),
        }
    }
}

impl std::fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TypeFamily::Identifier => "identifier",
            TypeFamily::Integer => "integer",
            TypeFamily::Float => "float",
            TypeFamily::Boolean => "boolean",
            TypeFamily::Timestamp => "timestamp",
            TypeFamily::Text => "text",
            TypeFamily::Json => "json",
        };
        f.write_str(s)
    }
}

/// An expected column: name, type family, nullability.
#[derive(Debug, Clone)]
pub struct ExpectedColumn {
    pub name: &'static str,
    pub family: TypeFamily,
    pub nullable: bool,
}

/// An expected secondary index, identified by its column list.
#[derive(Debug, Clone)]
pub struct ExpectedIndex {
    pub columns: &'static [&'static str],
}

/// An expected entity table.
#[derive(Debug, Clone)]
pub struct ExpectedTable {
    pub name: &'static str,
    pub columns: Vec<ExpectedColumn>,
    pub indexes: Vec<ExpectedIndex>,
}

impl ExpectedTable {
    pub fn column(&self, name: &str) -> Option<&ExpectedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Non-nullable columns other than the identifier.
    pub fn required_fields(&self) -> impl Iterator<Item = &ExpectedColumn> {
        self.columns
            .iter()
            .filter(|c| !c.nullable && c.name != "source_id")
    }
}

fn col(name: &'static str, family: TypeFamily, nullable: bool) -> ExpectedColumn {
    ExpectedColumn {
        name,
        family,
        nullable,
    }
}

/// The full expected schema: one table per migrated collection.
pub fn expected_tables() -> Vec<ExpectedTable> {
    use TypeFamily::*;

    vec![
        ExpectedTable {
            name: "entries",
            columns: vec![
                col("source_id", Identifier, false),
                col("device", Text, true),
                col("date", Timestamp, false),
                col("sgv", Integer, true),
                col("direction", Text, true),
                col("trend", Integer, true),
                col("filtered", Float, true),
                col("unfiltered", Float, true),
                col("rssi", Integer, true),
                col("noise", Integer, true),
                col("entry_type", Text, true),
                col("extra", Json, true),
            ],
            indexes: vec![ExpectedIndex { columns: &["date"] }],
        },
        ExpectedTable {
            name: "treatments",
            columns: vec![
                col("source_id", Identifier, false),
                col("event_type", Text, false),
                col("created_at", Timestamp, false),
                col("glucose", Float, true),
                col("glucose_type", Text, true),
                col("carbs", Float, true),
                col("protein", Float, true),
                col("fat", Float, true),
                col("insulin", Float, true),
                col("duration", Float, true),
                col("percent", Float, true),
                col("absolute", Float, true),
                col("entered_by", Text, true),
                col("notes", Text, true),
                col("extra", Json, true),
            ],
            indexes: vec![
                ExpectedIndex {
                    columns: &["created_at"],
                },
                ExpectedIndex {
                    columns: &["event_type"],
                },
            ],
        },
        ExpectedTable {
            name: "devicestatus",
            columns: vec![
                col("source_id", Identifier, false),
                col("created_at", Timestamp, false),
                col("device", Text, true),
                col("uploader_battery", Integer, true),
                col("pump", Json, true),
                col("openaps", Json, true),
                col("extra", Json, true),
            ],
            indexes: vec![ExpectedIndex {
                columns: &["created_at"],
            }],
        },
        ExpectedTable {
            name: "profile",
            columns: vec![
                col("source_id", Identifier, false),
                col("start_date", Timestamp, false),
                col("default_profile", Text, true),
                col("units", Text, true),
                col("timezone", Text, true),
                col("store", Json, true),
                col("extra", Json, true),
            ],
            indexes: vec![ExpectedIndex {
                columns: &["start_date"],
            }],
        },
        ExpectedTable {
            name: "food",
            columns: vec![
                col("source_id", Identifier, false),
                col("name", Text, false),
                col("category", Text, true),
                col("subcategory", Text, true),
                col("carbs", Float, true),
                col("fat", Float, true),
                col("protein", Float, true),
                col("energy", Float, true),
                col("gi", Integer, true),
                col("unit", Text, true),
                col("portion", Float, true),
                col("extra", Json, true),
            ],
            indexes: vec![ExpectedIndex { columns: &["name"] }],
        },
        ExpectedTable {
            name: "activity",
            columns: vec![
                col("source_id", Identifier, false),
                col("created_at", Timestamp, false),
                col("activity_type", Text, true),
                col("duration", Float, true),
                col("notes", Text, true),
                col("extra", Json, true),
            ],
            indexes: vec![ExpectedIndex {
                columns: &["created_at"],
            }],
        },
    ]
}

/// Look up the expected table for a collection.
pub fn expected_table(collection: &str) -> Option<ExpectedTable> {
    expected_tables().into_iter().find(|t| t.name == collection)
}
