//! Core value models shared across the engine.

pub mod document;
pub mod sql;

pub use document::{FieldKind, FieldMap, FieldValue, SourceDocument};
pub use sql::{SqlValue, TargetRow};
