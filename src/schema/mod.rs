//! Document-type declarations: fields, storage names, defaults and embedded schemas.
pub mod document;
pub mod field;

pub use document::{DocumentSchema, ID_DB_FIELD, ID_FIELD, SchemaBuilder};
pub use field::{FieldDef, FieldKind};
