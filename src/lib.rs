//! Document mapper query layer: typed models over a document database, keyword
//! queries compiled to server query documents, and lazy cursors.

pub mod client;
pub mod config;
pub mod database;
pub mod errors;
pub mod memory;
pub mod model;
pub mod query;
pub mod schema;
pub mod utils;

pub use client::DatabaseClient;
pub use config::{LogConfig, OdmConfig};
pub use database::Database;
pub use errors::OdmError;
pub use memory::MemoryClient;
pub use model::Model;
pub use query::{Q, QuerySet};
pub use schema::{DocumentSchema, FieldDef, FieldKind};
