//! Keyword queries: field-path resolution, predicate and update compilation,
//! script field translation, and the lazy [`QuerySet`] cursor.

pub mod cursor;
pub mod path;
pub mod predicate;
pub mod script;
pub mod types;
pub mod update;

pub use cursor::{CursorState, Iter, QuerySet};
pub use path::{FieldPath, resolve, resolve_field_name};
pub use predicate::{Leaf, Predicate, Q, compile_kwargs};
pub use script::translate_fields;
pub use types::{
    BuiltinScript, CountRequest, DeleteReport, FindRequest, Operator, Order, ScriptRequest,
    SortSpec, UpdateReport, UpdateRequest,
};
pub use update::{UpdateModifier, compile_update};
