use bson::Bson;
use std::sync::Arc;

use super::document::DocumentSchema;

/// Shape of a declared field, as far as query translation cares.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Any single BSON value.
    Scalar,
    /// Multi-valued field; the box holds the element kind.
    List(Box<FieldKind>),
    /// Nested document with its own declared fields.
    Embedded(Arc<DocumentSchema>),
}

impl FieldKind {
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Schema to descend into when a path continues past this field.
    #[must_use]
    pub fn embedded_schema(&self) -> Option<&Arc<DocumentSchema>> {
        match self {
            Self::Embedded(s) => Some(s),
            Self::List(inner) => inner.embedded_schema(),
            Self::Scalar => None,
        }
    }

    /// Kind of a single item stored in this field.
    #[must_use]
    pub fn element_kind(&self) -> &Self {
        match self {
            Self::List(inner) => inner,
            other => other,
        }
    }

    /// Rename embedded keys inside `value` from logical to storage names.
    #[must_use]
    pub fn to_storage_value(&self, value: &Bson) -> Bson {
        match (self, value) {
            (Self::Embedded(s), Bson::Document(d)) => Bson::Document(s.to_storage(d)),
            (Self::List(inner), Bson::Array(items)) => {
                Bson::Array(items.iter().map(|v| inner.to_storage_value(v)).collect())
            }
            _ => value.clone(),
        }
    }

    #[must_use]
    pub fn from_storage_value(&self, value: &Bson) -> Bson {
        match (self, value) {
            (Self::Embedded(s), Bson::Document(d)) => Bson::Document(s.from_storage(d)),
            (Self::List(inner), Bson::Array(items)) => {
                Bson::Array(items.iter().map(|v| inner.from_storage_value(v)).collect())
            }
            _ => value.clone(),
        }
    }

    pub(crate) fn fill_defaults(&self, value: &mut Bson) {
        match (self, value) {
            (Self::Embedded(s), Bson::Document(d)) => s.fill_defaults(d),
            (Self::List(inner), Bson::Array(items)) => {
                for v in items {
                    inner.fill_defaults(v);
                }
            }
            _ => {}
        }
    }
}

/// A declared field: logical name, storage name, kind and optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub db_field: String,
    pub kind: FieldKind,
    pub default: Option<Bson>,
}

impl FieldDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), db_field: name.to_owned(), kind: FieldKind::Scalar, default: None }
    }

    /// List of scalars, defaulting to an empty array.
    #[must_use]
    pub fn list(name: &str) -> Self {
        Self::new(name).kind(FieldKind::List(Box::new(FieldKind::Scalar))).default(Bson::Array(Vec::new()))
    }

    #[must_use]
    pub fn embedded(name: &str, schema: Arc<DocumentSchema>) -> Self {
        Self::new(name).kind(FieldKind::Embedded(schema))
    }

    /// List of embedded documents, defaulting to an empty array.
    #[must_use]
    pub fn embedded_list(name: &str, schema: Arc<DocumentSchema>) -> Self {
        Self::new(name)
            .kind(FieldKind::List(Box::new(FieldKind::Embedded(schema))))
            .default(Bson::Array(Vec::new()))
    }

    #[must_use]
    pub fn db_field(mut self, db_field: &str) -> Self {
        db_field.clone_into(&mut self.db_field);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(value.into());
        self
    }
}
