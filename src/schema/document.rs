use bson::Document as BsonDocument;
use std::collections::HashMap;
use std::sync::Arc;

use super::field::FieldDef;

/// Logical name of the implicit primary key; stored as `_id`.
pub const ID_FIELD: &str = "id";
pub const ID_DB_FIELD: &str = "_id";

/// Declared fields of one document type, with lookups in both directions.
///
/// Built once through [`SchemaBuilder`] and shared behind an `Arc`; it is never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSchema {
    name: String,
    collection: Option<String>,
    fields: Vec<FieldDef>,
    by_name: HashMap<String, usize>,
    by_db_field: HashMap<String, usize>,
}

impl DocumentSchema {
    /// Top-level document type. The collection defaults to the lowercased name
    /// and an `id` field mapped to `_id` is declared first.
    #[must_use]
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: name.to_owned(),
            collection: Some(name.to_ascii_lowercase()),
            fields: vec![FieldDef::new(ID_FIELD).db_field(ID_DB_FIELD)],
        }
    }

    /// Embedded document type: no collection, no implicit id.
    #[must_use]
    pub fn embedded(name: &str) -> SchemaBuilder {
        SchemaBuilder { name: name.to_owned(), collection: None, fields: Vec::new() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection name; embedded schemas fall back to their type name.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub const fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    #[must_use]
    pub fn field_by_db_name(&self, db_field: &str) -> Option<&FieldDef> {
        self.by_db_field.get(db_field).map(|&i| &self.fields[i])
    }

    /// Rename top-level keys (and embedded ones, recursively) to storage names.
    /// Undeclared keys pass through untouched.
    #[must_use]
    pub fn to_storage(&self, doc: &BsonDocument) -> BsonDocument {
        let mut out = BsonDocument::new();
        for (k, v) in doc {
            match self.field(k) {
                Some(f) => {
                    out.insert(f.db_field.clone(), f.kind.to_storage_value(v));
                }
                None => {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Inverse of [`Self::to_storage`].
    #[must_use]
    pub fn from_storage(&self, doc: &BsonDocument) -> BsonDocument {
        let mut out = BsonDocument::new();
        for (k, v) in doc {
            match self.field_by_db_name(k) {
                Some(f) => {
                    out.insert(f.name.clone(), f.kind.from_storage_value(v));
                }
                None => {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Insert declared defaults for missing logical fields. Fields without a
    /// default stay absent.
    pub fn fill_defaults(&self, doc: &mut BsonDocument) {
        for f in &self.fields {
            match doc.get_mut(&f.name) {
                Some(v) => f.kind.fill_defaults(v),
                None => {
                    if let Some(def) = &f.default {
                        doc.insert(f.name.clone(), def.clone());
                    }
                }
            }
        }
    }
}

/// Builder for [`DocumentSchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<FieldDef>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn collection(mut self, collection: &str) -> Self {
        if self.collection.is_some() {
            self.collection = Some(collection.to_owned());
        }
        self
    }

    /// Declare a field. Redeclaring a name replaces the earlier declaration.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        if let Some(pos) = self.fields.iter().position(|f| f.name == field.name) {
            self.fields[pos] = field;
        } else {
            self.fields.push(field);
        }
        self
    }

    #[must_use]
    pub fn scalar(self, name: &str) -> Self {
        self.field(FieldDef::new(name))
    }

    #[must_use]
    pub fn build(self) -> Arc<DocumentSchema> {
        let by_name = self.fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        let by_db_field =
            self.fields.iter().enumerate().map(|(i, f)| (f.db_field.clone(), i)).collect();
        log::debug!(
            "declared schema {} ({} fields, collection {:?})",
            self.name,
            self.fields.len(),
            self.collection
        );
        Arc::new(DocumentSchema {
            name: self.name,
            collection: self.collection,
            fields: self.fields,
            by_name,
            by_db_field,
        })
    }
}

impl From<SchemaBuilder> for Arc<DocumentSchema> {
    fn from(b: SchemaBuilder) -> Self {
        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Bson, doc};

    fn comment() -> Arc<DocumentSchema> {
        DocumentSchema::embedded("Comment")
            .field(FieldDef::new("content").db_field("c"))
            .scalar("author")
            .build()
    }

    fn post() -> Arc<DocumentSchema> {
        DocumentSchema::builder("BlogPost")
            .field(FieldDef::new("title").db_field("t"))
            .field(FieldDef::new("rating").default(3))
            .field(FieldDef::embedded_list("comments", comment()).db_field("cs"))
            .build()
    }

    #[test]
    fn collection_defaults_to_lowercase_name() {
        let s = post();
        assert_eq!(s.collection(), "blogpost");
        assert!(!s.is_embedded());
        assert!(comment().is_embedded());
        let s = DocumentSchema::builder("BlogPost").collection("posts").build();
        assert_eq!(s.collection(), "posts");
    }

    #[test]
    fn implicit_id_maps_to_underscore_id() {
        let s = post();
        assert_eq!(s.field("id").unwrap().db_field, "_id");
        assert_eq!(s.field_by_db_name("_id").unwrap().name, "id");
    }

    #[test]
    fn storage_rename_descends_into_embedded_lists() {
        let s = post();
        let logical = doc! {"title": "x", "comments": [{"content": "hi", "author": "bob"}], "extra": 1};
        let stored = s.to_storage(&logical);
        assert_eq!(stored, doc! {"t": "x", "cs": [{"c": "hi", "author": "bob"}], "extra": 1});
        assert_eq!(s.from_storage(&stored), logical);
    }

    #[test]
    fn fill_defaults_leaves_undeclared_defaults_absent() {
        let s = post();
        let mut d = doc! {"title": "x"};
        s.fill_defaults(&mut d);
        assert_eq!(d.get("rating"), Some(&Bson::Int32(3)));
        assert_eq!(d.get("comments"), Some(&Bson::Array(vec![])));
        assert!(d.get("id").is_none());
    }

    #[test]
    fn redeclaring_a_field_replaces_it() {
        let s = DocumentSchema::builder("A").scalar("x").field(FieldDef::new("x").db_field("y")).build();
        assert_eq!(s.fields().len(), 2);
        assert_eq!(s.field("x").unwrap().db_field, "y");
    }
}
