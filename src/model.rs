//! Typed documents and their mapping to and from raw storage documents.

use bson::{Bson, Document as BsonDocument};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::errors::OdmError;
use crate::query::cursor::QuerySet;
use crate::schema::{DocumentSchema, ID_DB_FIELD};

/// A document type with a declared schema.
///
/// Fields that may be absent (not projected, no default) should be `Option`s.
pub trait Model: Serialize + DeserializeOwned + Sized {
    fn schema() -> Arc<DocumentSchema>;

    /// Hook run on the default cursor handed out by [`crate::Database::objects`].
    #[must_use]
    fn customize_objects(base: QuerySet<Self>) -> QuerySet<Self> {
        base
    }
}

/// Raw storage document to model: rename to logical names, fill declared
/// defaults, then deserialize.
///
/// # Errors
/// Returns a BSON error if the document does not fit the model.
pub fn decode<M: Model>(schema: &DocumentSchema, raw: &BsonDocument) -> Result<M, OdmError> {
    let mut logical = schema.from_storage(raw);
    schema.fill_defaults(&mut logical);
    Ok(bson::deserialize_from_document(logical)?)
}

/// Model to raw storage document. Null fields are not stored.
///
/// # Errors
/// Returns a BSON error if the model does not serialize to a document.
pub fn encode<M: Model>(schema: &DocumentSchema, model: &M) -> Result<BsonDocument, OdmError> {
    let mut logical = bson::serialize_to_document(model)?;
    strip_nulls(&mut logical);
    let mut raw = schema.to_storage(&logical);
    if matches!(raw.get(ID_DB_FIELD), Some(Bson::Null)) {
        raw.remove(ID_DB_FIELD);
    }
    Ok(raw)
}

fn strip_nulls(doc: &mut BsonDocument) {
    let nulls: Vec<String> =
        doc.iter().filter(|(_, v)| matches!(v, Bson::Null)).map(|(k, _)| k.clone()).collect();
    for k in nulls {
        doc.remove(&k);
    }
    for (_, v) in doc.iter_mut() {
        match v {
            Bson::Document(d) => strip_nulls(d),
            Bson::Array(items) => {
                for item in items {
                    if let Bson::Document(d) = item {
                        strip_nulls(d);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use bson::doc;
    use bson::oid::ObjectId;
    use serde::Deserialize;
    use std::sync::LazyLock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        title: Option<String>,
        year: Option<i32>,
        rating: i32,
    }

    static NOTE: LazyLock<Arc<DocumentSchema>> = LazyLock::new(|| {
        DocumentSchema::builder("Note")
            .field(FieldDef::new("title").db_field("t"))
            .scalar("year")
            .field(FieldDef::new("rating").default(3))
            .build()
    });

    impl Model for Note {
        fn schema() -> Arc<DocumentSchema> {
            Arc::clone(&NOTE)
        }
    }

    #[test]
    fn decode_fills_defaults_and_absent_fields() {
        let id = ObjectId::new();
        let n: Note = decode(&Note::schema(), &doc! {"_id": id, "t": "hello"}).unwrap();
        assert_eq!(n, Note { id: Some(id), title: Some("hello".into()), year: None, rating: 3 });
    }

    #[test]
    fn encode_uses_storage_names_and_drops_nulls() {
        let n = Note { id: None, title: Some("x".into()), year: None, rating: 5 };
        assert_eq!(encode(&Note::schema(), &n).unwrap(), doc! {"t": "x", "rating": 5});
    }
}
