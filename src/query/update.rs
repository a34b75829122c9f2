use bson::{Bson, Document as BsonDocument};
use std::sync::Arc;

use crate::errors::OdmError;
use crate::schema::DocumentSchema;

use super::path::resolve_segments;
use super::types::PATH_SEPARATOR;

/// Atomic update kinds accepted as the first segment of an update key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateModifier {
    Set,
    Unset,
    Inc,
    Dec,
    Push,
    PushAll,
    Pull,
    PullAll,
}

impl UpdateModifier {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "set" => Self::Set,
            "unset" => Self::Unset,
            "inc" => Self::Inc,
            "dec" => Self::Dec,
            "push" => Self::Push,
            "push_all" => Self::PushAll,
            "pull" => Self::Pull,
            "pull_all" => Self::PullAll,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Unset => "unset",
            Self::Inc => "inc",
            Self::Dec => "dec",
            Self::Push => "push",
            Self::PushAll => "push_all",
            Self::Pull => "pull",
            Self::PullAll => "pull_all",
        }
    }

    /// Server operator; `dec` shares `$inc`.
    #[must_use]
    pub const fn mongo_key(self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::Unset => "$unset",
            Self::Inc | Self::Dec => "$inc",
            Self::Push => "$push",
            Self::PushAll => "$pushAll",
            Self::Pull => "$pull",
            Self::PullAll => "$pullAll",
        }
    }
}

/// Split `set__author__name` into the modifier and the remaining path segments.
fn split_key(key: &str) -> Result<(UpdateModifier, Vec<&str>), OdmError> {
    // `push_all`/`pull_all` contain a single underscore, so split on the separator only.
    let (head, rest) = key
        .split_once(PATH_SEPARATOR)
        .ok_or_else(|| OdmError::UnknownModifier(key.to_owned()))?;
    let modifier =
        UpdateModifier::from_name(head).ok_or_else(|| OdmError::UnknownModifier(head.to_owned()))?;
    Ok((modifier, rest.split(PATH_SEPARATOR).collect()))
}

fn negate(value: &Bson) -> Result<Bson, OdmError> {
    let overflow = || OdmError::invalid_value("dec", "value cannot be negated");
    match value {
        Bson::Int32(i) => Ok(i.checked_neg().map_or_else(|| Bson::Int64(-i64::from(*i)), Bson::Int32)),
        Bson::Int64(i) => i.checked_neg().map(Bson::Int64).ok_or_else(overflow),
        Bson::Double(d) => Ok(Bson::Double(-d)),
        _ => Err(OdmError::invalid_value("dec", "expects a number")),
    }
}

/// Compile update keywords into one update document with a sub-document per
/// server operator, in order of first appearance.
///
/// # Errors
/// `UnknownModifier`, `UnresolvedField`, or `InvalidOperatorValue` when a value
/// does not fit its modifier or the map is empty.
pub fn compile_update(
    schema: &Arc<DocumentSchema>,
    kwargs: &BsonDocument,
) -> Result<BsonDocument, OdmError> {
    if kwargs.is_empty() {
        return Err(OdmError::invalid_value("update", "no update modifiers given"));
    }
    let mut update = BsonDocument::new();
    for (key, value) in kwargs {
        let (modifier, segments) = split_key(key)?;
        let path = resolve_segments(schema, &segments)?;
        let kind = path.kind();
        let name = modifier.name();
        let compiled = match modifier {
            UpdateModifier::Set => kind.to_storage_value(value),
            UpdateModifier::Unset => Bson::Int32(1),
            UpdateModifier::Inc => match value {
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => value.clone(),
                _ => return Err(OdmError::invalid_value(name, "expects a number")),
            },
            UpdateModifier::Dec => negate(value)?,
            UpdateModifier::Push | UpdateModifier::Pull => {
                if matches!(value, Bson::Array(_)) {
                    return Err(OdmError::invalid_value(name, "expects a single value"));
                }
                kind.element_kind().to_storage_value(value)
            }
            UpdateModifier::PushAll | UpdateModifier::PullAll => match value {
                Bson::Array(_) => kind.to_storage_value(value),
                _ => return Err(OdmError::invalid_value(name, "expects a sequence")),
            },
        };
        let op_key = modifier.mongo_key();
        if !update.contains_key(op_key) {
            update.insert(op_key, BsonDocument::new());
        }
        if let Some(Bson::Document(group)) = update.get_mut(op_key) {
            group.insert(path.storage_key(), compiled);
        }
    }
    log::trace!("compiled update {update}");
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use bson::doc;

    fn schema() -> Arc<DocumentSchema> {
        let author = DocumentSchema::embedded("Author").field(FieldDef::new("name").db_field("n")).build();
        DocumentSchema::builder("BlogPost")
            .field(FieldDef::new("title").db_field("t"))
            .field(FieldDef::new("views").db_field("v"))
            .field(FieldDef::list("tags"))
            .field(FieldDef::embedded("author", author).db_field("a"))
            .build()
    }

    #[test]
    fn groups_by_modifier() {
        let u = compile_update(
            &schema(),
            &doc! {"set__title": "x", "inc__views": 1, "set__author__name": "ross", "unset__tags": true},
        )
        .unwrap();
        assert_eq!(u, doc! {"$set": {"t": "x", "a.n": "ross"}, "$inc": {"v": 1}, "$unset": {"tags": 1}});
    }

    #[test]
    fn dec_is_negated_inc() {
        let u = compile_update(&schema(), &doc! {"dec__views": 2}).unwrap();
        assert_eq!(u, doc! {"$inc": {"v": -2}});
        let u = compile_update(&schema(), &doc! {"dec__views": 1.5}).unwrap();
        assert_eq!(u, doc! {"$inc": {"v": -1.5}});
        let u = compile_update(&schema(), &doc! {"dec__views": i32::MIN}).unwrap();
        assert_eq!(u, doc! {"$inc": {"v": Bson::Int64(-i64::from(i32::MIN))}});
        assert!(compile_update(&schema(), &doc! {"dec__views": "one"}).is_err());
    }

    #[test]
    fn push_and_push_all_arity() {
        let u = compile_update(&schema(), &doc! {"push__tags": "rust", "pull_all__tags": ["go", "c"]}).unwrap();
        assert_eq!(u, doc! {"$push": {"tags": "rust"}, "$pullAll": {"tags": ["go", "c"]}});
        for bad in [doc! {"push__tags": ["a"]}, doc! {"push_all__tags": "a"}, doc! {"inc__views": "x"}] {
            assert!(matches!(
                compile_update(&schema(), &bad),
                Err(OdmError::InvalidOperatorValue { .. })
            ));
        }
    }

    #[test]
    fn embedded_set_is_renamed() {
        let u = compile_update(&schema(), &doc! {"set__author": {"name": "ross"}}).unwrap();
        assert_eq!(u, doc! {"$set": {"a": {"n": "ross"}}});
    }

    #[test]
    fn unknown_modifiers_and_fields() {
        assert!(matches!(
            compile_update(&schema(), &doc! {"rename__title": "x"}),
            Err(OdmError::UnknownModifier(m)) if m == "rename"
        ));
        assert!(matches!(compile_update(&schema(), &doc! {"title": "x"}), Err(OdmError::UnknownModifier(_))));
        assert!(matches!(
            compile_update(&schema(), &doc! {"set__nope": 1}),
            Err(OdmError::UnresolvedField { .. })
        ));
        assert!(compile_update(&schema(), &doc! {}).is_err());
    }
}
