//! Field-path resolution: keyword keys such as `comments__author__startswith`
//! become storage paths plus an operator.

use std::sync::Arc;

use crate::errors::OdmError;
use crate::schema::{DocumentSchema, FieldKind};

use super::types::{MAX_PATH_DEPTH, Operator, PATH_SEPARATOR};

/// A resolved chain of declared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    logical: Vec<String>,
    storage: Vec<String>,
    kind: FieldKind,
}

impl FieldPath {
    #[must_use]
    pub fn logical(&self) -> &[String] {
        &self.logical
    }

    #[must_use]
    pub fn storage(&self) -> &[String] {
        &self.storage
    }

    /// Kind of the last field in the chain.
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        self.kind.is_list()
    }

    /// Dotted storage key as sent to the server.
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.storage.join(".")
    }

    /// Keyword form of the path, re-resolvable with [`resolve`].
    #[must_use]
    pub fn logical_key(&self) -> String {
        self.logical.join(PATH_SEPARATOR)
    }
}

/// Resolve a keyword key, splitting off a trailing operator when the remaining
/// segments still resolve without it.
///
/// # Errors
/// Returns `UnresolvedField` naming the first segment that is not declared.
pub fn resolve(schema: &Arc<DocumentSchema>, key: &str) -> Result<(FieldPath, Operator), OdmError> {
    let segments: Vec<&str> = key.split(PATH_SEPARATOR).collect();
    if segments.len() > 1
        && let Some(op) = segments.last().and_then(|s| Operator::from_name(s))
        && let Ok(path) = resolve_segments(schema, &segments[..segments.len() - 1])
    {
        return Ok((path, op));
    }
    Ok((resolve_segments(schema, &segments)?, Operator::Eq))
}

/// Resolve a field name written either dotted (`author.name`) or with the keyword
/// separator (`author__name`). No operator suffix is recognised.
///
/// # Errors
/// Returns `UnresolvedField` naming the first segment that is not declared.
pub fn resolve_field_name(schema: &Arc<DocumentSchema>, name: &str) -> Result<FieldPath, OdmError> {
    let segments: Vec<&str> = name.split(PATH_SEPARATOR).flat_map(|s| s.split('.')).collect();
    resolve_segments(schema, &segments)
}

/// Walk `segments` through `schema`, descending into embedded declarations.
///
/// # Errors
/// Returns `UnresolvedField` naming the first segment that is not declared.
pub fn resolve_segments(
    schema: &Arc<DocumentSchema>,
    segments: &[&str],
) -> Result<FieldPath, OdmError> {
    if segments.is_empty() || segments.len() > MAX_PATH_DEPTH {
        return Err(unresolved(schema, &segments.join(PATH_SEPARATOR)));
    }
    let mut current = Arc::clone(schema);
    let mut logical = Vec::with_capacity(segments.len());
    let mut storage = Vec::with_capacity(segments.len());
    let mut kind = FieldKind::Scalar;
    for (i, seg) in segments.iter().enumerate() {
        let field = current.field(seg).ok_or_else(|| unresolved(&current, seg))?;
        logical.push(field.name.clone());
        storage.push(field.db_field.clone());
        kind = field.kind.clone();
        if i + 1 < segments.len() {
            match kind.embedded_schema() {
                Some(next) => current = Arc::clone(next),
                None => return Err(unresolved(&current, segments[i + 1])),
            }
        }
    }
    Ok(FieldPath { logical, storage, kind })
}

fn unresolved(doc: &DocumentSchema, segment: &str) -> OdmError {
    OdmError::UnresolvedField { document: doc.name().to_owned(), segment: segment.to_owned() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn schema() -> Arc<DocumentSchema> {
        let author = DocumentSchema::embedded("Author").field(FieldDef::new("name").db_field("n")).build();
        let comment = DocumentSchema::embedded("Comment")
            .field(FieldDef::new("content").db_field("c"))
            .field(FieldDef::embedded("author", Arc::clone(&author)).db_field("a"))
            .build();
        DocumentSchema::builder("BlogPost")
            .field(FieldDef::new("title").db_field("t"))
            .field(FieldDef::new("size"))
            .field(FieldDef::list("tags"))
            .field(FieldDef::embedded("author", author))
            .field(FieldDef::embedded_list("comments", comment).db_field("cs"))
            .build()
    }

    #[test]
    fn plain_key_is_implicit_eq() {
        let (p, op) = resolve(&schema(), "title").unwrap();
        assert_eq!(op, Operator::Eq);
        assert_eq!(p.storage_key(), "t");
    }

    #[test]
    fn trailing_operator_is_split_off() {
        let (p, op) = resolve(&schema(), "comments__author__name__istartswith").unwrap();
        assert_eq!(op, Operator::IStartsWith);
        assert_eq!(p.storage_key(), "cs.a.n");
        assert_eq!(p.logical_key(), "comments__author__name");
    }

    #[test]
    fn field_named_like_an_operator_is_a_field() {
        let (p, op) = resolve(&schema(), "size").unwrap();
        assert_eq!(op, Operator::Eq);
        assert_eq!(p.storage_key(), "size");
        let (p, op) = resolve(&schema(), "size__gte").unwrap();
        assert_eq!(op, Operator::Gte);
        assert_eq!(p.storage_key(), "size");
    }

    #[test]
    fn unresolved_segment_is_named() {
        let err = resolve(&schema(), "author__age__lt").unwrap_err();
        assert!(matches!(err, OdmError::UnresolvedField { ref document, ref segment }
            if document == "Author" && segment == "age"));
        let err = resolve(&schema(), "title__name").unwrap_err();
        assert!(matches!(err, OdmError::UnresolvedField { ref segment, .. } if segment == "name"));
        assert!(resolve(&schema(), "").is_err());
    }

    #[test]
    fn dotted_and_keyword_names_agree() {
        let s = schema();
        let a = resolve_field_name(&s, "comments.content").unwrap();
        let b = resolve_field_name(&s, "comments__content").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.storage_key(), "cs.c");
        assert!(resolve_field_name(&s, "tags").unwrap().is_list());
    }
}
