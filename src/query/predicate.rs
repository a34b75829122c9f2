//! Boolean predicates: unresolved [`Q`] trees built by callers and the resolved
//! [`Predicate`] trees they compile into.

use bson::{Bson, Document as BsonDocument};
use std::sync::Arc;

use crate::errors::OdmError;
use crate::schema::DocumentSchema;
use crate::utils::num::f64_to_i64_exact;

use super::path::{FieldPath, resolve};
use super::types::{MAX_IN_SET, Operator};

/// Caller-facing predicate: keyword maps combined with `and`/`or`.
///
/// Combining never mutates an operand; nested nodes of the same kind are flattened.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    Kwargs(BsonDocument),
    And(Vec<Q>),
    Or(Vec<Q>),
}

impl Q {
    #[must_use]
    pub const fn new(kwargs: BsonDocument) -> Self {
        Self::Kwargs(kwargs)
    }

    #[must_use]
    pub fn and(self, other: impl Into<Self>) -> Self {
        let mut children = Vec::new();
        for q in [self, other.into()] {
            match q {
                Self::And(inner) => children.extend(inner),
                q => children.push(q),
            }
        }
        Self::And(children)
    }

    #[must_use]
    pub fn or(self, other: impl Into<Self>) -> Self {
        let mut children = Vec::new();
        for q in [self, other.into()] {
            match q {
                Self::Or(inner) => children.extend(inner),
                q => children.push(q),
            }
        }
        Self::Or(children)
    }

    /// Resolve every key against `schema` and validate operator values.
    ///
    /// # Errors
    /// `UnresolvedField` for undeclared paths, `InvalidOperatorValue` for values of the wrong shape.
    pub fn compile(&self, schema: &Arc<DocumentSchema>) -> Result<Predicate, OdmError> {
        match self {
            Self::Kwargs(kwargs) => compile_kwargs(schema, kwargs),
            Self::And(children) => {
                let mut out = Predicate::all();
                for c in children {
                    out = out.and(c.compile(schema)?);
                }
                Ok(out)
            }
            Self::Or(children) => {
                let mut iter = children.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| OdmError::invalid_value("or", "needs at least one operand"))?
                    .compile(schema)?;
                iter.try_fold(first, |acc, c| -> Result<Predicate, OdmError> {
                    Ok(acc.or(c.compile(schema)?))
                })
            }
        }
    }
}

impl From<BsonDocument> for Q {
    fn from(kwargs: BsonDocument) -> Self {
        Self::Kwargs(kwargs)
    }
}

/// Compile a keyword map into a predicate. Keys appear once each, so a repeated
/// key has already been overwritten by its last value.
///
/// # Errors
/// See [`Q::compile`].
pub fn compile_kwargs(
    schema: &Arc<DocumentSchema>,
    kwargs: &BsonDocument,
) -> Result<Predicate, OdmError> {
    let mut out = Predicate::all();
    for (key, value) in kwargs {
        let (path, op) = resolve(schema, key)?;
        out = out.and(Predicate::leaf(path, op, value.clone())?);
    }
    Ok(out)
}

/// Resolved predicate tree. `And(vec![])` matches every document.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Leaf(Leaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// One resolved condition; `condition` is the server form of `op` applied to `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: FieldPath,
    pub op: Operator,
    pub value: Bson,
    condition: Bson,
}

impl Leaf {
    #[must_use]
    pub const fn condition(&self) -> &Bson {
        &self.condition
    }
}

impl Predicate {
    /// The empty conjunction.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// # Errors
    /// `InvalidOperatorValue` when `value` does not fit `op`.
    pub fn leaf(path: FieldPath, op: Operator, value: Bson) -> Result<Self, OdmError> {
        let condition = condition(&path, op, &value)?;
        Ok(Self::Leaf(Leaf { path, op, value, condition }))
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::And(c) if c.is_empty())
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let mut children = Vec::new();
        for p in [self, other] {
            match p {
                Self::And(inner) => children.extend(inner),
                p => children.push(p),
            }
        }
        if children.len() == 1 {
            return children.pop().unwrap_or_else(Self::all);
        }
        Self::And(children)
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let mut children = Vec::new();
        for p in [self, other] {
            match p {
                Self::Or(inner) => children.extend(inner),
                p => children.push(p),
            }
        }
        Self::Or(children)
    }

    /// Server query document.
    ///
    /// Conjunctions merge into one document while keys stay distinct (operator
    /// documents on the same key merge when their operators differ); any clash
    /// falls back to `$and`.
    #[must_use]
    pub fn to_query(&self) -> BsonDocument {
        match self {
            Self::Leaf(leaf) => {
                let mut d = BsonDocument::new();
                d.insert(leaf.path.storage_key(), leaf.condition.clone());
                d
            }
            Self::And(children) => {
                let parts: Vec<BsonDocument> = children.iter().map(Self::to_query).collect();
                merge_conjunction(&parts)
            }
            Self::Or(children) => {
                if let [only] = children.as_slice() {
                    return only.to_query();
                }
                let parts: Vec<Bson> =
                    children.iter().map(|c| Bson::Document(c.to_query())).collect();
                let mut d = BsonDocument::new();
                d.insert("$or", parts);
                d
            }
        }
    }
}

fn is_operator_document(v: &Bson) -> bool {
    matches!(v, Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')))
}

fn merge_conjunction(parts: &[BsonDocument]) -> BsonDocument {
    let mut merged = BsonDocument::new();
    for part in parts {
        for (k, v) in part {
            if k.starts_with('$') && merged.contains_key(k) {
                return and_of(parts);
            }
            match merged.get_mut(k) {
                None => {
                    merged.insert(k.clone(), v.clone());
                }
                Some(existing) => {
                    if !(is_operator_document(existing) && is_operator_document(v)) {
                        return and_of(parts);
                    }
                    if let (Bson::Document(into), Bson::Document(from)) = (existing, v) {
                        if from.keys().any(|op| into.contains_key(op)) {
                            return and_of(parts);
                        }
                        for (op, val) in from {
                            into.insert(op.clone(), val.clone());
                        }
                    }
                }
            }
        }
    }
    merged
}

fn and_of(parts: &[BsonDocument]) -> BsonDocument {
    let mut d = BsonDocument::new();
    d.insert("$and", parts.iter().cloned().map(Bson::Document).collect::<Vec<_>>());
    d
}

fn integral(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) => f64_to_i64_exact(*f),
        _ => None,
    }
}

/// Server form of `op` applied to `value` on `path`.
fn condition(path: &FieldPath, op: Operator, value: &Bson) -> Result<Bson, OdmError> {
    let kind = path.kind();
    let element = kind.element_kind();
    let with_key = |v: Bson| -> Bson {
        let mut d = BsonDocument::new();
        if let Some(key) = op.mongo_key() {
            d.insert(key, v);
        }
        Bson::Document(d)
    };
    match op {
        Operator::Eq => {
            // A scalar compared against a list field is a membership test.
            if path.is_list() && !matches!(value, Bson::Array(_)) {
                let mut d = BsonDocument::new();
                d.insert("$all", vec![element.to_storage_value(value)]);
                Ok(Bson::Document(d))
            } else {
                Ok(kind.to_storage_value(value))
            }
        }
        Operator::Neq | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            if matches!(value, Bson::Array(_)) && !path.is_list() {
                return Err(OdmError::invalid_value(op.name(), "expects a single value"));
            }
            Ok(with_key(kind.to_storage_value(value)))
        }
        Operator::In | Operator::Nin | Operator::All => match value {
            Bson::Array(items) if items.len() <= MAX_IN_SET => Ok(with_key(Bson::Array(
                items.iter().map(|v| element.to_storage_value(v)).collect(),
            ))),
            Bson::Array(items) => Err(OdmError::invalid_value(
                op.name(),
                format!("at most {MAX_IN_SET} values, got {}", items.len()),
            )),
            _ => Err(OdmError::invalid_value(op.name(), "expects a sequence")),
        },
        Operator::Mod => match value {
            Bson::Array(pair) if pair.len() == 2 => {
                match (integral(&pair[0]), integral(&pair[1])) {
                    (Some(0), Some(_)) => {
                        Err(OdmError::invalid_value(op.name(), "divisor must not be zero"))
                    }
                    (Some(_), Some(_)) => Ok(with_key(value.clone())),
                    _ => Err(OdmError::invalid_value(op.name(), "expects integer operands")),
                }
            }
            _ => Err(OdmError::invalid_value(op.name(), "expects a [divisor, remainder] pair")),
        },
        Operator::Size => match value {
            Bson::Int32(n) if *n >= 0 => Ok(with_key(value.clone())),
            Bson::Int64(n) if *n >= 0 => Ok(with_key(value.clone())),
            _ => Err(OdmError::invalid_value(op.name(), "expects a non-negative integer")),
        },
        Operator::Exists => match value {
            Bson::Boolean(_) => Ok(with_key(value.clone())),
            _ => Err(OdmError::invalid_value(op.name(), "expects a boolean")),
        },
        Operator::Contains
        | Operator::IContains
        | Operator::StartsWith
        | Operator::IStartsWith
        | Operator::EndsWith
        | Operator::IEndsWith => {
            let Bson::String(s) = value else {
                return Err(OdmError::invalid_value(op.name(), "expects a string"));
            };
            let escaped = regex::escape(s);
            let pattern = match op {
                Operator::StartsWith | Operator::IStartsWith => format!("^{escaped}"),
                Operator::EndsWith | Operator::IEndsWith => format!("{escaped}$"),
                _ => escaped,
            };
            let mut d = BsonDocument::new();
            d.insert("$regex", pattern);
            if op.is_case_insensitive() {
                d.insert("$options", "i");
            }
            Ok(Bson::Document(d))
        }
    }
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
            .scalar("year")
            .field(FieldDef::list("tags"))
            .field(FieldDef::embedded("author", author).db_field("a"))
            .build()
    }

    fn compile(q: Q) -> Result<BsonDocument, OdmError> {
        Ok(q.compile(&schema())?.to_query())
    }

    #[test]
    fn kwargs_compile_to_storage_names() {
        let q = compile(Q::new(doc! {"title": "Rust", "year__gte": 2010, "year__lt": 2020})).unwrap();
        assert_eq!(q, doc! {"t": "Rust", "year": {"$gte": 2010, "$lt": 2020}});
    }

    #[test]
    fn empty_kwargs_match_everything() {
        assert_eq!(compile(Q::new(doc! {})).unwrap(), doc! {});
        assert!(Q::new(doc! {}).compile(&schema()).unwrap().is_all());
    }

    #[test]
    fn later_duplicate_key_wins() {
        let mut kw = doc! {"title": "a", "year": 1};
        kw.insert("title", "b");
        assert_eq!(compile(Q::new(kw)).unwrap(), doc! {"t": "b", "year": 1});
    }

    #[test]
    fn scalar_against_list_field_is_membership() {
        assert_eq!(compile(Q::new(doc! {"tags": "coding"})).unwrap(), doc! {"tags": {"$all": ["coding"]}});
        assert_eq!(compile(Q::new(doc! {"tags": ["a", "b"]})).unwrap(), doc! {"tags": ["a", "b"]});
    }

    #[test]
    fn or_and_clashing_keys() {
        let q = Q::new(doc! {"title": "a"}).or(doc! {"title": "b"});
        assert_eq!(compile(q).unwrap(), doc! {"$or": [{"t": "a"}, {"t": "b"}]});
        let q = Q::new(doc! {"year": 1}).and(doc! {"year": 2});
        assert_eq!(compile(q).unwrap(), doc! {"$and": [{"year": 1}, {"year": 2}]});
    }

    #[test]
    fn nested_combinators_flatten() {
        let a = Q::new(doc! {"title": "a"});
        let b = Q::new(doc! {"year": 1});
        let c = Q::new(doc! {"tags": "x"});
        assert_eq!(a.clone().and(b.clone()).and(c.clone()), a.clone().and(b.clone().and(c.clone())));
        assert_eq!(a.clone().or(b.clone()).or(c.clone()), a.or(b.or(c)));
    }

    #[test]
    fn string_operators_escape_and_anchor() {
        let q = compile(Q::new(doc! {"author__name__istartswith": "a.b"})).unwrap();
        assert_eq!(q, doc! {"a.n": {"$regex": "^a\\.b", "$options": "i"}});
        let q = compile(Q::new(doc! {"title__endswith": "rs"})).unwrap();
        assert_eq!(q, doc! {"t": {"$regex": "rs$"}});
    }

    #[test]
    fn embedded_values_are_renamed() {
        let q = compile(Q::new(doc! {"author": {"name": "ross"}})).unwrap();
        assert_eq!(q, doc! {"a": {"n": "ross"}});
    }

    #[test]
    fn operator_value_shapes_are_checked() {
        for kw in [
            doc! {"year__mod": 3},
            doc! {"year__mod": [0, 1]},
            doc! {"year__mod": [2.5, 1]},
            doc! {"year__mod": [2, "1"]},
            doc! {"year__in": 3},
            doc! {"tags__size": "two"},
            doc! {"year__exists": 1},
            doc! {"title__contains": 5},
            doc! {"year__lt": [1, 2]},
        ] {
            let err = compile(Q::new(kw.clone())).unwrap_err();
            assert!(matches!(err, OdmError::InvalidOperatorValue { .. }), "{kw:?}");
        }
        assert_eq!(compile(Q::new(doc! {"year__mod": [4, 1]})).unwrap(), doc! {"year": {"$mod": [4, 1]}});
        assert_eq!(
            compile(Q::new(doc! {"year__mod": [4.0, 1]})).unwrap(),
            doc! {"year": {"$mod": [4.0, 1]}}
        );
    }

    #[test]
    fn empty_or_is_rejected() {
        assert!(matches!(Q::Or(vec![]).compile(&schema()), Err(OdmError::InvalidOperatorValue { .. })));
    }
}
