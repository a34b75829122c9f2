use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use crate::query::types::{MAX_PATH_DEPTH, MAX_SORT_FIELDS, Order, SortSpec};

use super::filter::{CmpOp, Filter, integer};

pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Exists { path, exists } => !values_at(doc, path).is_empty() == *exists,
        Filter::In { path, values } => matches_any(doc, path, values),
        Filter::Nin { path, values } => !matches_any(doc, path, values),
        Filter::All { path, values } => {
            let found = values_at(doc, path);
            !values.is_empty() && values.iter().all(|v| found.iter().any(|f| element_eq(f, v)))
        }
        Filter::Size { path, size } => values_at(doc, path)
            .iter()
            .any(|v| matches!(v, Bson::Array(items) if items.len() == *size)),
        Filter::Mod { path, divisor, remainder } => candidates(doc, path)
            .iter()
            .filter_map(|v| integer(v))
            .any(|n| n.checked_rem(*divisor) == Some(*remainder)),
        Filter::Regex { path, regex } => candidates(doc, path)
            .iter()
            .any(|v| matches!(v, Bson::String(s) if regex.is_match(s))),
        Filter::Cmp { path, op: CmpOp::Eq, value } => matches_eq(doc, path, value),
        Filter::Cmp { path, op: CmpOp::Ne, value } => !matches_eq(doc, path, value),
        Filter::Cmp { path, op, value } => candidates(doc, path).iter().any(|v| {
            same_bracket(v, value) && {
                let ord = compare_bson(v, value);
                match op {
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Gte => ord != Ordering::Less,
                    CmpOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            }
        }),
    }
}

fn matches_eq(doc: &BsonDocument, path: &str, value: &Bson) -> bool {
    if matches!(value, Bson::Null) && values_at(doc, path).is_empty() {
        return true;
    }
    values_at(doc, path).iter().any(|v| element_eq(v, value))
}

fn matches_any(doc: &BsonDocument, path: &str, set: &[Bson]) -> bool {
    set.iter().any(|s| matches_eq(doc, path, s))
}

/// `value` itself or, for arrays, any element equals `want`.
fn element_eq(value: &Bson, want: &Bson) -> bool {
    bson_eq(value, want)
        || matches!(value, Bson::Array(items) if items.iter().any(|i| bson_eq(i, want)))
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return compare_bson(a, b) == Ordering::Equal;
    }
    a == b
}

/// Values at a dotted path, fanning out through arrays of documents on the way.
pub fn values_at<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let segs: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if !path.is_empty() && segs.len() <= MAX_PATH_DEPTH {
        collect(doc, &segs, &mut out);
    }
    out
}

fn collect<'a>(doc: &'a BsonDocument, segs: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segs.split_first() else { return };
    let Some(v) = doc.get(*head) else { return };
    if rest.is_empty() {
        out.push(v);
        return;
    }
    match v {
        Bson::Document(d) => collect(d, rest, out),
        Bson::Array(items) => {
            for item in items {
                if let Bson::Document(d) = item {
                    collect(d, rest, out);
                }
            }
        }
        _ => {}
    }
}

/// [`values_at`] with arrays flattened into their elements, plus the arrays themselves.
fn candidates<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    for v in values_at(doc, path) {
        if let Bson::Array(items) = v {
            out.extend(items.iter());
        }
        out.push(v);
    }
    out
}

/// Plain dotted lookup without array fan-out.
pub fn lookup<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segs = path.split('.');
    let mut cur = doc.get(segs.next()?)?;
    for seg in segs {
        match cur {
            Bson::Document(d) => cur = d.get(seg)?,
            _ => return None,
        }
    }
    Some(cur)
}

pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (lookup(a, &s.field), lookup(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn as_f64(x: &Bson) -> Option<f64> {
    match x {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.total_cmp(&y);
    }
    match (a, b) {
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::ObjectId(x), T::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (T::DateTime(x), T::DateTime(y)) => x.cmp(y),
        (T::Array(x), T::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(p, q)| compare_bson(p, q))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (T::Document(x), T::Document(y)) => x
            .iter()
            .zip(y)
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_bson(va, vb)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Cross-type sort order of the document database.
fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Null | T::Undefined => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::String(_) | T::Symbol(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) | T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 12,
        T::MaxKey => 255,
    }
}

/// Keep only `fields` (dotted storage paths); arrays of documents are projected per element.
pub fn project_fields(doc: &BsonDocument, fields: &[String]) -> BsonDocument {
    let mut out = BsonDocument::new();
    for f in fields {
        let segs: Vec<&str> = f.split('.').collect();
        project_into(doc, &segs, &mut out);
    }
    out
}

fn project_into(src: &BsonDocument, segs: &[&str], out: &mut BsonDocument) {
    let Some((head, rest)) = segs.split_first() else { return };
    let Some(v) = src.get(*head) else { return };
    if rest.is_empty() {
        out.insert(*head, v.clone());
        return;
    }
    match v {
        Bson::Document(d) => {
            let mut sub = match out.get(*head) {
                Some(Bson::Document(existing)) => existing.clone(),
                _ => BsonDocument::new(),
            };
            project_into(d, rest, &mut sub);
            out.insert(*head, sub);
        }
        Bson::Array(items) => {
            let existing = match out.get(*head) {
                Some(Bson::Array(e)) => e.clone(),
                _ => Vec::new(),
            };
            let projected: Vec<Bson> = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let Bson::Document(d) = item else { return None };
                    let mut sub = match existing.get(i) {
                        Some(Bson::Document(e)) => e.clone(),
                        _ => BsonDocument::new(),
                    };
                    project_into(d, rest, &mut sub);
                    Some(Bson::Document(sub))
                })
                .collect();
            out.insert(*head, projected);
        }
        _ => {}
    }
}
