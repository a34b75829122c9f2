use bson::{Bson, Document as BsonDocument};
use std::collections::BTreeMap;

use crate::errors::OdmError;
use crate::query::types::{BuiltinScript, MAX_PROJECTION_FIELDS};

use super::eval::{as_f64, compare_docs, eval_filter, lookup, project_fields};
use super::filter::Filter;

/// Matching documents after sort, skip, limit and projection.
pub fn select(
    docs: &[BsonDocument],
    filter: &Filter,
    sort: &[crate::query::SortSpec],
    skip: usize,
    limit: Option<usize>,
    projection: Option<&[String]>,
) -> Vec<BsonDocument> {
    let mut hits: Vec<&BsonDocument> = docs.iter().filter(|d| eval_filter(d, filter)).collect();
    if !sort.is_empty() {
        hits.sort_by(|a, b| compare_docs(a, b, sort));
    }
    let page = hits.into_iter().skip(skip).take(limit.unwrap_or(usize::MAX));
    match projection {
        Some(fields) => {
            let fields = &fields[..fields.len().min(MAX_PROJECTION_FIELDS)];
            page.map(|d| project_fields(d, fields)).collect()
        }
        None => page.cloned().collect(),
    }
}

fn traverse_to_parent<'a>(
    root: &'a mut BsonDocument,
    path: &str,
) -> Result<(&'a mut BsonDocument, String), OdmError> {
    let mut cur = root;
    let mut segs = path.split('.').peekable();
    while let Some(seg) = segs.next() {
        if segs.peek().is_none() {
            return Ok((cur, seg.to_owned()));
        }
        if !cur.contains_key(seg) {
            cur.insert(seg, BsonDocument::new());
        }
        cur = match cur.get_mut(seg) {
            Some(Bson::Document(d)) => d,
            _ => return Err(OdmError::Client(format!("cannot traverse {seg} in {path}"))),
        };
    }
    Err(OdmError::Client("empty update path".into()))
}

fn inc_value(current: Option<&Bson>, by: &Bson, path: &str) -> Result<Bson, OdmError> {
    let bad = || OdmError::Client(format!("$inc on non-numeric {path}"));
    Ok(match (current.unwrap_or(&Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            a.checked_add(*b).map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32)
        }
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (a, b) => Bson::Double(as_f64(a).ok_or_else(bad)? + as_f64(b).ok_or_else(bad)?),
    })
}

fn array_at<'a>(
    parent: &'a mut BsonDocument,
    key: &str,
    path: &str,
) -> Result<&'a mut Vec<Bson>, OdmError> {
    if !parent.contains_key(key) {
        parent.insert(key, Vec::<Bson>::new());
    }
    match parent.get_mut(key) {
        Some(Bson::Array(items)) => Ok(items),
        _ => Err(OdmError::Client(format!("{path} is not an array"))),
    }
}

fn operand_array<'a>(op: &str, v: &'a Bson) -> Result<&'a [Bson], OdmError> {
    match v {
        Bson::Array(items) => Ok(items),
        _ => Err(OdmError::Client(format!("{op} requires an array"))),
    }
}

/// Apply an update document in place. Returns whether the document changed.
///
/// # Errors
/// `Client` for unknown operators or operands that do not fit the stored value.
pub fn apply_update(doc: &mut BsonDocument, update: &BsonDocument) -> Result<bool, OdmError> {
    let before = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(OdmError::Client(format!("{op} requires a document")));
        };
        for (path, v) in fields {
            if matches!(op.as_str(), "$unset" | "$pull" | "$pullAll") && lookup(doc, path).is_none() {
                continue;
            }
            let (parent, key) = traverse_to_parent(doc, path)?;
            match op.as_str() {
                "$set" => {
                    parent.insert(key, v.clone());
                }
                "$unset" => {
                    parent.remove(&key);
                }
                "$inc" => {
                    let next = inc_value(parent.get(&key), v, path)?;
                    parent.insert(key, next);
                }
                "$push" => array_at(parent, &key, path)?.push(v.clone()),
                "$pushAll" => {
                    let extra = operand_array(op, v)?;
                    array_at(parent, &key, path)?.extend(extra.iter().cloned());
                }
                "$pull" => array_at(parent, &key, path)?.retain(|item| item != v),
                "$pullAll" => {
                    let gone = operand_array(op, v)?;
                    array_at(parent, &key, path)?.retain(|item| !gone.contains(item));
                }
                other => return Err(OdmError::Client(format!("unsupported update operator {other}"))),
            }
        }
    }
    Ok(*doc != before)
}

/// JavaScript object-key spelling of a value.
fn js_key(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.0}"),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Evaluate a builtin aggregation natively, matching the script's result shape.
///
/// # Errors
/// `Client` when the field argument is missing.
pub fn run_builtin(
    builtin: BuiltinScript,
    docs: &[BsonDocument],
    filter: &Filter,
    args: &[Bson],
) -> Result<Bson, OdmError> {
    let Some(Bson::String(field)) = args.first() else {
        return Err(OdmError::Client(format!("{builtin:?} needs a field argument")));
    };
    let values = docs
        .iter()
        .filter(|d| eval_filter(d, filter))
        .filter_map(|d| lookup(d, field))
        .filter(|v| !matches!(v, Bson::Null));
    Ok(match builtin {
        BuiltinScript::Sum => Bson::Double(values.filter_map(as_f64).sum()),
        BuiltinScript::Average => {
            let (mut total, mut count) = (0.0, 0.0);
            for v in values {
                total += as_f64(v).unwrap_or(0.0);
                count += 1.0;
            }
            bson::doc! {"total": total, "count": count}.into()
        }
        BuiltinScript::ItemFrequencies => {
            let mut freqs: BTreeMap<String, f64> = BTreeMap::new();
            for v in values {
                let items = match v {
                    Bson::Array(items) => items.as_slice(),
                    single => std::slice::from_ref(single),
                };
                for item in items {
                    *freqs.entry(js_key(item)).or_default() += 1.0;
                }
            }
            Bson::Document(freqs.into_iter().map(|(k, n)| (k, Bson::Double(n))).collect())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::filter::parse_query;
    use crate::query::{Order, SortSpec};
    use bson::doc;

    #[test]
    fn select_sorts_pages_and_projects() {
        let docs = vec![doc! {"k": 1, "v": 3}, doc! {"k": 2, "v": 1}, doc! {"k": 3, "v": 2}];
        let sort = [SortSpec { field: "v".into(), order: Order::Asc }];
        let fields = ["k".to_owned()];
        let out = select(&docs, &Filter::True, &sort, 1, Some(5), Some(&fields[..]));
        assert_eq!(out, vec![doc! {"k": 3}, doc! {"k": 1}]);
    }

    #[test]
    fn update_operators_apply() {
        let mut d = doc! {"n": 1, "tags": ["a", "b", "a"], "meta": {"x": 1}};
        let changed = apply_update(
            &mut d,
            &doc! {
                "$inc": {"n": 2, "meta.hits": 1.5},
                "$pull": {"tags": "a"},
                "$pushAll": {"more": ["z", "y"]},
                "$unset": {"meta.x": 1},
                "$set": {"t": "new"},
            },
        )
        .unwrap();
        assert!(changed);
        assert_eq!(
            d,
            doc! {"n": 3, "tags": ["b"], "meta": {"hits": 1.5}, "more": ["z", "y"], "t": "new"}
        );
    }

    #[test]
    fn update_reports_no_change_and_rejects_bad_shapes() {
        let mut d = doc! {"t": "x", "n": "s"};
        assert!(!apply_update(&mut d, &doc! {"$set": {"t": "x"}}).unwrap());
        assert!(apply_update(&mut d, &doc! {"$inc": {"n": 1}}).is_err());
        assert!(apply_update(&mut d, &doc! {"$push": {"t": 1}}).is_err());
        assert!(apply_update(&mut d, &doc! {"$rename": {"t": "u"}}).is_err());
    }

    #[test]
    fn int32_increment_widens_on_overflow() {
        let mut d = doc! {"n": i32::MAX};
        apply_update(&mut d, &doc! {"$inc": {"n": 1}}).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
    }

    #[test]
    fn builtins_match_script_semantics() {
        let docs = vec![
            doc! {"r": 2, "tags": ["a", "b"]},
            doc! {"r": 4.5, "tags": ["a"]},
            doc! {"tags": "c"},
        ];
        let all = parse_query(&doc! {}).unwrap();
        let arg = |f: &str| vec![Bson::String(f.into())];
        assert_eq!(run_builtin(BuiltinScript::Sum, &docs, &all, &arg("r")).unwrap(), Bson::Double(6.5));
        assert_eq!(
            run_builtin(BuiltinScript::Average, &docs, &all, &arg("r")).unwrap(),
            Bson::Document(doc! {"total": 6.5, "count": 2.0})
        );
        assert_eq!(
            run_builtin(BuiltinScript::ItemFrequencies, &docs, &all, &arg("tags")).unwrap(),
            Bson::Document(doc! {"a": 2.0, "b": 1.0, "c": 1.0})
        );
        assert!(run_builtin(BuiltinScript::Sum, &docs, &all, &[]).is_err());
    }
}
