//! Server-side reading of compiled query documents.

use bson::{Bson, Document as BsonDocument};
use regex::{Regex, RegexBuilder};

use crate::errors::OdmError;
use crate::utils::num::{f64_to_i64_exact, i64_to_usize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    All { path: String, values: Vec<Bson> },
    Size { path: String, size: usize },
    Mod { path: String, divisor: i64, remainder: i64 },
    Regex { path: String, regex: Regex },
    Cmp { path: String, op: CmpOp, value: Bson },
}

fn rejected(what: impl Into<String>) -> OdmError {
    OdmError::Client(format!("bad query: {}", what.into()))
}

/// Parse a query document (`{field: value | {$op: ..}, $and: [..], $or: [..]}`).
///
/// # Errors
/// `Client` for operators the memory store does not understand or malformed operands.
pub fn parse_query(query: &BsonDocument) -> Result<Filter, OdmError> {
    let mut parts = Vec::with_capacity(query.len());
    for (key, value) in query {
        match key.as_str() {
            "$and" | "$or" => {
                let Bson::Array(items) = value else {
                    return Err(rejected(format!("{key} requires an array")));
                };
                let subs = items
                    .iter()
                    .map(|item| match item {
                        Bson::Document(d) => parse_query(d),
                        other => Err(rejected(format!("{key} item {other}"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parts.push(if key == "$and" { Filter::And(subs) } else { Filter::Or(subs) });
            }
            k if k.starts_with('$') => return Err(rejected(format!("unsupported operator {k}"))),
            _ => match value {
                Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                    parse_operators(key, ops, &mut parts)?;
                }
                _ => parts.push(Filter::Cmp { path: key.clone(), op: CmpOp::Eq, value: value.clone() }),
            },
        }
    }
    Ok(match parts.len() {
        0 => Filter::True,
        1 => parts.remove(0),
        _ => Filter::And(parts),
    })
}

fn parse_operators(path: &str, ops: &BsonDocument, out: &mut Vec<Filter>) -> Result<(), OdmError> {
    let path = path.to_owned();
    let array = |op: &str, v: &Bson| match v {
        Bson::Array(items) => Ok(items.clone()),
        _ => Err(rejected(format!("{op} requires an array"))),
    };
    for (op, v) in ops {
        let cmp = |op| Filter::Cmp { path: path.clone(), op, value: v.clone() };
        out.push(match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$ne" => cmp(CmpOp::Ne),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$in" => Filter::In { path: path.clone(), values: array(op, v)? },
            "$nin" => Filter::Nin { path: path.clone(), values: array(op, v)? },
            "$all" => Filter::All { path: path.clone(), values: array(op, v)? },
            "$exists" => Filter::Exists { path: path.clone(), exists: truthy(v) },
            "$size" => {
                let size = integer(v).and_then(i64_to_usize).ok_or_else(|| rejected("$size"))?;
                Filter::Size { path: path.clone(), size }
            }
            "$mod" => {
                let pair = array(op, v)?;
                let [d, r] = pair.as_slice() else {
                    return Err(rejected("$mod requires [divisor, remainder]"));
                };
                let (Some(divisor), Some(remainder)) = (integer(d), integer(r)) else {
                    return Err(rejected("$mod requires integers"));
                };
                if divisor == 0 {
                    return Err(rejected("$mod divisor is zero"));
                }
                Filter::Mod { path: path.clone(), divisor, remainder }
            }
            "$regex" => {
                let Bson::String(pattern) = v else {
                    return Err(rejected("$regex requires a string"));
                };
                let options = match ops.get("$options") {
                    Some(Bson::String(o)) => o.as_str(),
                    _ => "",
                };
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(options.contains('i'))
                    .multi_line(options.contains('m'))
                    .build()
                    .map_err(|e| rejected(format!("$regex: {e}")))?;
                Filter::Regex { path: path.clone(), regex }
            }
            "$options" if ops.contains_key("$regex") => continue,
            other => return Err(rejected(format!("unsupported operator {other}"))),
        });
    }
    Ok(())
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

pub(crate) fn integer(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) => f64_to_i64_exact(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn plain_values_are_equality() {
        let f = parse_query(&doc! {"t": "x"}).unwrap();
        assert!(matches!(f, Filter::Cmp { ref path, op: CmpOp::Eq, .. } if path == "t"));
        assert!(matches!(parse_query(&doc! {}).unwrap(), Filter::True));
    }

    #[test]
    fn operator_documents_expand_to_a_conjunction() {
        let f = parse_query(&doc! {"y": {"$gte": 2000, "$lt": 2010}, "tags": {"$all": ["a"]}}).unwrap();
        let Filter::And(parts) = f else { panic!("expected And") };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn embedded_literal_documents_stay_equality() {
        let f = parse_query(&doc! {"a": {"n": "x"}}).unwrap();
        assert!(matches!(f, Filter::Cmp { op: CmpOp::Eq, value: Bson::Document(_), .. }));
    }

    #[test]
    fn regex_with_options() {
        let f = parse_query(&doc! {"t": {"$regex": "^he", "$options": "i"}}).unwrap();
        let Filter::Regex { regex, .. } = f else { panic!("expected Regex") };
        assert!(regex.is_match("Hello"));
    }

    #[test]
    fn malformed_operands_are_rejected() {
        for q in [
            doc! {"x": {"$in": 1}},
            doc! {"x": {"$mod": [0, 1]}},
            doc! {"x": {"$size": -1}},
            doc! {"x": {"$where": "1"}},
            doc! {"$nor": []},
        ] {
            assert!(matches!(parse_query(&q), Err(OdmError::Client(_))), "{q}");
        }
    }
}
