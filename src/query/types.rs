use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};
use std::fmt;

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_PROJECTION_FIELDS: usize = 64;

/// Separator between path segments and the trailing operator in keyword keys.
pub const PATH_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    #[must_use]
    pub const fn direction(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// One sort key; `field` is the dotted storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Filter operators accepted as the trailing segment of a keyword key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    Mod,
    All,
    Size,
    Exists,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
}

impl Operator {
    pub const ALL: [Self; 18] = [
        Self::Eq,
        Self::Neq,
        Self::Lt,
        Self::Lte,
        Self::Gt,
        Self::Gte,
        Self::In,
        Self::Nin,
        Self::Mod,
        Self::All,
        Self::Size,
        Self::Exists,
        Self::Contains,
        Self::IContains,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Mod => "mod",
            Self::All => "all",
            Self::Size => "size",
            Self::Exists => "exists",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// String-matching operators compile to an anchored, escaped `$regex`.
    #[must_use]
    pub const fn is_string_match(self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
        )
    }

    #[must_use]
    pub const fn is_case_insensitive(self) -> bool {
        matches!(self, Self::IContains | Self::IStartsWith | Self::IEndsWith)
    }

    /// Server-side operator key, if any. `Eq` and the string matchers have none.
    #[must_use]
    pub const fn mongo_key(self) -> Option<&'static str> {
        match self {
            Self::Neq => Some("$ne"),
            Self::Lt => Some("$lt"),
            Self::Lte => Some("$lte"),
            Self::Gt => Some("$gt"),
            Self::Gte => Some("$gte"),
            Self::In => Some("$in"),
            Self::Nin => Some("$nin"),
            Self::Mod => Some("$mod"),
            Self::All => Some("$all"),
            Self::Size => Some("$size"),
            Self::Exists => Some("$exists"),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A page request issued by a cursor.
///
/// Semantics:
/// - `projection` lists dotted storage paths to return; `None` returns whole documents.
/// - Sorting is applied before `skip`/`limit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub collection: String,
    pub query: BsonDocument,
    pub projection: Option<Vec<String>>,
    pub sort: Vec<SortSpec>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindRequest {
    /// Sort specification in server form, e.g. `{"year": -1}`.
    #[must_use]
    pub fn sort_document(&self) -> BsonDocument {
        self.sort.iter().map(|s| (s.field.clone(), Bson::Int32(s.order.direction()))).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountRequest {
    pub collection: String,
    pub query: BsonDocument,
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub collection: String,
    pub query: BsonDocument,
    pub update: BsonDocument,
    pub multi: bool,
}

/// Builtin scripts the cursor compiles for aggregation helpers.
///
/// Carried next to the script text so clients without a script engine can
/// evaluate them natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinScript {
    Sum,
    Average,
    ItemFrequencies,
}

/// A server-side script call: code, positional args and the `{collection, query, options}` scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRequest {
    pub code: String,
    pub collection: String,
    pub query: BsonDocument,
    pub options: BsonDocument,
    pub args: Vec<Bson>,
    pub builtin: Option<BuiltinScript>,
}

impl ScriptRequest {
    #[must_use]
    pub fn scope(&self) -> BsonDocument {
        let mut scope = BsonDocument::new();
        scope.insert("collection", self.collection.clone());
        scope.insert("query", self.query.clone());
        scope.insert("options", self.options.clone());
        scope
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_name(op.name()), Some(op));
        }
        assert_eq!(Operator::from_name("ne"), None);
        assert_eq!(Operator::IStartsWith.to_string(), "istartswith");
    }

    #[test]
    fn sort_document_keeps_key_order() {
        let req = FindRequest {
            sort: vec![
                SortSpec { field: "y".into(), order: Order::Desc },
                SortSpec { field: "t".into(), order: Order::Asc },
            ],
            ..FindRequest::default()
        };
        assert_eq!(req.sort_document(), bson::doc! {"y": -1, "t": 1});
    }
}
