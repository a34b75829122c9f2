//! Lazy, re-iterable query sets.
//!
//! A [`QuerySet`] only holds configuration until it is iterated. Each pass
//! (the first one, and every pass after [`QuerySet::rewind`]) issues fresh
//! requests to the [`DatabaseClient`]; results are never cached across passes.
//!
//! Refining methods (`filter`, `only`, `order_by`, `slice`, ...) take `&self`
//! and return a new, unstarted query set. Calling them on a query set that is
//! mid-iteration leaves that iteration untouched. Iteration goes through
//! [`QuerySet::iter`] (or `for doc in &mut qs`), never through the query set
//! itself, so `count`, `skip` and `filter` always mean the server-side versions.

use bson::{Bson, Document as BsonDocument, doc};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use crate::client::DatabaseClient;
use crate::config::OdmConfig;
use crate::errors::OdmError;
use crate::model::{self, Model};
use crate::schema::{DocumentSchema, FieldKind, ID_DB_FIELD};
use crate::utils::logger::QUERY_TARGET;
use crate::utils::num::{u128_to_u64_saturating, usize_to_u64};

use super::path::{resolve, resolve_field_name};
use super::predicate::{Predicate, Q, compile_kwargs};
use super::script::{average_script, item_frequencies_script, sum_script, translate_fields};
use super::types::{
    BuiltinScript, CountRequest, DeleteReport, FindRequest, MAX_PROJECTION_FIELDS,
    MAX_SORT_FIELDS, Operator, Order, ScriptRequest, SortSpec, UpdateReport, UpdateRequest,
};
use super::update::compile_update;

/// Observable iteration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unstarted,
    Active,
    Exhausted,
}

enum Position {
    Unstarted,
    Active { buffer: VecDeque<BsonDocument>, fetched: usize, done: bool },
    Exhausted,
}

pub struct QuerySet<M: Model> {
    client: Arc<dyn DatabaseClient>,
    schema: Arc<DocumentSchema>,
    predicate: Predicate,
    projection: Option<Vec<String>>,
    ordering: Vec<SortSpec>,
    skip: usize,
    limit: Option<usize>,
    batch_size: usize,
    max_limit: usize,
    position: Position,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> QuerySet<M> {
    /// Unfiltered query set over `M`'s collection.
    #[must_use]
    pub fn new(client: Arc<dyn DatabaseClient>, config: &OdmConfig) -> Self {
        Self {
            client,
            schema: M::schema(),
            predicate: Predicate::all(),
            projection: None,
            ordering: Vec::new(),
            skip: 0,
            limit: None,
            batch_size: config.batch_size.max(1),
            max_limit: config.max_limit.max(1),
            position: Position::Unstarted,
            _model: PhantomData,
        }
    }

    /// Same configuration, fresh (unstarted) position.
    fn derive(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            schema: Arc::clone(&self.schema),
            predicate: self.predicate.clone(),
            projection: self.projection.clone(),
            ordering: self.ordering.clone(),
            skip: self.skip,
            limit: self.limit,
            batch_size: self.batch_size,
            max_limit: self.max_limit,
            position: Position::Unstarted,
            _model: PhantomData,
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<DocumentSchema> {
        &self.schema
    }

    #[must_use]
    pub const fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Compiled server query.
    #[must_use]
    pub fn query(&self) -> BsonDocument {
        self.predicate.to_query()
    }

    #[must_use]
    pub const fn state(&self) -> CursorState {
        match self.position {
            Position::Unstarted => CursorState::Unstarted,
            Position::Active { .. } => CursorState::Active,
            Position::Exhausted => CursorState::Exhausted,
        }
    }

    /// Re-arm: the next iteration issues new requests.
    pub fn rewind(&mut self) {
        self.position = Position::Unstarted;
    }

    /// Iterate from the current position, fetching pages on demand.
    pub fn iter(&mut self) -> Iter<'_, M> {
        Iter { qs: self }
    }

    #[must_use]
    pub fn all(&self) -> Self {
        self.derive()
    }

    /// AND keyword conditions onto the current predicate.
    ///
    /// # Errors
    /// `UnresolvedField` or `InvalidOperatorValue` from compilation.
    pub fn filter(&self, kwargs: BsonDocument) -> Result<Self, OdmError> {
        let extra = compile_kwargs(&self.schema, &kwargs)?;
        Ok(self.with_predicate(extra))
    }

    /// AND a composed predicate onto the current one.
    ///
    /// # Errors
    /// `UnresolvedField` or `InvalidOperatorValue` from compilation.
    pub fn filter_q(&self, q: &Q) -> Result<Self, OdmError> {
        let extra = q.compile(&self.schema)?;
        Ok(self.with_predicate(extra))
    }

    fn with_predicate(&self, extra: Predicate) -> Self {
        let mut next = self.derive();
        next.predicate = self.predicate.clone().and(extra);
        next
    }

    /// Fetch only `fields` (plus `_id`); others decode to their default or `None`.
    ///
    /// # Errors
    /// `UnresolvedField` for undeclared fields, `InvalidOperatorValue` past the
    /// projection limit.
    pub fn only(&self, fields: &[&str]) -> Result<Self, OdmError> {
        if fields.len() > MAX_PROJECTION_FIELDS {
            return Err(OdmError::invalid_value(
                "only",
                format!("at most {MAX_PROJECTION_FIELDS} fields, got {}", fields.len()),
            ));
        }
        let mut projection = Vec::with_capacity(fields.len() + 1);
        if !self.schema.is_embedded() {
            projection.push(ID_DB_FIELD.to_owned());
        }
        for f in fields {
            let key = resolve_field_name(&self.schema, f)?.storage_key();
            if !projection.contains(&key) {
                projection.push(key);
            }
        }
        let mut next = self.derive();
        next.projection = Some(projection);
        Ok(next)
    }

    /// Replace the ordering. A leading `-` sorts descending, `+` or nothing ascending.
    ///
    /// # Errors
    /// `UnresolvedField` for undeclared fields, `InvalidOperatorValue` past the
    /// sort limit.
    pub fn order_by(&self, fields: &[&str]) -> Result<Self, OdmError> {
        if fields.len() > MAX_SORT_FIELDS {
            return Err(OdmError::invalid_value(
                "order_by",
                format!("at most {MAX_SORT_FIELDS} fields, got {}", fields.len()),
            ));
        }
        let mut ordering = Vec::with_capacity(fields.len());
        for f in fields {
            let (name, order) = match f.strip_prefix('-') {
                Some(rest) => (rest, Order::Desc),
                None => (f.strip_prefix('+').unwrap_or(f), Order::Asc),
            };
            let field = resolve_field_name(&self.schema, name)?.storage_key();
            ordering.push(SortSpec { field, order });
        }
        let mut next = self.derive();
        next.ordering = ordering;
        Ok(next)
    }

    /// Restrict to `range` of the current result window.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        let len = range.end.saturating_sub(range.start);
        let mut next = self.derive();
        next.skip = self.skip.saturating_add(range.start);
        next.limit = Some(match self.limit {
            Some(l) => len.min(l.saturating_sub(range.start)),
            None => len,
        });
        next
    }

    /// Drop the first `n` results of the current window.
    #[must_use]
    pub fn skip(&self, n: usize) -> Self {
        let mut next = self.derive();
        next.skip = self.skip.saturating_add(n);
        next.limit = self.limit.map(|l| l.saturating_sub(n));
        next
    }

    #[must_use]
    pub fn limit(&self, n: usize) -> Self {
        self.slice(0..n)
    }

    /// Documents requested per page while iterating.
    #[must_use]
    pub fn batch_size(&self, n: usize) -> Self {
        let mut next = self.derive();
        next.batch_size = n.clamp(1, self.max_limit);
        next
    }

    fn collection(&self) -> &str {
        self.schema.collection()
    }

    fn fetch(&self, skip: usize, limit: Option<usize>) -> Result<Vec<BsonDocument>, OdmError> {
        self.fetch_exact(skip, limit.unwrap_or(self.max_limit).min(self.max_limit))
    }

    /// Page request without the `max_limit` clamp.
    fn fetch_exact(&self, skip: usize, limit: usize) -> Result<Vec<BsonDocument>, OdmError> {
        let req = FindRequest {
            collection: self.collection().to_owned(),
            query: self.query(),
            projection: self.projection.clone(),
            sort: self.ordering.clone(),
            skip,
            limit: Some(limit),
        };
        let start = Instant::now();
        let docs = self.client.find(&req)?;
        crate::dev6!(
            "{}",
            serde_json::json!({
                "bench": "query",
                "op": "find",
                "collection": req.collection,
                "duration_ms": u128_to_u64_saturating(start.elapsed().as_millis()),
                "result_count": usize_to_u64(docs.len()),
                "skip": usize_to_u64(skip),
                "limit": req.limit.map(usize_to_u64),
            })
        );
        Ok(docs)
    }

    fn decode(&self, raw: &BsonDocument) -> Result<M, OdmError> {
        model::decode(&self.schema, raw)
    }

    fn next_raw(&mut self) -> Result<Option<BsonDocument>, OdmError> {
        loop {
            let fetched = match &mut self.position {
                Position::Exhausted => return Ok(None),
                Position::Unstarted => {
                    log::debug!(
                        target: QUERY_TARGET,
                        "{}: iterating {} (skip {}, limit {:?})",
                        self.schema.name(),
                        self.predicate.to_query(),
                        self.skip,
                        self.limit
                    );
                    self.position =
                        Position::Active { buffer: VecDeque::new(), fetched: 0, done: false };
                    continue;
                }
                Position::Active { buffer, fetched, done } => {
                    if let Some(raw) = buffer.pop_front() {
                        return Ok(Some(raw));
                    }
                    if *done {
                        self.position = Position::Exhausted;
                        return Ok(None);
                    }
                    *fetched
                }
            };
            let remaining = self.limit.map(|l| l.saturating_sub(fetched));
            if remaining == Some(0) {
                self.position = Position::Exhausted;
                return Ok(None);
            }
            let page = remaining.map_or(self.batch_size, |r| r.min(self.batch_size));
            let docs = self.fetch(self.skip.saturating_add(fetched), Some(page))?;
            let got = docs.len();
            if let Position::Active { buffer, fetched, done } = &mut self.position {
                *fetched += got;
                *done = got < page.min(self.max_limit);
                buffer.extend(docs);
            }
        }
    }

    /// All results of a fresh pass.
    ///
    /// # Errors
    /// Client or decode errors.
    pub fn to_vec(&self) -> Result<Vec<M>, OdmError> {
        let mut pass = self.derive();
        pass.iter().collect()
    }

    /// Result at `index` within the current window.
    ///
    /// # Errors
    /// `IndexOutOfRange` when there is no such result.
    pub fn at(&self, index: usize) -> Result<M, OdmError> {
        if self.limit.is_some_and(|l| index >= l) {
            return Err(OdmError::IndexOutOfRange { index });
        }
        let docs = self.fetch(self.skip.saturating_add(index), Some(1))?;
        match docs.first() {
            Some(raw) => self.decode(raw),
            None => Err(OdmError::IndexOutOfRange { index }),
        }
    }

    /// First result, or `None` when nothing matches.
    ///
    /// # Errors
    /// Client or decode errors.
    pub fn first(&self) -> Result<Option<M>, OdmError> {
        match self.at(0) {
            Ok(m) => Ok(Some(m)),
            Err(OdmError::IndexOutOfRange { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The single document matching `kwargs` on top of the current predicate.
    ///
    /// # Errors
    /// `DoesNotExist` on no match, `MultipleResults` on more than one.
    pub fn get(&self, kwargs: BsonDocument) -> Result<M, OdmError> {
        let qs = self.filter(kwargs)?;
        // Two documents are enough to tell one match from many, whatever `max_limit` is.
        let limit = qs.limit.map_or(2, |l| l.min(2));
        let docs = qs.fetch_exact(qs.skip, limit)?;
        match docs.as_slice() {
            [] => Err(OdmError::DoesNotExist { document: self.schema.name().to_owned() }),
            [raw] => self.decode(raw),
            _ => Err(OdmError::MultipleResults { document: self.schema.name().to_owned() }),
        }
    }

    /// [`Self::get`], or create the document when it does not exist.
    ///
    /// The new document is seeded from `defaults` (logical names) overlaid with
    /// `kwargs`, so that it matches `kwargs` afterwards. Embedded paths seed nested
    /// documents and a single value for a list field seeds a one-item list.
    /// Returns the document and whether it was created. The lookup and the insert
    /// are separate requests, so concurrent callers can both create.
    ///
    /// # Errors
    /// `InvalidOperatorValue` for keys other than plain equality, or paths through
    /// lists of embedded documents. `MultipleResults` is propagated, as are client
    /// and decode errors.
    pub fn get_or_create(
        &self,
        kwargs: BsonDocument,
        defaults: BsonDocument,
    ) -> Result<(M, bool), OdmError> {
        match self.get(kwargs.clone()) {
            Ok(found) => return Ok((found, false)),
            Err(OdmError::DoesNotExist { .. }) => {}
            Err(e) => return Err(e),
        }
        let mut seed = defaults;
        for (key, value) in &kwargs {
            seed_value(&self.schema, &mut seed, key, value)?;
        }
        self.schema.fill_defaults(&mut seed);
        let created: M = bson::deserialize_from_document(seed)?;
        let mut raw = model::encode(&self.schema, &created)?;
        let id = self.client.insert(self.collection(), raw.clone())?;
        log::info!(target: QUERY_TARGET, "{}: created {id} in get_or_create", self.schema.name());
        raw.insert(ID_DB_FIELD, id);
        Ok((self.decode(&raw)?, true))
    }

    /// Server-side count of the current window.
    ///
    /// # Errors
    /// Client errors.
    pub fn count(&self) -> Result<u64, OdmError> {
        let req = CountRequest {
            collection: self.collection().to_owned(),
            query: self.query(),
            skip: self.skip,
            limit: self.limit,
        };
        let start = Instant::now();
        let n = self.client.count(&req)?;
        crate::dev6!(
            "{}",
            serde_json::json!({
                "bench": "query",
                "op": "count",
                "collection": req.collection,
                "duration_ms": u128_to_u64_saturating(start.elapsed().as_millis()),
                "result_count": n,
            })
        );
        Ok(n)
    }

    /// Alias of [`Self::count`].
    ///
    /// # Errors
    /// Client errors.
    pub fn len(&self) -> Result<u64, OdmError> {
        self.count()
    }

    /// # Errors
    /// Client errors.
    pub fn is_empty(&self) -> Result<bool, OdmError> {
        if self.limit == Some(0) {
            return Ok(true);
        }
        Ok(self.fetch(self.skip, Some(1))?.is_empty())
    }

    /// Document with the given primary key, within the current predicate.
    ///
    /// # Errors
    /// Client or decode errors.
    pub fn with_id(&self, id: impl Into<Bson>) -> Result<Option<M>, OdmError> {
        self.filter(doc! {"id": id.into()})?.first()
    }

    /// Apply update keywords to every matching document.
    ///
    /// # Errors
    /// Compilation or client errors.
    pub fn update(&self, kwargs: &BsonDocument) -> Result<UpdateReport, OdmError> {
        self.run_update(kwargs, true)
    }

    /// Apply update keywords to the first matching document.
    ///
    /// # Errors
    /// Compilation or client errors.
    pub fn update_one(&self, kwargs: &BsonDocument) -> Result<UpdateReport, OdmError> {
        self.run_update(kwargs, false)
    }

    fn run_update(&self, kwargs: &BsonDocument, multi: bool) -> Result<UpdateReport, OdmError> {
        let req = UpdateRequest {
            collection: self.collection().to_owned(),
            query: self.query(),
            update: compile_update(&self.schema, kwargs)?,
            multi,
        };
        let report = self.client.update(&req)?;
        crate::dev6!(
            "{}",
            serde_json::json!({
                "bench": "query",
                "op": if multi { "update_many" } else { "update_one" },
                "collection": req.collection,
                "matched": report.matched,
                "modified": report.modified,
            })
        );
        Ok(report)
    }

    /// Delete every matching document.
    ///
    /// # Errors
    /// Client errors.
    pub fn delete(&self) -> Result<DeleteReport, OdmError> {
        let report = self.client.delete(self.collection(), &self.query())?;
        crate::dev6!(
            "{}",
            serde_json::json!({
                "bench": "query",
                "op": "delete_many",
                "collection": self.collection(),
                "deleted": report.deleted,
            })
        );
        Ok(report)
    }

    /// Run caller-supplied script `code` against this query.
    ///
    /// Marked field paths in `code` (`[~field]`, `{{~field}}`) and every entry of
    /// `field_args` are translated to storage names first. The script sees
    /// `collection`, `query` and `options` in scope.
    ///
    /// # Errors
    /// `UnresolvedField` for undeclared fields, client errors otherwise.
    pub fn exec_js(
        &self,
        code: &str,
        field_args: &[&str],
        options: BsonDocument,
    ) -> Result<Bson, OdmError> {
        let code = translate_fields(&self.schema, code)?;
        let args = field_args
            .iter()
            .map(|f| resolve_field_name(&self.schema, f).map(|p| Bson::String(p.storage_key())))
            .collect::<Result<Vec<_>, _>>()?;
        self.call_script(ScriptRequest {
            code,
            collection: self.collection().to_owned(),
            query: self.query(),
            options,
            args,
            builtin: None,
        })
    }

    fn run_builtin(&self, builtin: BuiltinScript, code: String, field: &str) -> Result<Bson, OdmError> {
        let path = resolve_field_name(&self.schema, field)?;
        self.call_script(ScriptRequest {
            code,
            collection: self.collection().to_owned(),
            query: self.query(),
            options: BsonDocument::new(),
            args: vec![Bson::String(path.storage_key())],
            builtin: Some(builtin),
        })
    }

    fn call_script(&self, req: ScriptRequest) -> Result<Bson, OdmError> {
        let start = Instant::now();
        let out = self.client.exec_js(&req)?;
        crate::dev6!(
            "{}",
            serde_json::json!({
                "bench": "query",
                "op": "exec_js",
                "collection": req.collection,
                "builtin": req.builtin,
                "duration_ms": u128_to_u64_saturating(start.elapsed().as_millis()),
            })
        );
        Ok(out)
    }

    /// Sum of `field` over matching documents; documents without it are ignored.
    ///
    /// # Errors
    /// `UnresolvedField`, client errors, or `UnexpectedResult` for a non-numeric reply.
    pub fn sum(&self, field: &str) -> Result<f64, OdmError> {
        let out = self.run_builtin(BuiltinScript::Sum, sum_script(), field)?;
        as_number(&out, "sum")
    }

    /// Mean of `field` over the documents that carry it; `None` when none do.
    ///
    /// # Errors
    /// `UnresolvedField`, client errors, or `UnexpectedResult` for a malformed reply.
    pub fn average(&self, field: &str) -> Result<Option<f64>, OdmError> {
        let out = self.run_builtin(BuiltinScript::Average, average_script(), field)?;
        let Bson::Document(d) = out else {
            return Err(OdmError::UnexpectedResult(format!("average: {out}")));
        };
        let missing = || OdmError::UnexpectedResult(format!("average: {d}"));
        let total = as_number(d.get("total").ok_or_else(missing)?, "average")?;
        let count = as_number(d.get("count").ok_or_else(missing)?, "average")?;
        Ok((count > 0.0).then(|| total / count))
    }

    /// Occurrences of each distinct item of `field` (list items, or the value
    /// itself for scalars). With `normalize`, counts become fractions of the total.
    ///
    /// # Errors
    /// `UnresolvedField`, client errors, or `UnexpectedResult` for a malformed reply.
    pub fn item_frequencies(
        &self,
        field: &str,
        normalize: bool,
    ) -> Result<BTreeMap<String, f64>, OdmError> {
        let out = self.run_builtin(BuiltinScript::ItemFrequencies, item_frequencies_script(), field)?;
        let Bson::Document(d) = out else {
            return Err(OdmError::UnexpectedResult(format!("item_frequencies: {out}")));
        };
        let mut freqs = BTreeMap::new();
        for (k, v) in &d {
            freqs.insert(k.clone(), as_number(v, "item_frequencies")?);
        }
        if normalize {
            let total: f64 = freqs.values().sum();
            if total > 0.0 {
                for v in freqs.values_mut() {
                    *v /= total;
                }
            }
        }
        Ok(freqs)
    }
}

/// Write the equality `key = value` into `seed` (logical names) so that the
/// stored document satisfies it.
fn seed_value(
    schema: &Arc<DocumentSchema>,
    seed: &mut BsonDocument,
    key: &str,
    value: &Bson,
) -> Result<(), OdmError> {
    let (path, op) = resolve(schema, key)?;
    if op != Operator::Eq {
        return Err(OdmError::invalid_value(
            op.name(),
            format!("get_or_create cannot seed {key} from a {op} condition"),
        ));
    }
    let Some((last, parents)) = path.logical().split_last() else {
        return Err(OdmError::invalid_value("eq", format!("empty path {key}")));
    };
    let mut target = seed;
    let mut current = Arc::clone(schema);
    for name in parents {
        let kind = current.field(name).map(|f| f.kind.clone());
        let Some(FieldKind::Embedded(inner)) = kind else {
            return Err(OdmError::invalid_value(
                "eq",
                format!("get_or_create cannot seed {key} through list field {name}"),
            ));
        };
        if !matches!(target.get(name), Some(Bson::Document(_))) {
            target.insert(name.clone(), BsonDocument::new());
        }
        target = match target.get_mut(name) {
            Some(Bson::Document(d)) => d,
            _ => return Err(OdmError::invalid_value("eq", format!("cannot seed {key}"))),
        };
        current = inner;
    }
    let seeded = if path.is_list() && !matches!(value, Bson::Array(_)) {
        Bson::Array(vec![value.clone()])
    } else {
        value.clone()
    };
    target.insert(last.clone(), seeded);
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn as_number(v: &Bson, what: &str) -> Result<f64, OdmError> {
    match v {
        Bson::Double(f) => Ok(*f),
        Bson::Int32(i) => Ok(f64::from(*i)),
        Bson::Int64(i) => Ok(*i as f64),
        other => Err(OdmError::UnexpectedResult(format!("{what}: {other}"))),
    }
}

impl<M: Model> Clone for QuerySet<M> {
    /// Copies the configuration; the clone starts unstarted.
    fn clone(&self) -> Self {
        self.derive()
    }
}

impl<M: Model> fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("document", &self.schema.name())
            .field("query", &self.query())
            .field("projection", &self.projection)
            .field("ordering", &self.ordering)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Borrowing iterator over one pass of a [`QuerySet`].
///
/// Dropping it mid-pass keeps the query set's position, so a later
/// [`QuerySet::iter`] resumes where this one stopped.
pub struct Iter<'a, M: Model> {
    qs: &'a mut QuerySet<M>,
}

impl<M: Model> Iterator for Iter<'_, M> {
    type Item = Result<M, OdmError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.qs.next_raw() {
            Ok(Some(raw)) => Some(self.qs.decode(&raw)),
            Ok(None) => None,
            Err(e) => {
                self.qs.position = Position::Exhausted;
                Some(Err(e))
            }
        }
    }
}

impl<'a, M: Model> IntoIterator for &'a mut QuerySet<M> {
    type Item = Result<M, OdmError>;
    type IntoIter = Iter<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
