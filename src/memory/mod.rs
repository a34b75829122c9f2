//! In-process [`DatabaseClient`] over plain collections of BSON documents.
//!
//! Understands the query and update documents the query layer produces and
//! evaluates the builtin aggregation scripts natively. Arbitrary script code is
//! not supported.

pub mod eval;
pub mod exec;
pub mod filter;

use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::client::DatabaseClient;
use crate::errors::OdmError;
use crate::query::types::{
    CountRequest, DeleteReport, FindRequest, ScriptRequest, UpdateReport, UpdateRequest,
};
use crate::schema::ID_DB_FIELD;
use crate::utils::num::usize_to_u64;

use self::filter::parse_query;

/// Request counters, handy for asserting how many round trips a cursor made.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub finds: u64,
    pub counts: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub scripts: u64,
}

#[derive(Default)]
struct Counters {
    finds: AtomicU64,
    counts: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    scripts: AtomicU64,
}

#[derive(Default)]
pub struct MemoryClient {
    collections: RwLock<HashMap<String, Vec<BsonDocument>>>,
    counters: Counters,
}

impl MemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> ClientStats {
        let c = &self.counters;
        ClientStats {
            finds: c.finds.load(Ordering::Relaxed),
            counts: c.counts.load(Ordering::Relaxed),
            inserts: c.inserts.load(Ordering::Relaxed),
            updates: c.updates.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            scripts: c.scripts.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.counters;
        for n in [&c.finds, &c.counts, &c.inserts, &c.updates, &c.deletes, &c.scripts] {
            n.store(0, Ordering::Relaxed);
        }
    }

    /// Raw stored documents of `collection`, in insertion order.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<BsonDocument> {
        self.collections.read().get(collection).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drop_collection(&self, collection: &str) -> bool {
        self.collections.write().remove(collection).is_some()
    }
}

impl DatabaseClient for MemoryClient {
    fn find(&self, req: &FindRequest) -> Result<Vec<BsonDocument>, OdmError> {
        self.counters.finds.fetch_add(1, Ordering::Relaxed);
        let filter = parse_query(&req.query)?;
        let cols = self.collections.read();
        let docs = cols.get(&req.collection).map_or(&[][..], Vec::as_slice);
        let out =
            exec::select(docs, &filter, &req.sort, req.skip, req.limit, req.projection.as_deref());
        log::trace!("find {} {} -> {}", req.collection, req.query, out.len());
        Ok(out)
    }

    fn count(&self, req: &CountRequest) -> Result<u64, OdmError> {
        self.counters.counts.fetch_add(1, Ordering::Relaxed);
        let filter = parse_query(&req.query)?;
        let cols = self.collections.read();
        let docs = cols.get(&req.collection).map_or(&[][..], Vec::as_slice);
        let n = docs
            .iter()
            .filter(|d| eval::eval_filter(d, &filter))
            .skip(req.skip)
            .take(req.limit.unwrap_or(usize::MAX))
            .count();
        Ok(usize_to_u64(n))
    }

    fn insert(&self, collection: &str, mut doc: BsonDocument) -> Result<Bson, OdmError> {
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        let id = match doc.get(ID_DB_FIELD) {
            Some(id) if !matches!(id, Bson::Null) => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                doc.insert(ID_DB_FIELD, id.clone());
                id
            }
        };
        let mut cols = self.collections.write();
        let docs = cols.entry(collection.to_owned()).or_default();
        if docs.iter().any(|d| d.get(ID_DB_FIELD) == Some(&id)) {
            return Err(OdmError::Client(format!("duplicate {ID_DB_FIELD} {id} in {collection}")));
        }
        docs.push(doc);
        log::debug!("insert {collection} {id}");
        Ok(id)
    }

    fn update(&self, req: &UpdateRequest) -> Result<UpdateReport, OdmError> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        let filter = parse_query(&req.query)?;
        let mut cols = self.collections.write();
        let mut report = UpdateReport::default();
        let Some(docs) = cols.get_mut(&req.collection) else { return Ok(report) };
        for doc in docs.iter_mut().filter(|d| eval::eval_filter(d, &filter)) {
            let mut next = doc.clone();
            let changed = exec::apply_update(&mut next, &req.update)?;
            if next.get(ID_DB_FIELD) != doc.get(ID_DB_FIELD) {
                return Err(OdmError::Client(format!("update may not change {ID_DB_FIELD}")));
            }
            *doc = next;
            report.matched += 1;
            report.modified += u64::from(changed);
            if !req.multi {
                break;
            }
        }
        Ok(report)
    }

    fn delete(&self, collection: &str, query: &BsonDocument) -> Result<DeleteReport, OdmError> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let filter = parse_query(query)?;
        let mut cols = self.collections.write();
        let Some(docs) = cols.get_mut(collection) else { return Ok(DeleteReport::default()) };
        let before = docs.len();
        docs.retain(|d| !eval::eval_filter(d, &filter));
        Ok(DeleteReport { deleted: usize_to_u64(before - docs.len()) })
    }

    fn exec_js(&self, req: &ScriptRequest) -> Result<Bson, OdmError> {
        self.counters.scripts.fetch_add(1, Ordering::Relaxed);
        let Some(builtin) = req.builtin else {
            return Err(OdmError::ScriptUnsupported(format!(
                "memory client cannot run script code against {}",
                req.collection
            )));
        };
        let filter = parse_query(&req.query)?;
        let cols = self.collections.read();
        let docs = cols.get(&req.collection).map_or(&[][..], Vec::as_slice);
        exec::run_builtin(builtin, docs, &filter, &req.args)
    }
}
