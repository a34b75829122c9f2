//! The seam to the document database. Cursors issue every request through
//! [`DatabaseClient`]; timeouts, retries and transport belong to the implementor.

use bson::{Bson, Document as BsonDocument};

use crate::errors::OdmError;
use crate::query::types::{
    CountRequest, DeleteReport, FindRequest, ScriptRequest, UpdateReport, UpdateRequest,
};

/// Blocking request/response access to a document database.
///
/// Implementations are shared between cursors and threads.
pub trait DatabaseClient: Send + Sync {
    /// Return one page of raw documents (storage names) for `req`.
    fn find(&self, req: &FindRequest) -> Result<Vec<BsonDocument>, OdmError>;

    /// Number of documents matching `req.query`, honouring `skip`/`limit`.
    fn count(&self, req: &CountRequest) -> Result<u64, OdmError>;

    /// Persist `doc` and return its `_id`, assigning one if missing.
    fn insert(&self, collection: &str, doc: BsonDocument) -> Result<Bson, OdmError>;

    fn update(&self, req: &UpdateRequest) -> Result<UpdateReport, OdmError>;

    fn delete(&self, collection: &str, query: &BsonDocument) -> Result<DeleteReport, OdmError>;

    /// Run a server-side script with its scope and positional arguments.
    fn exec_js(&self, req: &ScriptRequest) -> Result<Bson, OdmError>;
}
