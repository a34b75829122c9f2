//! Entry point tying a [`DatabaseClient`] to configuration and model cursors.

use bson::{Bson, Document as BsonDocument, doc};
use std::sync::Arc;

use crate::client::DatabaseClient;
use crate::config::OdmConfig;
use crate::errors::OdmError;
use crate::memory::MemoryClient;
use crate::model::{self, Model};
use crate::query::QuerySet;
use crate::query::types::UpdateRequest;
use crate::schema::ID_DB_FIELD;

#[derive(Clone)]
pub struct Database {
    client: Arc<dyn DatabaseClient>,
    config: OdmConfig,
}

impl Database {
    #[must_use]
    pub fn new(client: Arc<dyn DatabaseClient>) -> Self {
        Self::with_config(client, OdmConfig::default())
    }

    #[must_use]
    pub fn with_config(client: Arc<dyn DatabaseClient>, config: OdmConfig) -> Self {
        Self { client, config }
    }

    /// Database over a fresh [`MemoryClient`]; the client is returned too for inspection.
    #[must_use]
    pub fn in_memory(config: OdmConfig) -> (Self, Arc<MemoryClient>) {
        let client = Arc::new(MemoryClient::new());
        (Self::with_config(client.clone(), config), client)
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<dyn DatabaseClient> {
        &self.client
    }

    #[must_use]
    pub const fn config(&self) -> &OdmConfig {
        &self.config
    }

    /// Default query set of `M`, after the model's `customize_objects` hook.
    #[must_use]
    pub fn objects<M: Model>(&self) -> QuerySet<M> {
        M::customize_objects(QuerySet::new(Arc::clone(&self.client), &self.config))
    }

    /// Insert `model`, or overwrite the stored fields of the document with its `_id`.
    /// Returns the `_id`.
    ///
    /// Fields that are `None` on `model` are left untouched on an existing document.
    ///
    /// # Errors
    /// Encoding or client errors.
    pub fn save<M: Model>(&self, model: &M) -> Result<Bson, OdmError> {
        let schema = M::schema();
        let mut raw = model::encode(&schema, model)?;
        let collection = schema.collection().to_owned();
        if let Some(id) = raw.remove(ID_DB_FIELD) {
            let mut query = BsonDocument::new();
            query.insert(ID_DB_FIELD, id.clone());
            let report = self.client.update(&UpdateRequest {
                collection: collection.clone(),
                query,
                update: doc! {"$set": raw.clone()},
                multi: false,
            })?;
            if report.matched > 0 {
                log::debug!("{}: saved {id}", schema.name());
                return Ok(id);
            }
            raw.insert(ID_DB_FIELD, id);
        }
        let id = self.client.insert(&collection, raw)?;
        log::debug!("{}: inserted {id}", schema.name());
        Ok(id)
    }
}
