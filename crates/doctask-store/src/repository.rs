use crate::{
    models::{
        BulkWriteResult, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
        ReturnDocument, UpdateResult, WriteModel,
    },
    DocumentStore, Result,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Shared handle to one open database.
///
/// Cloning is cheap; every clone talks to the same connection. The handle
/// cannot close the connection, that stays with the `ConnectionManager`.
#[derive(Clone)]
pub struct Database {
    name: String,
    store: Arc<dyn DocumentStore>,
}

impl Database {
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            name: name.to_string(),
            store: Arc::clone(&self.store),
        }
    }

    pub async fn create_collection(&self, name: &str) -> Result<Collection> {
        self.store.create_collection(name).await?;
        tracing::debug!("Collection ready: {}.{}", self.name, name);
        Ok(self.collection(name))
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        self.store.list_collections().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("backend", &self.store.backend())
            .finish()
    }
}

#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<dyn DocumentStore>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find(&self, filter: Value, options: FindOptions) -> Result<Vec<Value>> {
        self.store.find(&self.name, filter, options).await
    }

    pub async fn find_one(&self, filter: Value) -> Result<Option<Value>> {
        self.store.find_one(&self.name, filter).await
    }

    pub async fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        self.store.insert_one(&self.name, document).await
    }

    pub async fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        self.store.insert_many(&self.name, documents).await
    }

    pub async fn update_many(&self, filter: Value, update: Value) -> Result<UpdateResult> {
        self.store.update_many(&self.name, filter, update).await
    }

    pub async fn find_one_and_update(
        &self,
        filter: Value,
        update: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>> {
        self.store
            .find_one_and_update(&self.name, filter, update, return_document)
            .await
    }

    pub async fn find_one_and_replace(
        &self,
        filter: Value,
        replacement: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>> {
        self.store
            .find_one_and_replace(&self.name, filter, replacement, return_document)
            .await
    }

    pub async fn delete_many(&self, filter: Value) -> Result<DeleteResult> {
        self.store.delete_many(&self.name, filter).await
    }

    pub async fn bulk_write(&self, operations: Vec<WriteModel>) -> Result<BulkWriteResult> {
        self.store.bulk_write(&self.name, operations).await
    }

    pub async fn aggregate(&self, pipeline: Vec<Value>) -> Result<Vec<Value>> {
        self.store.aggregate(&self.name, pipeline).await
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}
