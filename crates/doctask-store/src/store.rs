use crate::{
    models::{
        BulkWriteResult, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
        ReturnDocument, UpdateResult, WriteModel,
    },
    Result,
};
use async_trait::async_trait;
use serde_json::Value;

/// Collection-scoped document operations a backend must provide.
///
/// Filters, updates and pipeline stages use the MongoDB query language
/// expressed as JSON (`$set`, `$in`, `$unwind`, ...).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Create a collection; succeeds if it already exists
    async fn create_collection(&self, name: &str) -> Result<()>;

    async fn find(&self, collection: &str, filter: Value, options: FindOptions) -> Result<Vec<Value>>;

    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>>;

    async fn insert_one(&self, collection: &str, document: Value) -> Result<InsertOneResult>;

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertManyResult>;

    async fn update_many(&self, collection: &str, filter: Value, update: Value) -> Result<UpdateResult>;

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Value,
        update: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>>;

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Value,
        replacement: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>>;

    async fn delete_many(&self, collection: &str, filter: Value) -> Result<DeleteResult>;

    /// Apply the operations in order, stopping at the first failure
    async fn bulk_write(&self, collection: &str, operations: Vec<WriteModel>) -> Result<BulkWriteResult>;

    async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> Result<Vec<Value>>;
}
