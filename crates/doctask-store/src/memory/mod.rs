//! In-process document engine.
//!
//! Implements the subset of the MongoDB query language the task catalog
//! uses, so runs and tests work without a server.

mod document;
mod filter;
mod pipeline;
mod update;

use crate::{
    models::{
        BulkWriteResult, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
        ReturnDocument, UpdateResult, WriteModel,
    },
    DocumentStore, Error, Result,
};
use async_trait::async_trait;
use document::values_equal;
use filter::matches;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, collection: &str) -> Vec<Value> {
        let collections = self.collections.read().await;
        collections.get(collection).cloned().unwrap_or_default()
    }
}

/// Indexes of matching documents; only the first when `multi` is false.
fn positions(docs: &[Value], filter: &Value, multi: bool) -> Result<Vec<usize>> {
    let mut found = Vec::new();
    for (index, doc) in docs.iter().enumerate() {
        if matches(doc, filter)? {
            found.push(index);
            if !multi {
                break;
            }
        }
    }
    Ok(found)
}

fn insert(docs: &mut Vec<Value>, mut document: Value) -> Result<Value> {
    if !document.is_object() {
        return Err(Error::InvalidDocument(format!(
            "document must be an object, got {}",
            document
        )));
    }

    let id = match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Value::String(Uuid::new_v4().simple().to_string());
            if let Some(fields) = document.as_object_mut() {
                fields.insert("_id".to_string(), id.clone());
            }
            id
        }
    };

    let taken = docs
        .iter()
        .filter_map(|doc| doc.get("_id"))
        .any(|existing| values_equal(existing, &id));
    if taken {
        return Err(Error::InvalidDocument(format!("duplicate key: _id {}", id)));
    }

    docs.push(document);
    Ok(id)
}

/// Apply `update` to every match, committing only when all of them succeed.
fn update_matching(docs: &mut [Value], filter: &Value, update: &Value, multi: bool) -> Result<UpdateResult> {
    let matched = positions(docs, filter, multi)?;

    let mut staged = Vec::with_capacity(matched.len());
    for &index in &matched {
        let mut next = docs[index].clone();
        if update::apply(&mut next, update)? {
            staged.push((index, next));
        }
    }

    let result = UpdateResult {
        matched_count: matched.len() as u64,
        modified_count: staged.len() as u64,
    };
    for (index, next) in staged {
        docs[index] = next;
    }
    Ok(result)
}

/// Build the document that replaces `original`, keeping its `_id`.
fn replacement_for(original: &Value, replacement: &Value) -> Result<Value> {
    let fields = update::validate_replacement(replacement)?;
    let original_id = original.get("_id").cloned().unwrap_or(Value::Null);

    if let Some(id) = fields.get("_id") {
        if !values_equal(id, &original_id) {
            return Err(Error::InvalidDocument(
                "replacement cannot change the _id field".to_string(),
            ));
        }
    }

    let mut next = fields.clone();
    next.insert("_id".to_string(), original_id);
    Ok(Value::Object(next))
}

fn replace_one(docs: &mut [Value], filter: &Value, replacement: &Value) -> Result<UpdateResult> {
    update::validate_replacement(replacement)?;

    let Some(&index) = positions(docs, filter, false)?.first() else {
        return Ok(UpdateResult::default());
    };
    let next = replacement_for(&docs[index], replacement)?;
    let modified = next != docs[index];
    docs[index] = next;

    Ok(UpdateResult {
        matched_count: 1,
        modified_count: modified as u64,
    })
}

fn delete(docs: &mut Vec<Value>, filter: &Value, multi: bool) -> Result<DeleteResult> {
    let doomed = positions(docs, filter, multi)?;
    let mut index = 0;
    docs.retain(|_| {
        let keep = !doomed.contains(&index);
        index += 1;
        keep
    });

    Ok(DeleteResult {
        deleted_count: doomed.len() as u64,
    })
}

fn apply_write(
    docs: &mut Vec<Value>,
    index: usize,
    operation: WriteModel,
    result: &mut BulkWriteResult,
) -> Result<()> {
    match operation {
        WriteModel::InsertOne { document } => {
            let id = insert(docs, document)?;
            result.record_insert(index, id);
        }
        WriteModel::UpdateOne { filter, update: change } => {
            result.record_update(update_matching(docs, &filter, &change, false)?);
        }
        WriteModel::UpdateMany { filter, update: change } => {
            result.record_update(update_matching(docs, &filter, &change, true)?);
        }
        WriteModel::ReplaceOne { filter, replacement } => {
            result.record_update(replace_one(docs, &filter, &replacement)?);
        }
        WriteModel::DeleteOne { filter } => result.record_delete(delete(docs, &filter, false)?),
        WriteModel::DeleteMany { filter } => result.record_delete(delete(docs, &filter, true)?),
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('$') {
            return Err(Error::InvalidDocument(format!("invalid collection name: '{}'", name)));
        }

        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn find(&self, collection: &str, filter: Value, options: FindOptions) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        for doc in self.snapshot(collection).await {
            if matches(&doc, &filter)? {
                docs.push(doc);
            }
        }

        if let Some(sort) = &options.sort {
            docs = pipeline::sort(docs, sort).map_err(Error::InvalidOptions)?;
        }
        if let Some(skip) = options.skip {
            docs = docs.into_iter().skip(skip as usize).collect();
        }
        // MongoDB treats a negative limit like its absolute value and 0 as none
        if let Some(limit) = options.limit.filter(|limit| *limit != 0) {
            docs.truncate(limit.unsigned_abs() as usize);
        }
        if let Some(projection) = &options.projection {
            docs = docs
                .iter()
                .map(|doc| pipeline::project(doc, projection).map_err(Error::InvalidOptions))
                .collect::<Result<Vec<_>>>()?;
        }

        tracing::debug!("find on {} returned {} documents", collection, docs.len());
        Ok(docs)
    }

    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(None);
        };

        for doc in docs {
            if matches(doc, &filter)? {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<InsertOneResult> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let inserted_id = insert(docs, document)?;
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertManyResult> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let mut inserted_ids = Vec::with_capacity(documents.len());
        for document in documents {
            inserted_ids.push(insert(docs, document)?);
        }
        Ok(InsertManyResult { inserted_ids })
    }

    async fn update_many(&self, collection: &str, filter: Value, change: Value) -> Result<UpdateResult> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let result = update_matching(docs, &filter, &change, true)?;
        tracing::debug!(
            "update_many on {}: matched {}, modified {}",
            collection,
            result.matched_count,
            result.modified_count
        );
        Ok(result)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Value,
        change: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(&index) = positions(docs, &filter, false)?.first() else {
            return Ok(None);
        };

        let mut next = docs[index].clone();
        update::apply(&mut next, &change)?;
        let before = std::mem::replace(&mut docs[index], next);

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => docs[index].clone(),
        }))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Value,
        replacement: Value,
        return_document: ReturnDocument,
    ) -> Result<Option<Value>> {
        update::validate_replacement(&replacement)?;

        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(&index) = positions(docs, &filter, false)?.first() else {
            return Ok(None);
        };

        let next = replacement_for(&docs[index], &replacement)?;
        let before = std::mem::replace(&mut docs[index], next);

        Ok(Some(match return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => docs[index].clone(),
        }))
    }

    async fn delete_many(&self, collection: &str, filter: Value) -> Result<DeleteResult> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        delete(docs, &filter, true)
    }

    async fn bulk_write(&self, collection: &str, operations: Vec<WriteModel>) -> Result<BulkWriteResult> {
        let total = operations.len();
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let mut result = BulkWriteResult::default();
        for (index, operation) in operations.into_iter().enumerate() {
            apply_write(docs, index, operation, &mut result).map_err(|err| {
                tracing::warn!("bulk write on {} stopped at {}/{}: {}", collection, index, total, err);
                Error::BulkWrite {
                    index,
                    source: Box::new(err),
                }
            })?;
        }

        Ok(result)
    }

    async fn aggregate(&self, collection: &str, stages: Vec<Value>) -> Result<Vec<Value>> {
        let docs = self.snapshot(collection).await;
        pipeline::run(docs, &stages)
    }
}
