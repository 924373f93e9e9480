use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Option<Value>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which version of the document a find-and-modify call hands back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// One entry of an ordered bulk submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteModel {
    InsertOne { document: Value },
    UpdateOne { filter: Value, update: Value },
    UpdateMany { filter: Value, update: Value },
    ReplaceOne { filter: Value, replacement: Value },
    DeleteOne { filter: Value },
    DeleteMany { filter: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    /// Keyed by the position of the insert in the submitted batch
    pub inserted_ids: BTreeMap<usize, Value>,
}

impl BulkWriteResult {
    pub(crate) fn record_insert(&mut self, index: usize, id: Value) {
        self.inserted_count += 1;
        self.inserted_ids.insert(index, id);
    }

    pub(crate) fn record_update(&mut self, result: UpdateResult) {
        self.matched_count += result.matched_count;
        self.modified_count += result.modified_count;
    }

    pub(crate) fn record_delete(&mut self, result: DeleteResult) {
        self.deleted_count += result.deleted_count;
    }
}
