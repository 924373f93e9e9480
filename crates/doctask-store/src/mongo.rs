use crate::{
    models::{
        BulkWriteResult, DeleteResult, FindOptions, InsertManyResult, InsertOneResult,
        ReturnDocument, UpdateResult, WriteModel,
    },
    ConnectionConfig, DocumentStore, Error, Result,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document},
    error::ErrorKind,
    options::{
        ClientOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions,
        FindOptions as DriverFindOptions, ReturnDocument as DriverReturnDocument,
    },
    Client,
};
use serde_json::Value;
use std::time::Duration;

/// `DocumentStore` backed by a MongoDB deployment through the official driver.
pub struct MongoStore {
    client: Client,
    database: mongodb::Database,
}

impl MongoStore {
    /// Build a client for `config.uri` and ping the server before handing it out.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|err| Error::Connection(format!("invalid connection string: {}", err)))?;
        options.app_name = config.app_name.clone();
        options.server_selection_timeout = Some(Duration::from_secs(config.connect_timeout_secs));

        let client = Client::with_options(options).map_err(|err| Error::Connection(err.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|err| Error::Connection(format!("ping failed: {}", err)))?;

        tracing::debug!("MongoDB reachable, using database {}", config.database);

        let database = client.database(&config.database);
        Ok(Self { client, database })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection(name)
    }
}

fn to_document(value: &Value) -> Result<Document> {
    match value {
        Value::Null => Ok(Document::new()),
        Value::Object(_) => Ok(bson::to_document(value)?),
        other => Err(Error::InvalidDocument(format!("expected a document, got {}", other))),
    }
}

fn to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn return_document(which: ReturnDocument) -> DriverReturnDocument {
    match which {
        ReturnDocument::Before => DriverReturnDocument::Before,
        ReturnDocument::After => DriverReturnDocument::After,
    }
}

/// Consecutive bulk models of one kind, sent to the server as one command.
#[derive(Debug, PartialEq)]
enum WriteRun {
    Insert(Vec<Document>),
    Update(Vec<Document>),
    Delete(Vec<Document>),
}

impl WriteRun {
    fn single(operation: WriteModel) -> Result<Self> {
        Ok(match operation {
            WriteModel::InsertOne { document } => WriteRun::Insert(vec![to_document(&document)?]),
            WriteModel::UpdateOne { filter, update } => {
                WriteRun::Update(vec![update_statement(&filter, &update, false)?])
            }
            WriteModel::UpdateMany { filter, update } => {
                WriteRun::Update(vec![update_statement(&filter, &update, true)?])
            }
            WriteModel::ReplaceOne { filter, replacement } => {
                WriteRun::Update(vec![update_statement(&filter, &replacement, false)?])
            }
            WriteModel::DeleteOne { filter } => WriteRun::Delete(vec![delete_statement(&filter, 1)?]),
            WriteModel::DeleteMany { filter } => WriteRun::Delete(vec![delete_statement(&filter, 0)?]),
        })
    }

    /// Append `next` when it is the same kind, otherwise hand it back.
    fn absorb(&mut self, next: WriteRun) -> Option<WriteRun> {
        match (self, next) {
            (WriteRun::Insert(docs), WriteRun::Insert(more))
            | (WriteRun::Update(docs), WriteRun::Update(more))
            | (WriteRun::Delete(docs), WriteRun::Delete(more)) => {
                docs.extend(more);
                None
            }
            (_, next) => Some(next),
        }
    }
}

fn update_statement(filter: &Value, update: &Value, multi: bool) -> Result<Document> {
    let q = to_document(filter)?;
    let u = to_document(update)?;
    Ok(doc! { "q": q, "u": u, "multi": multi })
}

fn delete_statement(filter: &Value, limit: i32) -> Result<Document> {
    let q = to_document(filter)?;
    Ok(doc! { "q": q, "limit": limit })
}

/// Split an ordered batch into runs, each tagged with the batch index of its first model.
fn group_writes(operations: Vec<WriteModel>) -> Result<Vec<(usize, WriteRun)>> {
    let mut runs: Vec<(usize, WriteRun)> = Vec::new();
    for (index, operation) in operations.into_iter().enumerate() {
        let single = WriteRun::single(operation).map_err(|err| Error::BulkWrite {
            index,
            source: Box::new(err),
        })?;
        let pending = match runs.last_mut() {
            Some((_, run)) => run.absorb(single),
            None => Some(single),
        };
        if let Some(run) = pending {
            runs.push((index, run));
        }
    }
    Ok(runs)
}

fn reply_count(reply: &Document, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or_default(),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or_default(),
        Some(Bson::Double(n)) if *n >= 0.0 => *n as u64,
        _ => 0,
    }
}

/// The first entry of a command reply's `writeErrors`, as a bulk failure.
fn reply_failure(start: usize, reply: &Document) -> Option<Error> {
    let first = reply.get_array("writeErrors").ok()?.first()?.as_document()?;
    let offset = reply_count(first, "index") as usize;
    let message = first.get_str("errmsg").unwrap_or("write error");
    let code = first.get_i32("code").unwrap_or_default();

    Some(Error::BulkWrite {
        index: start + offset,
        source: Box::new(Error::Other(anyhow::anyhow!("{} (code {})", message, code))),
    })
}

fn driver_failure(start: usize, err: mongodb::error::Error) -> Error {
    let offset = match err.kind.as_ref() {
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|error| error.index),
        _ => None,
    };

    Error::BulkWrite {
        index: start + offset.unwrap_or_default(),
        source: Box::new(Error::Mongo(err)),
    }
}

impl MongoStore {
    async fn submit(&self, collection: &str, start: usize, run: WriteRun, result: &mut BulkWriteResult) -> Result<()> {
        match run {
            WriteRun::Insert(documents) => {
                let inserted = self
                    .collection(collection)
                    .insert_many(documents, None)
                    .await
                    .map_err(|err| driver_failure(start, err))?;
                for (offset, id) in inserted.inserted_ids {
                    result.record_insert(start + offset, id.into_relaxed_extjson());
                }
            }
            WriteRun::Update(updates) => {
                let reply = self
                    .database
                    .run_command(doc! { "update": collection, "updates": updates, "ordered": true }, None)
                    .await
                    .map_err(|err| driver_failure(start, err))?;
                result.record_update(UpdateResult {
                    matched_count: reply_count(&reply, "n"),
                    modified_count: reply_count(&reply, "nModified"),
                });
                if let Some(err) = reply_failure(start, &reply) {
                    return Err(err);
                }
            }
            WriteRun::Delete(deletes) => {
                let reply = self
                    .database
                    .run_command(doc! { "delete": collection, "deletes": deletes, "ordered": true }, None)
                    .await
                    .map_err(|err| driver_failure(start, err))?;
                result.record_delete(DeleteResult {
                    deleted_count: reply_count(&reply, "n"),
                });
                if let Some(err) = reply_failure(start, &reply) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self.database.list_collection_names(None).await?;
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let existing = self
            .database
            .list_collection_names(doc! { "name": name })
            .await?;
        if existing.is_empty() {
            self.database.create_collection(name, None).await?;
        }
        Ok(())
    }

    async fn find(&self, collection: &str, filter: Value, options: FindOptions) -> Result<Vec<Value>> {
        let mut find_options = DriverFindOptions::default();
        find_options.projection = options.projection.as_ref().map(to_document).transpose()?;
        find_options.sort = options.sort.as_ref().map(to_document).transpose()?;
        find_options.skip = options.skip;
        find_options.limit = options.limit;

        let cursor = self
            .collection(collection)
            .find(to_document(&filter)?, find_options)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(to_json).collect())
    }

    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        let found = self
            .collection(collection)
            .find_one(to_document(&filter)?, None)
            .await?;
        Ok(found.map(to_json))
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<InsertOneResult> {
        let inserted = self
            .collection(collection)
            .insert_one(to_document(&document)?, None)
            .await?;
        Ok(InsertOneResult {
            inserted_id: inserted.inserted_id.into_relaxed_extjson(),
        })
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertManyResult> {
        let documents = documents
            .iter()
            .map(to_document)
            .collect::<Result<Vec<_>>>()?;
        let inserted = self.collection(collection).insert_many(documents, None).await?;

        let mut ids: Vec<(usize, Bson)> = inserted.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyResult {
            inserted_ids: ids.into_iter().map(|(_, id)| id.into_relaxed_extjson()).collect(),
        })
    }

    async fn update_many(&self, collection: &str, filter: Value, update: Value) -> Result<UpdateResult> {
        let updated = self
            .collection(collection)
            .update_many(to_document(&filter)?, to_document(&update)?, None)
            .await?;
        Ok(UpdateResult {
            matched_count: updated.matched_count,
            modified_count: updated.modified_count,
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Value,
        update: Value,
        which: ReturnDocument,
    ) -> Result<Option<Value>> {
        let mut find_options = FindOneAndUpdateOptions::default();
        find_options.return_document = Some(return_document(which));

        let found = self
            .collection(collection)
            .find_one_and_update(to_document(&filter)?, to_document(&update)?, find_options)
            .await?;
        Ok(found.map(to_json))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Value,
        replacement: Value,
        which: ReturnDocument,
    ) -> Result<Option<Value>> {
        let mut find_options = FindOneAndReplaceOptions::default();
        find_options.return_document = Some(return_document(which));

        let found = self
            .collection(collection)
            .find_one_and_replace(to_document(&filter)?, to_document(&replacement)?, find_options)
            .await?;
        Ok(found.map(to_json))
    }

    async fn delete_many(&self, collection: &str, filter: Value) -> Result<DeleteResult> {
        let deleted = self
            .collection(collection)
            .delete_many(to_document(&filter)?, None)
            .await?;
        Ok(DeleteResult {
            deleted_count: deleted.deleted_count,
        })
    }

    async fn bulk_write(&self, collection: &str, operations: Vec<WriteModel>) -> Result<BulkWriteResult> {
        let runs = group_writes(operations)?;
        tracing::debug!("Bulk write on {} as {} command(s)", collection, runs.len());

        let mut result = BulkWriteResult::default();
        for (start, run) in runs {
            self.submit(collection, start, run, &mut result).await?;
        }
        Ok(result)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> Result<Vec<Value>> {
        let stages = pipeline
            .iter()
            .map(to_document)
            .collect::<Result<Vec<_>>>()?;
        let cursor = self.collection(collection).aggregate(stages, None).await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_documents_convert_both_ways() {
        let value = json!({"name": "Ann", "tags": ["a"], "address": {"state": "CA"}});
        let document = to_document(&value).unwrap();
        assert_eq!(document.get_str("name").unwrap(), "Ann");
        assert_eq!(to_json(document), value);
    }

    #[test]
    fn test_null_filter_is_empty_document() {
        assert!(to_document(&Value::Null).unwrap().is_empty());
        assert!(matches!(to_document(&json!([1])), Err(Error::InvalidDocument(_))));
    }

    #[test]
    fn test_bulk_batch_groups_consecutive_kinds() {
        let operations = vec![
            WriteModel::InsertOne { document: json!({"type": "a"}) },
            WriteModel::InsertOne { document: json!({"type": "b"}) },
            WriteModel::UpdateMany {
                filter: json!({"type": "a"}),
                update: json!({"$set": {"tags": ["x"]}}),
            },
            WriteModel::ReplaceOne {
                filter: json!({"type": "b"}),
                replacement: json!({"type": "c"}),
            },
            WriteModel::DeleteOne { filter: json!({"type": "c"}) },
            WriteModel::InsertOne { document: json!({"type": "d"}) },
        ];

        let runs = group_writes(operations).unwrap();
        let starts: Vec<usize> = runs.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![0, 2, 4, 5]);

        assert_eq!(
            runs[1].1,
            WriteRun::Update(vec![
                doc! { "q": {"type": "a"}, "u": {"$set": {"tags": ["x"]}}, "multi": true },
                doc! { "q": {"type": "b"}, "u": {"type": "c"}, "multi": false },
            ])
        );
        assert_eq!(runs[2].1, WriteRun::Delete(vec![doc! { "q": {"type": "c"}, "limit": 1 }]));
    }

    #[test]
    fn test_bad_model_reports_its_batch_index() {
        let operations = vec![
            WriteModel::InsertOne { document: json!({"type": "a"}) },
            WriteModel::DeleteMany { filter: json!("not a filter") },
        ];

        let err = group_writes(operations).unwrap_err();
        assert!(matches!(err, Error::BulkWrite { index: 1, .. }));
    }

    #[test]
    fn test_write_errors_in_reply_offset_by_run_start() {
        let reply = doc! {
            "n": 1,
            "nModified": 1,
            "writeErrors": [{"index": 1, "code": 66, "errmsg": "immutable field '_id'"}],
            "ok": 1.0,
        };

        assert_eq!(reply_count(&reply, "nModified"), 1);
        let err = reply_failure(3, &reply).unwrap();
        assert!(matches!(err, Error::BulkWrite { index: 4, .. }));
        assert!(reply_failure(0, &doc! { "n": 2, "ok": 1.0 }).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = ConnectionConfig {
            uri: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".to_string(),
            connect_timeout_secs: 1,
            ..ConnectionConfig::default()
        };
        let err = MongoStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
