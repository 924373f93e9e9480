pub mod connection;
pub mod error;
pub mod memory;
pub mod models;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod repository;
pub mod store;

// Re-exports
pub use connection::{with_connection, Backend, ConnectionConfig, ConnectionManager};
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use models::{
    BulkWriteResult, DeleteResult, FindOptions, InsertManyResult, InsertOneResult, ReturnDocument,
    UpdateResult, WriteModel,
};
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
pub use repository::{Collection, Database};
pub use store::DocumentStore;
