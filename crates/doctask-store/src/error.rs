use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid find options: {0}")]
    InvalidOptions(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Bulk write failed at operation {index}: {source}")]
    BulkWrite { index: usize, source: Box<Error> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON conversion error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
