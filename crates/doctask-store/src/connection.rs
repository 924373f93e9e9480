use crate::{Database, Error, MemoryStore, Result};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Mongodb,
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Mongodb => write!(f, "mongodb"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(Backend::Mongodb),
            "memory" => Ok(Backend::Memory),
            other => Err(Error::InvalidConfig(format!("unknown backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub backend: Backend,
    pub uri: String,
    pub database: String,
    pub app_name: Option<String>,
    /// Server selection timeout for the mongodb backend
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Mongodb,
            uri: "mongodb://localhost:27017".to_string(),
            database: "doctask".to_string(),
            app_name: Some("doctask".to_string()),
            connect_timeout_secs: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn memory(database: impl Into<String>) -> Self {
        Self {
            backend: Backend::Memory,
            database: database.into(),
            ..Self::default()
        }
    }
}

struct Connection {
    database: Database,
    #[cfg(feature = "mongodb")]
    client: Option<mongodb::Client>,
}

/// Owns the single connection of a run.
///
/// Tasks only ever see cloned [`Database`] handles; opening and closing
/// stay here so the connection is released exactly once.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection: Option<Connection>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the connection, or hand out the existing one if already open.
    pub async fn open(&mut self) -> Result<Database> {
        if let Some(connection) = &self.connection {
            return Ok(connection.database.clone());
        }

        let connection = match self.config.backend {
            Backend::Memory => Connection {
                database: Database::new(&self.config.database, Arc::new(MemoryStore::new())),
                #[cfg(feature = "mongodb")]
                client: None,
            },
            #[cfg(feature = "mongodb")]
            Backend::Mongodb => {
                let store = crate::MongoStore::connect(&self.config).await?;
                let client = store.client();
                Connection {
                    database: Database::new(&self.config.database, Arc::new(store)),
                    client: Some(client),
                }
            }
            #[cfg(not(feature = "mongodb"))]
            Backend::Mongodb => {
                return Err(Error::InvalidConfig(
                    "this build does not include the mongodb backend".to_string(),
                ))
            }
        };

        tracing::info!(
            "Connected to {} database '{}'",
            self.config.backend,
            self.config.database
        );

        let database = connection.database.clone();
        self.connection = Some(connection);
        Ok(database)
    }

    /// Release the connection. Safe to call any number of times.
    pub async fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        #[cfg(feature = "mongodb")]
        if let Some(client) = connection.client {
            client.shutdown().await;
        }

        tracing::info!("Closed connection to database '{}'", connection.database.name());
    }

    /// Open the connection, run `f` with it and close it again, whether `f`
    /// succeeds, fails or panics. A panic is re-raised after the close.
    pub async fn scoped<F, Fut, T, E>(&mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let database = self.open().await?;

        let outcome = AssertUnwindSafe(f(database)).catch_unwind().await;
        self.close().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.connection.is_some() {
            tracing::warn!(
                "Connection to '{}' dropped without close",
                self.config.database
            );
        }
    }
}

/// [`ConnectionManager::scoped`] on a fresh manager for `config`.
pub async fn with_connection<F, Fut, T, E>(config: ConnectionConfig, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    let mut manager = ConnectionManager::new(config);
    manager.scoped(f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert_eq!("MongoDB".parse::<Backend>().unwrap(), Backend::Mongodb);
        assert!(matches!("postgres".parse::<Backend>(), Err(Error::InvalidConfig(_))));
        assert_eq!(Backend::Memory.to_string(), "memory");
    }

    #[tokio::test]
    async fn test_open_twice_returns_same_connection() {
        let mut manager = ConnectionManager::new(ConnectionConfig::memory("test"));
        let first = manager.open().await.unwrap();
        let second = manager.open().await.unwrap();

        first.collection("users").insert_one(json!({"name": "Ann"})).await.unwrap();
        let found = second.collection("users").find_one(json!({"name": "Ann"})).await.unwrap();
        assert!(found.is_some());

        manager.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut manager = ConnectionManager::new(ConnectionConfig::memory("test"));
        manager.open().await.unwrap();
        assert!(manager.is_open());

        manager.close().await;
        manager.close().await;
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn test_close_after_failed_open() {
        let config = ConnectionConfig {
            uri: "not a connection string".to_string(),
            ..ConnectionConfig::default()
        };
        let mut manager = ConnectionManager::new(config);

        let err = manager.open().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(!manager.is_open());
        manager.close().await;
    }

    #[tokio::test]
    async fn test_with_connection_returns_closure_result() {
        let count = with_connection(ConnectionConfig::memory("scoped"), |db| async move {
            db.collection("things").insert_one(json!({"n": 1})).await?;
            let docs = db.collection("things").find(json!({}), Default::default()).await?;
            Ok::<_, Error>(docs.len())
        })
        .await
        .unwrap();
        assert_eq!(count, 1);

        let err = with_connection(ConnectionConfig::memory("scoped"), |_db| async move {
            Err::<(), anyhow::Error>(anyhow::anyhow!("task body failed"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "task body failed");
    }

    async fn failing_body(db: Database, panic: bool) -> Result<usize> {
        db.collection("things").insert_one(json!({"n": 1})).await?;
        if panic {
            panic!("task body panicked");
        }
        Err(Error::Other(anyhow::anyhow!("task body failed")))
    }

    #[tokio::test]
    async fn test_scoped_closes_after_error() {
        let mut manager = ConnectionManager::new(ConnectionConfig::memory("scoped"));

        let err = manager.scoped(|db| failing_body(db, false)).await.unwrap_err();
        assert_eq!(err.to_string(), "task body failed");
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn test_scoped_closes_after_panic() {
        let mut manager = ConnectionManager::new(ConnectionConfig::memory("scoped"));

        let outcome = AssertUnwindSafe(manager.scoped(|db| failing_body(db, true)))
            .catch_unwind()
            .await;
        let panic = outcome.unwrap_err();
        assert_eq!(panic.downcast_ref::<&str>(), Some(&"task body panicked"));
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn test_scoped_can_reopen() {
        let mut manager = ConnectionManager::new(ConnectionConfig::memory("scoped"));

        let first = manager.scoped(|db| async move { db.ping().await }).await;
        assert!(first.is_ok());
        assert!(!manager.is_open());

        let second = manager.scoped(|db| async move { db.ping().await }).await;
        assert!(second.is_ok());
        assert!(!manager.is_open());
    }
}
