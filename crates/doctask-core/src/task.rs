use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation returned an error (driver rejection, bad filter, ...).
    Operation,
    /// The operation did not finish within the runner's per-task limit.
    Timeout,
    /// The operation panicked while being polled.
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn operation(err: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Operation,
            message: format!("{:#}", err),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!("timed out after {}ms", limit.as_millis()),
        }
    }

    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "operation panicked".to_string()
        };

        Self {
            kind: ErrorKind::Panicked,
            message,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of a single task run. Exactly one is recorded per executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum TaskResult {
    Success(Value),
    Failure(ErrorInfo),
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskResult::Success(_) => TaskStatus::Succeeded,
            TaskResult::Failure(_) => TaskStatus::Failed,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            TaskResult::Success(value) => Some(value),
            TaskResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            TaskResult::Success(_) => None,
            TaskResult::Failure(info) => Some(info),
        }
    }
}

pub type OperationFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// An async unit of work that receives the shared connection handle.
///
/// Implemented for any `Fn(H) -> impl Future<Output = anyhow::Result<Value>>`,
/// so plain `async fn` items can be registered directly.
pub trait Operation<H>: Send + Sync {
    fn call(&self, handle: H) -> OperationFuture;
}

impl<H, F, Fut> Operation<H> for F
where
    F: Fn(H) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, handle: H) -> OperationFuture {
        Box::pin(self(handle))
    }
}

pub struct Task<H> {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    operation: Arc<dyn Operation<H>>,
}

impl<H> Task<H> {
    pub fn new<O>(name: impl Into<String>, operation: O) -> Self
    where
        O: Operation<H> + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            enabled: false,
            operation: Arc::new(operation),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn operation(&self) -> Arc<dyn Operation<H>> {
        Arc::clone(&self.operation)
    }
}

impl<H> Clone for Task<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            operation: Arc::clone(&self.operation),
        }
    }
}

impl<H> fmt::Debug for Task<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn answer(_: ()) -> anyhow::Result<Value> {
        Ok(json!(42))
    }

    #[test]
    fn test_task_defaults_to_disabled() {
        let task = Task::new("answer", answer);

        assert_eq!(task.name, "answer");
        assert!(!task.enabled);
        assert!(task.description.is_none());
    }

    #[tokio::test]
    async fn test_operation_from_async_fn() {
        let task = Task::new("answer", answer).with_enabled(true);
        let value = task.operation().call(()).await.unwrap();

        assert!(task.enabled);
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_result_serializes_tagged() {
        let success = TaskResult::Success(json!({"n": 1}));
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"status": "success", "payload": {"n": 1}})
        );

        let failure = TaskResult::Failure(ErrorInfo::operation(&anyhow::anyhow!("boom")));
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"status": "failure", "payload": {"kind": "operation", "message": "boom"}})
        );
        assert_eq!(failure.status(), TaskStatus::Failed);
        assert!(failure.status().is_terminal());
    }

    #[test]
    fn test_panic_payload_message() {
        let payload: Box<dyn Any + Send> = Box::new("exploded");
        let info = ErrorInfo::panicked(payload.as_ref());
        assert_eq!(info.kind, ErrorKind::Panicked);
        assert_eq!(info.message, "exploded");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(ErrorInfo::panicked(payload.as_ref()).message, "owned");
    }
}
