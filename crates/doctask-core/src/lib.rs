pub mod task;
pub mod registry;
pub mod runner;
pub mod report;
pub mod error;

// Re-exports
pub use task::{ErrorInfo, ErrorKind, Operation, OperationFuture, Task, TaskResult, TaskStatus};
pub use registry::TaskRegistry;
pub use runner::{ExecutionMode, TaskRunner};
pub use report::{
    JsonReporter, Reporter, RunReport, RunSummary, TaskOutcome, TextReporter, TracingReporter,
};
pub use error::{Error, Result};
