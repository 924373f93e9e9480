use crate::{ErrorInfo, RunReport, Task, TaskOutcome, TaskResult};
use chrono::Utc;
use futures_util::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in registration order.
    #[default]
    Sequential,
    /// Up to `max_in_flight` tasks at once; outcomes are still reported
    /// in registration order.
    Concurrent { max_in_flight: usize },
}

#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    mode: ExecutionMode,
    task_timeout: Option<Duration>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run every given task against `handle` and collect one outcome per task.
    ///
    /// A failing, panicking or timed-out task is recorded as a failure and
    /// never stops the tasks after it.
    pub async fn run<'a, H, I>(&self, handle: H, tasks: I) -> RunReport
    where
        H: Clone + Send + 'static,
        I: IntoIterator<Item = &'a Task<H>>,
    {
        let tasks: Vec<&Task<H>> = tasks.into_iter().collect();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        tracing::info!("Starting run {} with {} tasks ({:?})", run_id, tasks.len(), self.mode);

        let outcomes = match self.mode {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(tasks.len());
                for task in tasks {
                    outcomes.push(self.execute(task, handle.clone()).await);
                }
                outcomes
            }
            ExecutionMode::Concurrent { max_in_flight } => {
                // `buffered` yields in input order, not completion order
                stream::iter(tasks)
                    .map(|task| self.execute(task, handle.clone()))
                    .buffered(max_in_flight.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };

        let report = RunReport::new(run_id, started_at, outcomes);
        let summary = report.summary();
        tracing::info!(
            "Run {} finished: {} succeeded, {} failed",
            run_id,
            summary.succeeded,
            summary.failed
        );

        report
    }

    async fn execute<H>(&self, task: &Task<H>, handle: H) -> TaskOutcome
    where
        H: Send + 'static,
    {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::debug!("Task running: {}", task.name);

        let operation = task.operation();
        let guarded = AssertUnwindSafe(async move { operation.call(handle).await }).catch_unwind();

        let result = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(settled) => settle(settled),
                Err(_) => TaskResult::Failure(ErrorInfo::timeout(limit)),
            },
            None => settle(guarded.await),
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        match &result {
            TaskResult::Success(_) => {
                tracing::info!("Task succeeded: {} ({}ms)", task.name, duration_ms)
            }
            TaskResult::Failure(info) => {
                tracing::error!("Task failed: {} ({}ms): {}", task.name, duration_ms, info)
            }
        }

        TaskOutcome {
            name: task.name.clone(),
            result,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        }
    }
}

fn settle(settled: std::thread::Result<anyhow::Result<Value>>) -> TaskResult {
    match settled {
        Ok(Ok(value)) => TaskResult::Success(value),
        Ok(Err(err)) => TaskResult::Failure(ErrorInfo::operation(&err)),
        Err(panic) => TaskResult::Failure(ErrorInfo::panicked(panic.as_ref())),
    }
}
