use crate::{Result, TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub name: String,
    pub result: TaskResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        self.result.status()
    }
}

/// Ordered record of every executed task's outcome for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    outcomes: Vec<TaskOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid, started_at: DateTime<Utc>, outcomes: Vec<TaskOutcome>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    pub fn get(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.result.is_success())
    }

    /// True when at least one task ran and none of them succeeded
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.succeeded().next().is_none()
    }

    pub fn summary(&self) -> RunSummary {
        let succeeded = self.succeeded().count();
        RunSummary {
            total: self.outcomes.len(),
            succeeded,
            failed: self.outcomes.len() - succeeded,
        }
    }
}

/// Consumes a finished run and emits one record per task.
pub trait Reporter {
    fn report(&mut self, report: &RunReport) -> Result<()>;
}

/// Human-readable console output.
pub struct TextReporter<W> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TextReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn report(&mut self, report: &RunReport) -> Result<()> {
        writeln!(self.out, "Run {}", report.run_id)?;
        writeln!(self.out, "{}", "=".repeat(60))?;

        for outcome in report.outcomes() {
            match &outcome.result {
                TaskResult::Success(payload) => {
                    writeln!(self.out, "✓ {} ({}ms)", outcome.name, outcome.duration_ms)?;
                    for line in serde_json::to_string_pretty(payload)?.lines() {
                        writeln!(self.out, "    {}", line)?;
                    }
                }
                TaskResult::Failure(info) => {
                    writeln!(
                        self.out,
                        "✗ {} ({}ms): {}",
                        outcome.name, outcome.duration_ms, info
                    )?;
                }
            }
        }

        let summary = report.summary();
        writeln!(self.out, "{}", "=".repeat(60))?;
        writeln!(
            self.out,
            "{} tasks: {} succeeded, {} failed",
            summary.total, summary.succeeded, summary.failed
        )?;
        self.out.flush()?;

        Ok(())
    }
}

/// One JSON object per line: a record per task followed by a summary record.
pub struct JsonReporter<W> {
    out: W,
}

#[derive(Serialize)]
struct TaskRecord<'a> {
    run_id: Uuid,
    task: &'a str,
    #[serde(flatten)]
    result: &'a TaskResult,
    started_at: DateTime<Utc>,
    duration_ms: u64,
}

#[derive(Serialize)]
struct SummaryRecord {
    run_id: Uuid,
    summary: RunSummary,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn report(&mut self, report: &RunReport) -> Result<()> {
        for outcome in report.outcomes() {
            let record = TaskRecord {
                run_id: report.run_id,
                task: &outcome.name,
                result: &outcome.result,
                started_at: outcome.started_at,
                duration_ms: outcome.duration_ms,
            };
            serde_json::to_writer(&mut self.out, &record)?;
            writeln!(self.out)?;
        }

        let summary = SummaryRecord {
            run_id: report.run_id,
            summary: report.summary(),
        };
        serde_json::to_writer(&mut self.out, &summary)?;
        writeln!(self.out)?;
        self.out.flush()?;

        Ok(())
    }
}

/// Emits each outcome as a tracing event.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&mut self, report: &RunReport) -> Result<()> {
        for outcome in report.outcomes() {
            match &outcome.result {
                TaskResult::Success(payload) => tracing::info!(
                    run_id = %report.run_id,
                    task = %outcome.name,
                    duration_ms = outcome.duration_ms,
                    payload = %payload,
                    "succeeded"
                ),
                TaskResult::Failure(info) => tracing::warn!(
                    run_id = %report.run_id,
                    task = %outcome.name,
                    duration_ms = outcome.duration_ms,
                    error = %info,
                    "failed"
                ),
            }
        }

        let summary = report.summary();
        tracing::info!(
            run_id = %report.run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "run complete"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorInfo;
    use serde_json::{json, Value};

    fn outcome(name: &str, result: TaskResult) -> TaskOutcome {
        TaskOutcome {
            name: name.to_string(),
            result,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 3,
        }
    }

    fn sample_report() -> RunReport {
        RunReport::new(
            Uuid::new_v4(),
            Utc::now(),
            vec![
                outcome("first", TaskResult::Success(json!({"modified": 2}))),
                outcome(
                    "second",
                    TaskResult::Failure(ErrorInfo::operation(&anyhow::anyhow!("no such collection"))),
                ),
            ],
        )
    }

    #[test]
    fn test_summary_counts() {
        let report = sample_report();
        let summary = report.summary();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!report.all_failed());
    }

    #[test]
    fn test_text_reporter_lists_every_task() {
        let mut reporter = TextReporter::new(Vec::new());
        reporter.report(&sample_report()).unwrap();

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.contains("✓ first (3ms)"));
        assert!(text.contains("\"modified\": 2"));
        assert!(text.contains("✗ second (3ms): Operation: no such collection"));
        assert!(text.contains("2 tasks: 1 succeeded, 1 failed"));
    }

    #[test]
    fn test_json_reporter_writes_one_line_per_task() {
        let report = sample_report();
        let mut reporter = JsonReporter::new(Vec::new());
        reporter.report(&report).unwrap();

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["task"], "first");
        assert_eq!(lines[0]["status"], "success");
        assert_eq!(lines[0]["payload"]["modified"], 2);
        assert_eq!(lines[1]["task"], "second");
        assert_eq!(lines[1]["status"], "failure");
        assert_eq!(lines[1]["payload"]["kind"], "operation");
        assert_eq!(lines[2]["summary"]["failed"], 1);
    }

    #[test]
    fn test_all_failed() {
        let report = RunReport::new(
            Uuid::new_v4(),
            Utc::now(),
            vec![outcome(
                "only",
                TaskResult::Failure(ErrorInfo::operation(&anyhow::anyhow!("x"))),
            )],
        );
        assert!(report.all_failed());
        assert_eq!(report.failed().count(), 1);
    }
}
