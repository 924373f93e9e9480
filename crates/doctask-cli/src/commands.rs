use anyhow::Result;

use crate::catalog;
use crate::cli::Commands;
use crate::settings::{ReportFormat, RunMode, Settings};
use doctask_core::{
    JsonReporter, Reporter, RunReport, TaskRegistry, TaskRunner, TextReporter, TracingReporter,
};
use doctask_store::{with_connection, Database};

/// Which catalog tasks a run enables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Keep each task's default flag
    Defaults,
    /// Exactly these tasks
    Named(Vec<String>),
    All,
}

impl Selection {
    pub fn apply(&self, registry: &mut TaskRegistry<Database>) -> doctask_core::Result<()> {
        match self {
            Selection::Defaults => Ok(()),
            Selection::Named(names) => registry.enable_only(names),
            Selection::All => {
                registry.enable_all();
                Ok(())
            }
        }
    }
}

pub async fn execute(command: Commands, mut settings: Settings) -> Result<()> {
    match command {
        Commands::Run {
            tasks,
            all,
            concurrent,
            timeout_secs,
            format,
        } => {
            if concurrent {
                settings.runner.mode = RunMode::Concurrent;
            }
            if timeout_secs.is_some() {
                settings.runner.task_timeout_secs = timeout_secs;
            }
            if let Some(format) = format {
                settings.report.format = format;
            }

            let selection = if all {
                Selection::All
            } else if !tasks.is_empty() {
                Selection::Named(tasks)
            } else if !settings.tasks.is_empty() {
                Selection::Named(settings.tasks.clone())
            } else {
                Selection::Defaults
            };

            let report = run_tasks(&settings, &selection).await?;
            print_report(&report, settings.report.format)?;

            if report.all_failed() {
                tracing::warn!("Every task in run {} failed", report.run_id);
            }
        }

        Commands::List => list_tasks()?,
    }

    Ok(())
}

/// Open the configured database, run the selected catalog tasks against it
/// and close it again.
pub async fn run_tasks(settings: &Settings, selection: &Selection) -> Result<RunReport> {
    let mut registry = catalog::registry()?;
    selection.apply(&mut registry)?;

    let runner = TaskRunner::new()
        .with_mode(settings.runner.execution_mode())
        .with_task_timeout(settings.runner.task_timeout());

    let selected = registry.selected();
    if selected.is_empty() {
        tracing::warn!("No tasks selected");
    }

    let report = with_connection(settings.database.connection_config(), |db| async move {
        Ok::<_, anyhow::Error>(runner.run(db, selected).await)
    })
    .await?;

    Ok(report)
}

pub fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Text => TextReporter::stdout().report(report)?,
        ReportFormat::Json => JsonReporter::stdout().report(report)?,
        ReportFormat::Log => TracingReporter.report(report)?,
    }
    Ok(())
}

fn list_tasks() -> Result<()> {
    let registry = catalog::registry()?;

    println!("Tasks ({}):", registry.len());
    for task in registry.tasks() {
        let marker = if task.enabled { "✓" } else { " " };
        println!("  {} {}", marker, task.name);
        if let Some(description) = &task.description {
            println!("      {}", description);
        }
    }
    println!();
    println!("✓ = runs by default");

    Ok(())
}
