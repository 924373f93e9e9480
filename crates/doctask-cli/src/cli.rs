use crate::settings::ReportFormat;
use clap::{Parser, Subcommand};
use doctask_store::Backend;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doctask")]
#[command(about = "doctask - run named document-database query tasks", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./doctask.toml when present)
    #[arg(long, global = true, env = "DOCTASK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend (mongodb, memory)
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    /// MongoDB connection string
    #[arg(long, global = true)]
    pub uri: Option<String>,

    /// Database name
    #[arg(long, global = true)]
    pub database: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the selected tasks and report their outcomes
    Run {
        /// Task to run; repeat to run several. Replaces the default selection
        #[arg(long = "task", value_name = "NAME")]
        tasks: Vec<String>,

        /// Run every task in the catalog
        #[arg(long, conflicts_with = "tasks")]
        all: bool,

        /// Run tasks concurrently
        #[arg(long)]
        concurrent: bool,

        /// Fail a task that runs longer than this
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,

        /// Report format
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
    },

    /// List the task catalog
    List,
}
