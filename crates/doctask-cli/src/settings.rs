use config::{Config, ConfigError, Environment, File};
use doctask_core::ExecutionMode;
use doctask_store::{Backend, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "doctask.toml";
const ENV_PREFIX: &str = "DOCTASK";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub runner: RunnerSettings,
    pub report: ReportSettings,
    pub log_format: LogFormat,
    /// Task names to run; empty keeps the catalog defaults
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: Backend,
    pub uri: String,
    pub name: String,
    pub app_name: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            backend: defaults.backend,
            uri: defaults.uri,
            name: defaults.database,
            app_name: defaults.app_name,
            connect_timeout_secs: defaults.connect_timeout_secs,
        }
    }
}

impl DatabaseSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            backend: self.backend,
            uri: self.uri.clone(),
            database: self.name.clone(),
            app_name: self.app_name.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub mode: RunMode,
    pub max_in_flight: usize,
    pub task_timeout_secs: Option<u64>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Sequential,
            max_in_flight: 4,
            task_timeout_secs: None,
        }
    }
}

impl RunnerSettings {
    pub fn execution_mode(&self) -> ExecutionMode {
        match self.mode {
            RunMode::Sequential => ExecutionMode::Sequential,
            RunMode::Concurrent => ExecutionMode::Concurrent {
                max_in_flight: self.max_in_flight.max(1),
            },
        }
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable listing
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Tracing events
    Log,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Settings {
    /// Layer built-in defaults, the optional settings file and `DOCTASK_*`
    /// environment variables, in that order.
    ///
    /// Without an explicit `path`, `doctask.toml` in the working directory is
    /// used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("tasks"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database.backend, Backend::Mongodb);
        assert_eq!(settings.database.uri, "mongodb://localhost:27017");
        assert_eq!(settings.runner.execution_mode(), ExecutionMode::Sequential);
        assert_eq!(settings.runner.task_timeout(), None);
        assert_eq!(settings.report.format, ReportFormat::Text);
        assert!(settings.tasks.is_empty());
    }

    #[test]
    fn test_concurrent_mode_never_zero() {
        let runner = RunnerSettings {
            mode: RunMode::Concurrent,
            max_in_flight: 0,
            task_timeout_secs: Some(3),
        };
        assert_eq!(runner.execution_mode(), ExecutionMode::Concurrent { max_in_flight: 1 });
        assert_eq!(runner.task_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("doctask-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("doctask.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
tasks = ["users-youngest", "students-avg-homework"]

[database]
backend = "memory"
name = "school"

[runner]
mode = "concurrent"
max_in_flight = 2

[report]
format = "json"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.database.backend, Backend::Memory);
        assert_eq!(settings.database.name, "school");
        assert_eq!(settings.database.uri, "mongodb://localhost:27017");
        assert_eq!(settings.runner.execution_mode(), ExecutionMode::Concurrent { max_in_flight: 2 });
        assert_eq!(settings.report.format, ReportFormat::Json);
        assert_eq!(settings.tasks, vec!["users-youngest", "students-avg-homework"]);

        let connection = settings.database.connection_config();
        assert_eq!(connection.database, "school");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let missing = Path::new("/nonexistent/doctask.toml");
        assert!(Settings::load(Some(missing)).is_err());
    }
}
