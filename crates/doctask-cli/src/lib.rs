pub mod catalog;
pub mod cli;
pub mod commands;
pub mod settings;

// Re-exports
pub use cli::{Cli, Commands};
pub use commands::{run_tasks, Selection};
pub use settings::Settings;
