use anyhow::Result;
use clap::Parser;
use doctask_cli::{
    commands,
    settings::{LogFormat, Settings},
    Cli,
};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Configuration error: {:#}", err);
            return ExitCode::from(1);
        }
    };

    init_tracing(settings.log_format);

    match commands::execute(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_connection_error(&err) => {
            eprintln!("Could not connect to the database: {:#}", err);
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "doctask=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Reports go to stdout, logs to stderr
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Settings from file and environment, with the global flags on top
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;

    if let Some(backend) = cli.backend {
        settings.database.backend = backend;
    }
    if let Some(uri) = &cli.uri {
        settings.database.uri = uri.clone();
    }
    if let Some(database) = &cli.database {
        settings.database.name = database.clone();
    }

    Ok(settings)
}

fn is_connection_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<doctask_store::Error>(),
        Some(doctask_store::Error::Connection(_))
    )
}
