//! weatherdesk - command-line client for the weather observation service.
//!
//! Logs in against the service, keeps the session between runs and manages
//! cities and their weather records.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weatherdesk_core::{AppContext, Config};


/// Log file name prefix inside the cache directory's `logs/` folder
const LOG_FILE_PREFIX: &str = "weatherdesk.log";

/// Initialize the tracing subscriber for logging.
///
/// Warnings go to stderr; the full `RUST_LOG` level is also written to a
/// daily log file when a log directory is available.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match commands::parse_args(&args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            println!("{}", commands::USAGE);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}\n", e);
            eprintln!("{}", commands::USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    let log_dir = config.cache_dir().ok().map(|dir| dir.join("logs"));
    let _guard = init_tracing(log_dir.as_deref());
    info!(base_url = %config.base_url(), "weatherdesk starting");

    let ctx = AppContext::from_config(config).await?;
    let mut events = ctx.session.subscribe();

    let result = commands::run(&ctx, command).await;

    commands::report_session_events(&mut events);
    result
}
