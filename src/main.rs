//! Main entry point for the user-time-collector CLI

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use user_time_collector::cli::{Cli, Commands};
use user_time_collector::shutdown::{SharedShutdown, ShutdownCoordinator};
use user_time_collector::CollectionResult;

/// Exit status when Ctrl+C cut the collection short
const EXIT_CANCELLED: u8 = 130;

const DEFAULT_LOG_FILTER: &str = "user_time_collector=info";

/// `RUST_LOG` picks the filter, `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match std::env::var("LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => builder.json().init(),
        _ => builder.init(),
    }
}

/// First Ctrl+C stops new work; in-flight calls finish and a partial CSV is written.
fn spawn_ctrl_c_handler(shutdown: SharedShutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, finishing in-flight requests");
            shutdown.request_shutdown();
        }
    });
}

async fn run(cli: Cli, shutdown: SharedShutdown) -> anyhow::Result<CollectionResult> {
    match cli.command {
        Commands::Collect(args) => args
            .execute(shutdown)
            .await
            .with_context(|| format!("collect to {} failed", args.output.display())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    spawn_ctrl_c_handler(shutdown.clone());

    match run(cli, shutdown).await {
        Ok(result) if result.cancelled => ExitCode::from(EXIT_CANCELLED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
