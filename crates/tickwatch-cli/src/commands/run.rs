use std::process::ExitCode;

use tickwatch_core::AppConfig;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::error::CliError;

pub async fn execute(cli: &Cli, config: &AppConfig) -> Result<ExitCode, CliError> {
    let engine = super::build_engine(cli, config)?;
    engine.run(shutdown_signal()).await;
    engine.dispatcher().shutdown();
    info!("shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl-C. If the handler cannot be installed the loop runs
/// until the process is killed.
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
