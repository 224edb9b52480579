use std::process::ExitCode;

use tickwatch_core::AppConfig;

use crate::cli::Cli;
use crate::error::CliError;
use crate::output;

pub async fn execute(cli: &Cli, config: &AppConfig) -> Result<ExitCode, CliError> {
    let engine = super::build_engine(cli, config)?;
    let report = engine.run_tick().await;
    engine.dispatcher().shutdown();

    let report = report?;
    output::render(&report, cli.pretty)?;

    if report.failed > 0 || !report.skipped.is_empty() {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
