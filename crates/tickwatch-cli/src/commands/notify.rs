use std::process::ExitCode;

use serde_json::json;
use tickwatch_core::AppConfig;

use crate::cli::{Cli, NotifyArgs};
use crate::error::CliError;
use crate::output;

/// Runs on a worker of the multi-thread runtime, so `send_blocking` hands
/// the worker off instead of starting its own runtime.
pub fn execute(args: &NotifyArgs, cli: &Cli, config: &AppConfig) -> Result<ExitCode, CliError> {
    let dispatcher = super::build_dispatcher(config, cli.dry_run)?;
    let result = dispatcher.send_blocking(&args.text);
    dispatcher.shutdown();
    result?;

    output::render(
        &json!({"sent": true, "sender": dispatcher.sender_name()}),
        cli.pretty,
    )?;
    Ok(ExitCode::SUCCESS)
}
