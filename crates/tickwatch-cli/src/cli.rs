//! CLI argument definitions for tickwatch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Evaluate stored rules every interval until Ctrl-C |
//! | `once` | Run one evaluation pass and print the tick report |
//! | `rules check` | Validate a rule document, optionally evaluate it |
//! | `rules add` | Validate and store a rule document |
//! | `rules list` | List stored rules |
//! | `notify` | Send a test notification |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$TICKWATCH_HOME/config.json` | Config file path |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--dry-run` | `false` | Log notifications instead of sending them |
//!
//! # Examples
//!
//! ```bash
//! # Validate a rule and evaluate it against the warehouse
//! tickwatch rules check rules/aapl-rsi.json --evaluate --pretty
//!
//! # Single pass without sending anything
//! tickwatch once --dry-run
//!
//! # Scheduler loop
//! tickwatch run --config /etc/tickwatch/config.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Alert rules over daily market data.
#[derive(Debug, Parser)]
#[command(
    name = "tickwatch",
    author,
    version,
    about = "Alert rule engine for daily market data",
    long_about = "tickwatch evaluates stored alert rules against the local DuckDB warehouse \
and sends a notification for every rule whose equation holds.\n\
\n\
Use 'tickwatch <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Config file. Defaults to `$TICKWATCH_HOME/config.json` when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Write notifications to the log instead of the configured sender.
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate stored rules every `engine.interval_secs` until Ctrl-C.
    Run,

    /// Run one evaluation pass and print the tick report.
    ///
    /// Exits with code 3 when any rule was skipped or failed.
    Once,

    /// Manage rule documents.
    Rules(RulesArgs),

    /// Send a test notification through the blocking send path.
    ///
    /// # Examples
    ///
    ///   tickwatch notify "hello from tickwatch"
    Notify(NotifyArgs),
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Validate a rule document file.
    Check(RuleCheckArgs),

    /// Validate a rule document and store it in the rule table.
    Add(RuleFileArgs),

    /// List stored rules with their validity.
    List,
}

#[derive(Debug, Args)]
pub struct RuleCheckArgs {
    /// Path to a JSON rule document.
    pub file: PathBuf,

    /// Evaluate the rule once against the warehouse. Notifications are
    /// only logged.
    #[arg(long, default_value_t = false)]
    pub evaluate: bool,
}

#[derive(Debug, Args)]
pub struct RuleFileArgs {
    /// Path to a JSON rule document.
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct NotifyArgs {
    /// Message text.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, RulesCommand};
    use clap::{CommandFactory, Parser};

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::parse_from([
            "tickwatch",
            "rules",
            "check",
            "rule.json",
            "--evaluate",
            "--dry-run",
        ]);
        assert!(cli.dry_run);
        match cli.command {
            Command::Rules(args) => match args.command {
                RulesCommand::Check(check) => {
                    assert!(check.evaluate);
                    assert_eq!(check.file.to_str(), Some("rule.json"));
                }
                other => panic!("unexpected rules command: {other:?}"),
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
