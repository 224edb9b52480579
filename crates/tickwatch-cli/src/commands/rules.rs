use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tickwatch_core::{AppConfig, Dispatcher, LogSender, Rule, RuleDocument};
use tracing::info;

use crate::cli::{Cli, RuleCheckArgs, RuleFileArgs, RulesArgs, RulesCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct RuleSummary {
    name: String,
    equation: String,
    items: Vec<ItemSummary>,
}

#[derive(Debug, Serialize)]
struct ItemSummary {
    id: String,
    datapoint_num: usize,
    condition: &'static str,
    operator: &'static str,
    a: &'static str,
    b: &'static str,
}

#[derive(Debug, Serialize)]
struct ListedRule {
    name: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn execute(
    args: &RulesArgs,
    cli: &Cli,
    config: &AppConfig,
) -> Result<ExitCode, CliError> {
    match &args.command {
        RulesCommand::Check(check) => execute_check(check, cli, config).await,
        RulesCommand::Add(add) => execute_add(add, cli, config),
        RulesCommand::List => execute_list(cli, config),
    }
}

async fn execute_check(
    args: &RuleCheckArgs,
    cli: &Cli,
    config: &AppConfig,
) -> Result<ExitCode, CliError> {
    let (_, rule) = read_rule(&args.file, log_dispatcher(config))?;

    if !args.evaluate {
        output::render(&summarize(&rule), cli.pretty)?;
        return Ok(ExitCode::SUCCESS);
    }

    let warehouse = super::open_warehouse(config)?;
    let ctx = super::eval_context(config, super::store_client(config, warehouse));
    let evaluation = rule.evaluate(&ctx).await;
    output::render(&evaluation, cli.pretty)?;

    if evaluation.failed_items() > 0 {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

fn execute_add(
    args: &RuleFileArgs,
    cli: &Cli,
    config: &AppConfig,
) -> Result<ExitCode, CliError> {
    let (document, rule) = read_rule(&args.file, log_dispatcher(config))?;

    let warehouse = super::open_warehouse(config)?;
    warehouse.upsert_rule(rule.name(), &document.to_string())?;
    info!(rule = rule.name(), items = rule.items().len(), "rule stored");

    output::render(
        &json!({"stored": rule.name(), "items": rule.items().len()}),
        cli.pretty,
    )?;
    Ok(ExitCode::SUCCESS)
}

fn execute_list(cli: &Cli, config: &AppConfig) -> Result<ExitCode, CliError> {
    let warehouse = super::open_warehouse(config)?;
    let dispatcher = log_dispatcher(config);

    let listed = warehouse
        .list_rules()?
        .into_iter()
        .map(|record| {
            let built = RuleDocument::parse(&record.definition)
                .and_then(|document| Rule::from_document(&document, Arc::clone(&dispatcher)));
            ListedRule {
                name: record.name,
                valid: built.is_ok(),
                error: built.err().map(|error| error.to_string()),
            }
        })
        .collect::<Vec<_>>();

    output::render(&listed, cli.pretty)?;
    Ok(ExitCode::SUCCESS)
}

/// Rules built here never reach a real transport.
fn log_dispatcher(config: &AppConfig) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(Arc::new(LogSender), config.engine.send_timeout()))
}

fn read_rule(path: &Path, dispatcher: Arc<Dispatcher>) -> Result<(Value, Rule), CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let document: Value = serde_json::from_str(&text)?;
    let rule_document = RuleDocument::from_value(document.clone())?;
    let rule = Rule::from_document(&rule_document, dispatcher)?;
    Ok((document, rule))
}

fn summarize(rule: &Rule) -> RuleSummary {
    RuleSummary {
        name: rule.name().to_string(),
        equation: rule.equation().to_string(),
        items: rule
            .items()
            .iter()
            .map(|item| {
                let (a, b) = item.sources();
                ItemSummary {
                    id: item.id().to_string(),
                    datapoint_num: item.datapoint_num(),
                    condition: item.condition().kind().as_str(),
                    operator: item.condition().operator().as_str(),
                    a: a.kind().as_str(),
                    b: b.kind().as_str(),
                }
            })
            .collect(),
    }
}
