mod notify;
mod once;
mod rules;
mod run;

use std::process::ExitCode;
use std::sync::Arc;

use tickwatch_core::{
    AlertEngine, AppConfig, Dispatcher, EvalContext, LogSender, Sender, StoreClient,
    TelegramSender, Warehouse, WarehouseStore,
};
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli, config: &AppConfig) -> Result<ExitCode, CliError> {
    match &cli.command {
        Command::Run => run::execute(cli, config).await,
        Command::Once => once::execute(cli, config).await,
        Command::Rules(args) => rules::execute(args, cli, config).await,
        Command::Notify(args) => notify::execute(args, cli, config),
    }
}

fn open_warehouse(config: &AppConfig) -> Result<Warehouse, CliError> {
    let warehouse = Warehouse::open(config.warehouse.warehouse_config())?;
    debug!(path = %warehouse.db_path().display(), "warehouse opened");
    Ok(warehouse)
}

fn store_client(config: &AppConfig, warehouse: Warehouse) -> StoreClient {
    let store = WarehouseStore::new(warehouse, config.warehouse.guardrails());
    StoreClient::new(Arc::new(store), config.engine.fetch_timeout())
}

/// Evaluation context using the configured lookback.
fn eval_context(config: &AppConfig, store: StoreClient) -> EvalContext {
    EvalContext {
        lookback_days: config.engine.lookback_days,
        ..EvalContext::new(store)
    }
}

/// The configured sender, or [`LogSender`] when `dry_run` is set or no
/// transport is configured.
fn build_dispatcher(config: &AppConfig, dry_run: bool) -> Result<Arc<Dispatcher>, CliError> {
    let sender: Arc<dyn Sender> = match config.sender.telegram_config() {
        Some(telegram) if !dry_run => Arc::new(TelegramSender::from_config(telegram)?),
        _ => Arc::new(LogSender),
    };
    Ok(Arc::new(Dispatcher::new(sender, config.engine.send_timeout())))
}

fn build_engine(cli: &Cli, config: &AppConfig) -> Result<AlertEngine, CliError> {
    let warehouse = open_warehouse(config)?;
    let dispatcher = build_dispatcher(config, cli.dry_run)?;
    let engine = AlertEngine::new(
        store_client(config, warehouse),
        dispatcher,
        config.engine.engine_config(),
    )?;
    Ok(engine)
}
