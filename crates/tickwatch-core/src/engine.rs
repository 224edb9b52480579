//! Scheduler-facing orchestration: load rules, evaluate them, report.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::domain::{Identifier, Timestamp};
use crate::rule::{EvalContext, Rule, RuleDocument, RuleEvaluation, DEFAULT_LOOKBACK_DAYS};
use crate::store::{StoreClient, StoreError};
use crate::{ConfigError, ValidationError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid rule source '{value}': {source}")]
    InvalidRuleSource {
        value: String,
        #[source]
        source: ValidationError,
    },

    #[error("failed to load rules from {table}: {source}")]
    Load {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("rule table has no column '{column}'")]
    MissingRuleColumn { column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub rule_table: String,
    pub rule_column: String,
    pub interval: Duration,
    pub lookback_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_table: String::from("alert_rules"),
            rule_column: String::from("definition"),
            interval: Duration::from_secs(3_600),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// A stored rule document that could not be turned into a [`Rule`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRule {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub error: String,
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: Timestamp,
    /// Rules built successfully.
    pub loaded: usize,
    pub skipped: Vec<SkippedRule>,
    /// Rules whose evaluation ran to completion.
    pub evaluated: usize,
    pub triggered: usize,
    /// Rules that panicked or had at least one item fail.
    pub failed: usize,
    pub results: Vec<RuleEvaluation>,
}

pub struct AlertEngine {
    store: StoreClient,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    rule_table: Identifier,
    rule_column: Identifier,
}

impl AlertEngine {
    pub fn new(
        store: StoreClient,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let identifier = |value: &str| {
            Identifier::parse(value).map_err(|source| EngineError::InvalidRuleSource {
                value: value.to_string(),
                source,
            })
        };
        let rule_table = identifier(&config.rule_table)?;
        let rule_column = identifier(&config.rule_column)?;

        Ok(Self {
            store,
            dispatcher,
            config,
            rule_table,
            rule_column,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Evaluation context pinned to the current instant.
    pub fn context(&self) -> EvalContext {
        EvalContext {
            store: self.store.clone(),
            now: Timestamp::now(),
            lookback_days: self.config.lookback_days,
        }
    }

    /// Read every stored rule document. Documents that fail to build are
    /// logged and returned as skipped; they never fail the load.
    pub async fn load_rules(&self) -> Result<(Vec<Rule>, Vec<SkippedRule>), EngineError> {
        let sql = format!("SELECT {} FROM {}", self.rule_column, self.rule_table);
        let result = self
            .store
            .execute(sql)
            .await
            .map_err(|source| EngineError::Load {
                table: self.rule_table.to_string(),
                source,
            })?;
        let column = result
            .column_index(self.rule_column.as_str())
            .ok_or_else(|| EngineError::MissingRuleColumn {
                column: self.rule_column.to_string(),
            })?;

        let mut rules = Vec::new();
        let mut skipped = Vec::new();
        for (row, value) in result.column_values(column).enumerate() {
            let document = match value {
                Value::String(text) => RuleDocument::parse(text),
                Value::Object(_) => RuleDocument::from_value(value.clone()),
                other => Err(ConfigError::Document(format!(
                    "expected a JSON document, found {other}"
                ))),
            };

            let name = document.as_ref().ok().map(|doc| doc.name.clone());
            let built = document
                .and_then(|doc| Rule::from_document(&doc, Arc::clone(&self.dispatcher)));
            match built {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    error!(
                        row,
                        rule = name.as_deref().unwrap_or("?"),
                        error = %err,
                        "skipping rule"
                    );
                    skipped.push(SkippedRule {
                        row,
                        name,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok((rules, skipped))
    }

    /// One pass: `Loading`, then `Evaluating` each rule in turn, then back
    /// to idle. Every rule runs in its own task so a panic is contained.
    pub async fn run_tick(&self) -> Result<TickReport, EngineError> {
        let tick_id = Uuid::new_v4();
        let span = info_span!("tick", %tick_id);
        self.tick(tick_id).instrument(span).await
    }

    async fn tick(&self, tick_id: Uuid) -> Result<TickReport, EngineError> {
        let ctx = self.context();
        let (rules, skipped) = self.load_rules().await?;
        info!(loaded = rules.len(), skipped = skipped.len(), "rules loaded");

        let mut report = TickReport {
            tick_id,
            started_at: ctx.now,
            loaded: rules.len(),
            skipped,
            evaluated: 0,
            triggered: 0,
            failed: 0,
            results: Vec::with_capacity(rules.len()),
        };

        for rule in rules {
            let name = rule.name().to_string();
            let task_ctx = ctx.clone();
            let span = info_span!("rule", rule = %name);
            let task =
                tokio::spawn(async move { rule.evaluate(&task_ctx).await }.instrument(span));

            match task.await {
                Ok(evaluation) => {
                    info!(rule = %name, result = evaluation.triggered, "rule evaluated");
                    report.evaluated += 1;
                    if evaluation.triggered {
                        report.triggered += 1;
                    }
                    if evaluation.failed_items() > 0 {
                        report.failed += 1;
                    }
                    report.results.push(evaluation);
                }
                Err(join) => {
                    error!(rule = %name, error = %join, "rule evaluation aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            evaluated = report.evaluated,
            triggered = report.triggered,
            failed = report.failed,
            "tick finished"
        );
        Ok(report)
    }

    /// Run ticks every `interval` until `shutdown` resolves. The first tick
    /// fires immediately. A tick that fails to load rules is logged and the
    /// loop carries on.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.interval.as_secs(),
            sender = self.dispatcher.sender_name(),
            "alert engine started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("alert engine stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_tick().await {
                        warn!(error = %err, "tick failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("store", &self.store)
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish()
    }
}
