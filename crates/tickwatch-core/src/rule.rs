//! Rule items, rules and their evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::Date;
use tracing::{error, warn};

use crate::condition::{Condition, ConditionDocument};
use crate::dispatch::Dispatcher;
use crate::domain::Timestamp;
use crate::equation::Equation;
use crate::source::{Source, SourceError};
use crate::store::StoreClient;
use crate::ConfigError;

/// Extra calendar days fetched before the window so gaps still leave
/// `datapoint_num` real points.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Largest window a rule item may request. Matches the default warehouse
/// row limit.
pub const MAX_DATAPOINTS: usize = 10_000;

/// Everything an evaluation reads from the outside world.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub store: StoreClient,
    pub now: Timestamp,
    pub lookback_days: u32,
}

impl EvalContext {
    pub fn new(store: StoreClient) -> Self {
        Self {
            store,
            now: Timestamp::now(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn at(mut self, now: Timestamp) -> Self {
        self.now = now;
        self
    }

    /// `(start, end)` dates for a window of `datapoint_num` points.
    pub fn window(&self, datapoint_num: usize) -> (Date, Date) {
        let end = self.now.date();
        let days = i64::try_from(datapoint_num)
            .unwrap_or(i64::MAX)
            .saturating_add(i64::from(self.lookback_days));
        let start = Timestamp::from_date(end).days_before(days).date();
        (start, end)
    }
}

/// Rule document as stored, one per row.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDocument {
    pub name: String,
    #[serde(rename = "ruleItems")]
    pub rule_items: Map<String, Value>,
    pub equation: String,
}

impl RuleDocument {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(ConfigError::document)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(ConfigError::document)
    }
}

#[derive(Debug, Deserialize)]
struct RuleItemDocument {
    datapoint_num: usize,
    #[serde(rename = "AType")]
    a_type: String,
    #[serde(rename = "A")]
    a: Value,
    #[serde(rename = "BType")]
    b_type: String,
    #[serde(rename = "B")]
    b: Value,
    condition: ConditionDocument,
}

/// Result of one rule item check.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemVerdict {
    pub triggered: bool,
    /// Rendered breach message; empty when not triggered.
    pub message: String,
}

/// One atomic comparison: source A against source B under a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleItem {
    id: String,
    a: Source,
    b: Source,
    datapoint_num: usize,
    condition: Condition,
}

impl RuleItem {
    pub fn new(
        id: impl Into<String>,
        a: Source,
        b: Source,
        datapoint_num: usize,
        condition: Condition,
    ) -> Result<Self, ConfigError> {
        if datapoint_num == 0 {
            return Err(ConfigError::ZeroDatapoints);
        }
        if datapoint_num > MAX_DATAPOINTS {
            return Err(ConfigError::TooManyDatapoints {
                requested: datapoint_num,
                max: MAX_DATAPOINTS,
            });
        }
        Ok(Self {
            id: id.into(),
            a,
            b,
            datapoint_num,
            condition,
        })
    }

    pub fn from_document(id: &str, document: &Value) -> Result<Self, ConfigError> {
        let build = || -> Result<Self, ConfigError> {
            let doc = RuleItemDocument::deserialize(document).map_err(ConfigError::document)?;
            Self::new(
                id,
                Source::from_document(&doc.a_type, &doc.a)?,
                Source::from_document(&doc.b_type, &doc.b)?,
                doc.datapoint_num,
                Condition::from_document(&doc.condition)?,
            )
        };
        build().map_err(|error| error.in_item(id))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn datapoint_num(&self) -> usize {
        self.datapoint_num
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn sources(&self) -> (&Source, &Source) {
        (&self.a, &self.b)
    }

    /// Fetch both sides over the same window and judge them.
    pub async fn evaluate(&self, ctx: &EvalContext) -> Result<ItemVerdict, SourceError> {
        let n = self.datapoint_num;
        let (start, end) = ctx.window(n);

        let a = self.a.fetch(n, &ctx.store, start, end).await?;
        let b = self.b.fetch(n, &ctx.store, start, end).await?;
        if a.len() != n || b.len() != n {
            warn!(
                item = %self.id,
                expected = n,
                a_len = a.len(),
                b_len = b.len(),
                "series length differs from datapoint_num"
            );
        }

        let b = b.align_to(&a);
        Ok(match self.condition.judge(&a, &b) {
            Some(breach) => ItemVerdict {
                triggered: true,
                message: breach.message,
            },
            None => ItemVerdict {
                triggered: false,
                message: String::new(),
            },
        })
    }
}

/// Notification payload for a rule whose equation held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub rule_name: String,
    pub equation: String,
    /// `(item id, message)` for the items that triggered, in declaration order.
    pub messages: Vec<(String, String)>,
}

impl AlertEvent {
    pub fn text(&self) -> String {
        let msg = self
            .messages
            .iter()
            .map(|(id, message)| format!("{id}: {message}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "name:{}, equation:{}, msg:{}",
            self.rule_name, self.equation, msg
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Delivery {
    NotTriggered,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub id: String,
    pub triggered: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub rule: String,
    pub triggered: bool,
    pub items: Vec<ItemOutcome>,
    pub delivery: Delivery,
}

impl RuleEvaluation {
    pub fn failed_items(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_some()).count()
    }
}

/// Named boolean combination of rule items with one notification target.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    items: Vec<RuleItem>,
    equation: Equation,
    dispatcher: Arc<Dispatcher>,
}

impl Rule {
    /// Validate and assemble a rule. Every identifier in the equation must
    /// name one of `items`.
    pub fn new(
        name: impl Into<String>,
        items: Vec<RuleItem>,
        equation: Equation,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if items.is_empty() {
            return Err(ConfigError::NoItems { rule: name });
        }
        if let Some(unknown) = equation
            .identifiers()
            .into_iter()
            .find(|ident| !items.iter().any(|item| item.id() == *ident))
        {
            return Err(ConfigError::UnknownItem {
                name: unknown.to_string(),
            });
        }

        Ok(Self {
            name,
            items,
            equation,
            dispatcher,
        })
    }

    pub fn from_document(
        document: &RuleDocument,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, ConfigError> {
        let items = document
            .rule_items
            .iter()
            .map(|(id, item)| RuleItem::from_document(id, item))
            .collect::<Result<Vec<_>, _>>()?;
        let equation = Equation::parse(&document.equation)?;
        Self::new(document.name.as_str(), items, equation, dispatcher)
    }

    /// Parse a serialized rule document.
    pub fn parse(text: &str, dispatcher: Arc<Dispatcher>) -> Result<Self, ConfigError> {
        Self::from_document(&RuleDocument::parse(text)?, dispatcher)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[RuleItem] {
        &self.items
    }

    pub fn equation(&self) -> &Equation {
        &self.equation
    }

    /// Evaluate every item, combine them with the equation and notify when
    /// it holds. A failing item counts as false; a failed delivery is
    /// reported but does not change `triggered`.
    pub async fn evaluate(&self, ctx: &EvalContext) -> RuleEvaluation {
        let mut outcomes = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let outcome = match item.evaluate(ctx).await {
                Ok(verdict) => ItemOutcome {
                    id: item.id().to_string(),
                    triggered: verdict.triggered,
                    message: verdict.message,
                    error: None,
                },
                Err(err) => {
                    error!(
                        rule = %self.name,
                        item = item.id(),
                        error = %err,
                        "rule item evaluation failed"
                    );
                    ItemOutcome {
                        id: item.id().to_string(),
                        triggered: false,
                        message: String::new(),
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let verdicts: HashMap<String, bool> = outcomes
            .iter()
            .map(|outcome| (outcome.id.clone(), outcome.triggered))
            .collect();
        let triggered = self.equation.evaluate(&verdicts);

        let delivery = if triggered {
            let event = self.alert_event(&outcomes);
            match self.dispatcher.send(&event.text()).await {
                Ok(()) => Delivery::Sent,
                Err(err) => {
                    error!(
                        rule = %self.name,
                        sender = self.dispatcher.sender_name(),
                        error = %err,
                        "alert delivery failed"
                    );
                    Delivery::Failed(err.to_string())
                }
            }
        } else {
            Delivery::NotTriggered
        };

        RuleEvaluation {
            rule: self.name.clone(),
            triggered,
            items: outcomes,
            delivery,
        }
    }

    fn alert_event(&self, outcomes: &[ItemOutcome]) -> AlertEvent {
        AlertEvent {
            rule_name: self.name.clone(),
            equation: self.equation.source().to_string(),
            messages: outcomes
                .iter()
                .filter(|outcome| outcome.triggered)
                .map(|outcome| (outcome.id.clone(), outcome.message.clone()))
                .collect(),
        }
    }
}
