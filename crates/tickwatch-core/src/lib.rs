//! # Tickwatch Core
//!
//! Alert rule engine for daily market data.
//!
//! ## Overview
//!
//! A rule combines several rule items with a boolean equation. Each rule item
//! compares two series (a warehouse query or a constant level) with either a
//! threshold or a crossing condition. When a rule's equation holds, one
//! notification is sent through the shared [`Dispatcher`].
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`condition`] | Threshold and crossing algorithms, operators, message templates |
//! | [`config`] | JSON application config with environment overrides |
//! | [`dispatch`] | Async/blocking bridge in front of a sender |
//! | [`domain`] | Symbols, identifiers, timestamps, time series |
//! | [`engine`] | Loads stored rules and evaluates them once per tick |
//! | [`equation`] | Boolean equation parser and evaluator |
//! | [`error`] | Rule document and validation errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`retry`] | Backoff policy for sends |
//! | [`rule`] | Rule items, rules, evaluation results |
//! | [`sender`] | Telegram and log senders |
//! | [`source`] | Query and constant series sources |
//! | [`store`] | Query interface over the warehouse |
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  SELECT definition  ┌──────────────┐
//! │ AlertEngine  │────────────────────▶│ QueryStore   │
//! └──────┬───────┘                     └──────▲───────┘
//!        │ per rule (own task)                │ fetch A / B
//!        ▼                                    │
//! ┌──────────────┐   items   ┌──────────────┐ │
//! │ Rule         │──────────▶│ RuleItem     │─┘
//! │ (equation)   │◀──────────│ (Condition)  │
//! └──────┬───────┘  verdicts └──────────────┘
//!        │ equation true
//!        ▼
//! ┌──────────────┐          ┌──────────────┐
//! │ Dispatcher   │─────────▶│ Sender       │
//! └──────────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tickwatch_core::{
//!     Dispatcher, EvalContext, LogSender, QueryGuardrails, Rule, StoreClient, Warehouse,
//!     WarehouseStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let store = StoreClient::new(
//!         Arc::new(WarehouseStore::new(warehouse, QueryGuardrails::default())),
//!         Duration::from_secs(10),
//!     );
//!     let dispatcher = Arc::new(Dispatcher::new(Arc::new(LogSender), Duration::from_secs(5)));
//!
//!     let rule = Rule::parse(
//!         r#"{"name": "aapl-rsi", "equation": "low",
//!             "ruleItems": {"low": {"datapoint_num": 3,
//!               "AType": "sql", "A": {"stock": "AAPL", "field": "rsi14", "table": "stock_prices"},
//!               "BType": "const", "B": {"threshold": 30},
//!               "condition": {"type": "normal_threshold", "value": "A < B",
//!                             "msg": "{} rsi {:.1} below {}"}}}}"#,
//!         dispatcher,
//!     )?;
//!
//!     let evaluation = rule.evaluate(&EvalContext::new(store)).await;
//!     println!("{} triggered: {}", evaluation.rule, evaluation.triggered);
//!     Ok(())
//! }
//! ```

pub mod condition;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod equation;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod rule;
pub mod sender;
pub mod source;
pub mod store;

// Conditions
pub use condition::{
    direction_threshold, threshold, Breach, Condition, ConditionKind, MessageTemplate, Operator,
};

// Configuration
pub use config::{AppConfig, AppConfigError, LogFormat, SenderSection};

// Dispatch and senders
pub use dispatch::Dispatcher;
pub use sender::{LogSender, SendError, SendFuture, Sender, TelegramConfig, TelegramSender};

// Domain
pub use domain::{Identifier, Symbol, TimeSeries, Timestamp};

// Engine
pub use engine::{AlertEngine, EngineConfig, EngineError, SkippedRule, TickReport};

// Equations
pub use equation::{Equation, EquationError, MAX_DEPTH};

// Errors
pub use error::{ConfigError, ValidationError};

// HTTP and retry
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use retry::{Backoff, RetryConfig};

// Rules
pub use rule::{
    AlertEvent, Delivery, EvalContext, ItemOutcome, ItemVerdict, Rule, RuleDocument,
    RuleEvaluation, RuleItem, MAX_DATAPOINTS,
};

// Sources and store
pub use source::{ConstantSource, QuerySource, QueryTemplate, Source, SourceError, SourceKind};
pub use store::{QueryStore, StoreClient, StoreError, WarehouseStore};

// Warehouse (re-exported from tickwatch-warehouse)
pub use tickwatch_warehouse::{
    PriceRecord, QueryGuardrails, QueryResult, RuleRecord, SqlColumn, Warehouse, WarehouseConfig,
    WarehouseError,
};
