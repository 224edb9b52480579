//! Shared fakes for the behavior tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tickwatch_core::{
    Dispatcher, EvalContext, QueryResult, QueryStore, SendError, SendFuture, Sender,
    StoreClient, StoreError, Timestamp,
};

/// Canned answers keyed by a fragment of the SQL text.
#[derive(Default)]
pub struct FakeStore {
    answers: Mutex<Vec<(String, Answer)>>,
    calls: AtomicUsize,
}

#[derive(Clone)]
enum Answer {
    Rows(QueryResult),
    Fail(String),
    Slow(Duration, QueryResult),
    Panic,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements selecting `field` with `(ts, value)` rows.
    pub fn with_series(self, field: &str, rows: &[(&str, f64)]) -> Self {
        let rows = rows
            .iter()
            .map(|(ts, value)| vec![json!(ts), json!(value)])
            .collect();
        self.answer(
            format!(" {field} FROM"),
            Answer::Rows(QueryResult::from_rows(["ts", field], rows)),
        )
    }

    pub fn with_failure(self, fragment: &str, message: &str) -> Self {
        self.answer(fragment.to_string(), Answer::Fail(message.to_string()))
    }

    pub fn with_slow_series(self, field: &str, delay: Duration) -> Self {
        self.answer(
            format!(" {field} FROM"),
            Answer::Slow(delay, QueryResult::from_rows(["ts", field], Vec::new())),
        )
    }

    pub fn with_panic(self, fragment: &str) -> Self {
        self.answer(fragment.to_string(), Answer::Panic)
    }

    /// Answer `SELECT definition FROM alert_rules` with the given documents.
    pub fn with_rules(self, documents: Vec<Value>) -> Self {
        let rows = documents
            .into_iter()
            .map(|document| match document {
                Value::String(_) => vec![document],
                other => vec![Value::String(other.to_string())],
            })
            .collect();
        self.answer(
            String::from("FROM alert_rules"),
            Answer::Rows(QueryResult::from_rows(["definition"], rows)),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(self, fragment: String, answer: Answer) -> Self {
        self.answers
            .lock()
            .expect("answers lock")
            .push((fragment, answer));
        self
    }
}

impl QueryStore for FakeStore {
    fn execute(&self, sql: &str) -> Result<QueryResult, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .expect("answers lock")
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, answer)| answer.clone());

        match answer {
            Some(Answer::Rows(result)) => Ok(result),
            Some(Answer::Fail(message)) => Err(StoreError::Backend(message)),
            Some(Answer::Slow(delay, result)) => {
                std::thread::sleep(delay);
                Ok(result)
            }
            Some(Answer::Panic) => panic!("store exploded on: {sql}"),
            None => Err(StoreError::Backend(format!("no canned answer for: {sql}"))),
        }
    }
}

/// Records every notification; optionally fails or stalls.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<String>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    panics: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn stalling(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl Sender for RecordingSender {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panics {
                panic!("sender exploded");
            }
            if let Some(message) = &self.fail_with {
                return Err(SendError::Rejected(message.clone()));
            }
            self.sent.lock().expect("sent lock").push(text.to_string());
            Ok(())
        })
    }
}

pub fn dispatcher(sender: &Arc<RecordingSender>) -> Arc<Dispatcher> {
    let sender: Arc<dyn Sender> = Arc::clone(sender) as Arc<dyn Sender>;
    Arc::new(Dispatcher::new(sender, Duration::from_secs(2)))
}

pub fn context(store: &Arc<FakeStore>) -> EvalContext {
    let store: Arc<dyn QueryStore> = Arc::clone(store) as Arc<dyn QueryStore>;
    EvalContext::new(StoreClient::new(store, Duration::from_secs(2)))
        .at(Timestamp::parse("2024-03-05").expect("now"))
}

/// A rule item comparing `field` of AAPL against a constant level.
pub fn const_item(field: &str, level: f64, operator: &str, msg: &str) -> Value {
    json!({
        "datapoint_num": 3,
        "AType": "sql",
        "A": {"stock": "AAPL", "field": field, "table": "stock_prices"},
        "BType": "const",
        "B": {"threshold": level},
        "condition": {"type": "normal_threshold", "value": operator, "msg": msg}
    })
}

/// Three daily closes that dip below 10 on 2024-03-02 and RSI values that
/// stay under 30.
pub fn market() -> FakeStore {
    FakeStore::new()
        .with_series(
            "close",
            &[("2024-03-01", 12.0), ("2024-03-02", 9.0), ("2024-03-03", 11.0)],
        )
        .with_series(
            "rsi14",
            &[("2024-03-01", 20.0), ("2024-03-02", 25.0), ("2024-03-03", 28.0)],
        )
}

/// `x`: close dipped below 10 (true). `y`: RSI rose above 30 (false).
pub fn watch_rule(name: &str, equation: &str) -> Value {
    json!({
        "name": name,
        "equation": equation,
        "ruleItems": {
            "x": const_item("close", 10.0, "A < B", "{} close {} below {}"),
            "y": const_item("rsi14", 30.0, "A > B", "{} rsi {} above {}")
        }
    })
}
