//! Behavior tests for rule items and rules.
//!
//! These tests verify what a rule does end to end against an in-memory
//! store: which items fire, what the combined verdict is, and what text
//! reaches the sender.

mod common;

use std::sync::Arc;

use serde_json::json;
use tickwatch_core::{ConfigError, Delivery, Rule, RuleDocument, RuleItem, MAX_DATAPOINTS};

use common::{const_item, context, dispatcher, market, watch_rule, FakeStore, RecordingSender};

fn build(document: serde_json::Value, sender: &Arc<RecordingSender>) -> Rule {
    let document = RuleDocument::from_value(document).expect("document");
    Rule::from_document(&document, dispatcher(sender)).expect("rule")
}

// =============================================================================
// Rule items
// =============================================================================

#[tokio::test]
async fn when_close_dips_below_level_item_reports_breach_message() {
    // Given: closes 12, 9, 11 against a constant level of 10
    let store = Arc::new(market());
    let document = const_item("close", 10.0, "A < B", "{} close {} below {}");
    let item = RuleItem::from_document("x", &document).expect("item");

    // When: the item is evaluated
    let verdict = item.evaluate(&context(&store)).await.expect("verdict");

    // Then: it fires at the first dip with the breach point in the message
    assert!(verdict.triggered);
    assert_eq!(verdict.message, "2024-03-02 close 9.0 below 10.0");
}

#[tokio::test]
async fn when_only_constant_sources_are_used_the_store_is_not_queried() {
    let store = Arc::new(FakeStore::new());
    let item = RuleItem::from_document(
        "flat",
        &json!({
            "datapoint_num": 4,
            "AType": "const", "A": {"threshold": 1},
            "BType": "const", "B": {"threshold": 2},
            "condition": {"type": "normal_threshold", "value": "A<B", "msg": "{} {} {}"}
        }),
    )
    .expect("item");

    let verdict = item.evaluate(&context(&store)).await.expect("verdict");

    assert!(verdict.triggered);
    assert_eq!(verdict.message, "2024-03-02 1.0 2.0");
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn when_a_source_query_fails_item_returns_the_error() {
    let store = Arc::new(FakeStore::new().with_failure(" close FROM", "disk on fire"));
    let item = RuleItem::from_document("x", &const_item("close", 10.0, "A < B", "{}"))
        .expect("item");

    let error = item.evaluate(&context(&store)).await.unwrap_err();

    assert!(error.to_string().contains("disk on fire"));
}

#[test]
fn when_datapoint_num_is_zero_item_is_rejected() {
    let mut document = const_item("close", 10.0, "A < B", "{}");
    document["datapoint_num"] = json!(0);

    let error = RuleItem::from_document("x", &document).unwrap_err();
    assert!(error.to_string().contains("datapoint_num"));
}

#[test]
fn when_datapoint_num_is_too_large_item_is_rejected() {
    // Given: an item asking for far more points than any window allows
    let mut document = const_item("close", 10.0, "A < B", "{}");
    document["datapoint_num"] = json!(1_000_000_000_000_u64);

    // When: the item is built
    let error = RuleItem::from_document("x", &document).unwrap_err();

    // Then: it is rejected before any query runs
    assert!(matches!(
        error,
        ConfigError::Item { ref source, .. }
            if matches!(**source, ConfigError::TooManyDatapoints { max: MAX_DATAPOINTS, .. })
    ));
    assert!(error.to_string().contains("exceeds the maximum"));
}

#[test]
fn when_source_type_is_unknown_item_is_rejected() {
    let mut document = const_item("close", 10.0, "A < B", "{}");
    document["BType"] = json!("csv");

    let error = RuleItem::from_document("x", &document).unwrap_err();
    assert!(matches!(error, ConfigError::Item { ref id, .. } if id == "x"));
}

// =============================================================================
// Rules
// =============================================================================

#[tokio::test]
async fn when_equation_holds_exactly_one_notification_carries_the_firing_item() {
    // Given: x fires, y does not, equation "x and not y"
    let store = Arc::new(market());
    let sender = Arc::new(RecordingSender::new());
    let rule = build(watch_rule("aapl-watch", "x and not y"), &sender);

    // When: the rule is evaluated
    let evaluation = rule.evaluate(&context(&store)).await;

    // Then: one notification with x's message only
    assert!(evaluation.triggered);
    assert_eq!(evaluation.delivery, Delivery::Sent);
    assert_eq!(
        sender.sent(),
        vec![String::from(
            "name:aapl-watch, equation:x and not y, msg:x: 2024-03-02 close 9.0 below 10.0"
        )]
    );
}

#[tokio::test]
async fn when_equation_does_not_hold_nothing_is_sent() {
    let store = Arc::new(market());
    let sender = Arc::new(RecordingSender::new());
    let rule = build(watch_rule("aapl-watch", "x and y"), &sender);

    let evaluation = rule.evaluate(&context(&store)).await;

    assert!(!evaluation.triggered);
    assert_eq!(evaluation.delivery, Delivery::NotTriggered);
    assert!(sender.sent().is_empty());
    let fired: Vec<_> = evaluation
        .items
        .iter()
        .map(|item| (item.id.as_str(), item.triggered))
        .collect();
    assert_eq!(fired, [("x", true), ("y", false)]);
}

#[tokio::test]
async fn repeated_evaluation_on_the_same_data_gives_the_same_result() {
    let store = Arc::new(market());
    let sender = Arc::new(RecordingSender::new());
    let rule = build(watch_rule("aapl-watch", "x or y"), &sender);
    let ctx = context(&store);

    let first = rule.evaluate(&ctx).await;
    let second = rule.evaluate(&ctx).await;

    assert_eq!(first, second);
    // Stateless across passes: a persistent breach fires every time.
    let sent = sender.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test]
async fn when_an_item_fails_it_counts_as_false_and_the_rest_still_run() {
    let store = Arc::new(
        FakeStore::new()
            .with_failure(" rsi14 FROM", "timeout upstream")
            .with_series(
                "close",
                &[("2024-03-01", 12.0), ("2024-03-02", 9.0), ("2024-03-03", 11.0)],
            ),
    );
    let sender = Arc::new(RecordingSender::new());
    let rule = build(watch_rule("aapl-watch", "x and not y"), &sender);

    let evaluation = rule.evaluate(&context(&store)).await;

    assert!(evaluation.triggered);
    assert_eq!(evaluation.failed_items(), 1);
    let y = evaluation.items.iter().find(|item| item.id == "y").expect("y");
    assert!(!y.triggered);
    assert!(y.error.as_deref().is_some_and(|error| error.contains("timeout upstream")));
    assert_eq!(sender.sent().len(), 1);
}

#[tokio::test]
async fn when_delivery_fails_the_rule_still_reports_triggered() {
    let store = Arc::new(market());
    let sender = Arc::new(RecordingSender::failing("chat not found"));
    let rule = build(watch_rule("aapl-watch", "x"), &sender);

    let evaluation = rule.evaluate(&context(&store)).await;

    assert!(evaluation.triggered);
    assert!(matches!(
        evaluation.delivery,
        Delivery::Failed(ref reason) if reason.contains("chat not found")
    ));
}

#[tokio::test]
async fn alert_lists_triggered_items_in_declaration_order() {
    let store = Arc::new(market());
    let sender = Arc::new(RecordingSender::new());
    let rule = build(
        json!({
            "name": "two",
            "equation": "b_item or a_item",
            "ruleItems": {
                "b_item": const_item("close", 100.0, "A < B", "b {}"),
                "a_item": const_item("rsi14", 50.0, "A <= B", "a {}")
            }
        }),
        &sender,
    );

    rule.evaluate(&context(&store)).await;

    assert_eq!(
        sender.sent(),
        vec![String::from(
            "name:two, equation:b_item or a_item, msg:b_item: b 2024-03-01, a_item: a 2024-03-01"
        )]
    );
}

#[test]
fn when_equation_names_an_undeclared_item_rule_is_rejected() {
    let sender = Arc::new(RecordingSender::new());
    let document = RuleDocument::from_value(watch_rule("bad", "x and z")).expect("document");

    let error = Rule::from_document(&document, dispatcher(&sender)).unwrap_err();
    assert_eq!(error, ConfigError::UnknownItem { name: String::from("z") });
}

#[test]
fn when_equation_contains_code_rule_is_rejected() {
    let sender = Arc::new(RecordingSender::new());
    let document = watch_rule("bad", "__import__('os').system('x')");
    let document = RuleDocument::from_value(document).expect("document");

    let error = Rule::from_document(&document, dispatcher(&sender)).unwrap_err();
    assert!(matches!(error, ConfigError::Equation(_)));
}
