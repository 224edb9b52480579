//! Behavior tests for the async/blocking dispatch bridge.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tickwatch_core::{Dispatcher, SendError, Sender};

use common::{dispatcher, RecordingSender};

#[test]
fn when_no_runtime_is_running_blocking_send_starts_one_and_reuses_it() {
    // Given: plain synchronous code
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = dispatcher(&sender);
    assert!(!dispatcher.has_fallback_runtime());

    // When: two blocking sends are made
    dispatcher.send_blocking("first").expect("first send");
    dispatcher.send_blocking("second").expect("second send");

    // Then: both are delivered over one private runtime
    assert!(dispatcher.has_fallback_runtime());
    assert_eq!(sender.sent(), ["first", "second"]);

    dispatcher.shutdown();
    assert!(!dispatcher.has_fallback_runtime());
    dispatcher.shutdown();
}

#[test]
fn after_shutdown_blocking_send_still_works() {
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = dispatcher(&sender);

    dispatcher.send_blocking("before").expect("send");
    dispatcher.shutdown();
    dispatcher.send_blocking("after").expect("send after shutdown");

    assert_eq!(sender.sent(), ["before", "after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inside_a_multi_thread_runtime_blocking_send_uses_the_current_runtime() {
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = dispatcher(&sender);

    dispatcher.send_blocking("from a worker").expect("send");

    assert_eq!(sender.sent(), ["from a worker"]);
    assert!(!dispatcher.has_fallback_runtime());
}

#[tokio::test(flavor = "current_thread")]
async fn inside_a_current_thread_runtime_blocking_send_is_refused() {
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = dispatcher(&sender);

    let result = dispatcher.send_blocking("would deadlock");

    assert_eq!(result, Err(SendError::BlockingInAsyncContext));
    assert!(sender.sent().is_empty());

    // The async path works on the same runtime.
    dispatcher.send("async").await.expect("async send");
    assert_eq!(sender.sent(), ["async"]);
}

#[tokio::test]
async fn when_the_sender_stalls_send_times_out() {
    let sender: Arc<dyn Sender> = Arc::new(RecordingSender::stalling(Duration::from_secs(5)));
    let dispatcher = Dispatcher::new(sender, Duration::from_millis(100));

    let result = dispatcher.send("slow").await;

    assert_eq!(result, Err(SendError::Timeout { timeout_ms: 100 }));
}

#[test]
fn dropping_a_dispatcher_inside_async_code_does_not_panic() {
    let sender = Arc::new(RecordingSender::new());
    let dispatcher = dispatcher(&sender);
    dispatcher.send_blocking("warm up").expect("send");
    assert!(dispatcher.has_fallback_runtime());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    runtime.block_on(async move {
        drop(dispatcher);
    });

    assert_eq!(sender.sent(), ["warm up"]);
}

#[test]
fn when_delivery_fails_blocking_send_returns_the_error() {
    let sender = Arc::new(RecordingSender::failing("bot was blocked"));
    let dispatcher = dispatcher(&sender);

    let result = dispatcher.send_blocking("hello");

    assert_eq!(
        result,
        Err(SendError::Rejected(String::from("bot was blocked")))
    );
}
