//! The query interface the engine reads rules and series from.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tickwatch_warehouse::{QueryGuardrails, QueryResult, Warehouse, WarehouseError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store call did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("store task failed: {0}")]
    Join(String),
}

/// Synchronous `execute(sql) -> rows with named columns`.
///
/// Implementations may block; [`StoreClient`] moves calls onto tokio's
/// blocking pool.
pub trait QueryStore: Send + Sync {
    fn execute(&self, sql: &str) -> Result<QueryResult, StoreError>;
}

/// [`QueryStore`] over a DuckDB [`Warehouse`], applying read-only guardrails
/// to every statement.
#[derive(Clone)]
pub struct WarehouseStore {
    warehouse: Warehouse,
    guardrails: QueryGuardrails,
}

impl WarehouseStore {
    pub fn new(warehouse: Warehouse, guardrails: QueryGuardrails) -> Self {
        Self {
            warehouse,
            guardrails,
        }
    }
}

impl QueryStore for WarehouseStore {
    fn execute(&self, sql: &str) -> Result<QueryResult, StoreError> {
        Ok(self.warehouse.execute_query(sql, self.guardrails)?)
    }
}

/// Shared async handle to a [`QueryStore`] with a per-call timeout.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn QueryStore>,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(store: Arc<dyn QueryStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Run one statement on the blocking pool.
    ///
    /// On timeout the caller stops waiting; the blocking call itself runs to
    /// completion in the background and its result is dropped.
    pub async fn execute(&self, sql: String) -> Result<QueryResult, StoreError> {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || store.execute(&sql));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Join(join.to_string())),
            Err(_) => Err(StoreError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_warehouse::WarehouseConfig;

    struct SlowStore;

    impl QueryStore for SlowStore {
        fn execute(&self, _sql: &str) -> Result<QueryResult, StoreError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(QueryResult::default())
        }
    }

    #[tokio::test]
    async fn slow_store_call_times_out() {
        let client = StoreClient::new(Arc::new(SlowStore), Duration::from_millis(20));
        let err = client
            .execute(String::from("SELECT 1"))
            .await
            .expect_err("must time out");
        assert!(matches!(err, StoreError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn warehouse_store_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig {
            db_path: dir.path().join("store.duckdb"),
            max_pool_size: 2,
        })
        .expect("warehouse");
        let client = StoreClient::new(
            Arc::new(WarehouseStore::new(warehouse, QueryGuardrails::default())),
            Duration::from_secs(5),
        );

        let ok = client
            .execute(String::from("SELECT 1 AS one"))
            .await
            .expect("select");
        assert_eq!(ok.row_count, 1);

        let err = client
            .execute(String::from("DELETE FROM alert_rules"))
            .await
            .expect_err("write rejected");
        assert!(matches!(
            err,
            StoreError::Warehouse(WarehouseError::QueryRejected(_))
        ));
    }
}
