//! # Tickwatch Warehouse
//!
//! DuckDB-backed storage and query interface for tickwatch.
//!
//! The alert engine treats this crate as an external collaborator: it only
//! needs `execute_query(sql) -> rows with named columns`. The remaining entry
//! points exist so operators and tests can seed prices and rule documents.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickwatch_warehouse::{QueryGuardrails, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let result = warehouse.execute_query(
//!         "SELECT ts, close_price FROM stock_prices WHERE symbol = 'AAPL' ORDER BY ts",
//!         QueryGuardrails::default(),
//!     )?;
//!     println!("Found {} rows", result.row_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `stock_prices` | Daily prices plus precomputed indicator columns |
//! | `alert_rules` | One serialized rule document per row |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{Connection, Statement, ToSql};
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

pub use duckdb::{ConnectionPool, PooledConnection};

/// Indicator columns of `stock_prices` that [`Warehouse::ingest_prices`] may fill.
pub const INDICATOR_COLUMNS: &[&str] = &[
    "sma5",
    "sma20",
    "sma50",
    "sma120",
    "sma200",
    "ema5",
    "ema20",
    "ema50",
    "ema120",
    "ema200",
    "macd",
    "macd_signal",
    "macd_hist",
    "rsi7",
    "rsi14",
    "rsi28",
    "bb_upper",
    "bb_middle",
    "bb_lower",
];

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Query was rejected due to policy violation.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// Query execution timed out.
    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// A record failed validation before it reached the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_tickwatch_home().join("warehouse.duckdb"),
            max_pool_size: 4,
        }
    }
}

/// Guardrails for query execution to prevent resource exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    /// Maximum number of rows to return.
    pub max_rows: usize,
    /// Query timeout in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max_rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "query_timeout_ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Column metadata for query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlColumn {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Result of a SQL query execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column definitions.
    pub columns: Vec<SqlColumn>,
    /// Row data as JSON values. Timestamps are rendered as
    /// `YYYY-MM-DD HH:MM:SS` strings and dates as `YYYY-MM-DD`.
    pub rows: Vec<Vec<Value>>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Whether results were truncated due to `max_rows`.
    pub truncated: bool,
}

impl QueryResult {
    /// Build a result from column names and rows. Column types are left blank.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|name| SqlColumn {
                name: name.into(),
                r#type: String::new(),
            })
            .collect();
        Self {
            columns,
            row_count: rows.len(),
            rows,
            truncated: false,
        }
    }

    /// Position of the column named `name`, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Iterate over the values of one column.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| row.get(index).unwrap_or(&Value::Null))
    }
}

/// One daily price row for `stock_prices`.
#[derive(Debug, Clone)]
pub struct PriceRecord {
    /// Stock symbol (e.g., "AAPL").
    pub symbol: String,
    /// Row timestamp, `YYYY-MM-DD` or ISO 8601.
    pub ts: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: Option<f64>,
    pub currency: String,
    pub name: String,
    pub stock_type: String,
    /// Precomputed indicator values keyed by a name from [`INDICATOR_COLUMNS`].
    pub indicators: Vec<(String, f64)>,
}

/// A stored rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRecord {
    pub name: String,
    pub definition: String,
}

/// The warehouse interface for prices and rule documents.
#[derive(Clone)]
pub struct Warehouse {
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration, applying migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let pool = ConnectionPool::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    /// Execute a read-only SQL query with guardrails.
    ///
    /// Only a single `SELECT`/CTE-like statement is accepted.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.validate()?;
        let sql = normalize_sql(sql)?;
        enforce_read_only_query(sql)?;

        let connection = self.pool.acquire()?;
        execute_select_query(&connection, sql, guardrails)
    }

    /// Upsert daily price rows, including any provided indicator columns.
    pub fn ingest_prices(&self, rows: &[PriceRecord]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        for row in rows {
            for (column, _) in &row.indicators {
                if !INDICATOR_COLUMNS.contains(&column.as_str()) {
                    return Err(WarehouseError::InvalidRecord(format!(
                        "unknown indicator column '{column}'"
                    )));
                }
            }
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 11] = [
                    &row.ts,
                    &row.symbol,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.adj_close,
                    &row.volume,
                    &row.currency,
                    &row.name,
                    &row.stock_type,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO stock_prices \
                     (ts, symbol, open_price, high, low, close_price, adj_close, volume, \
                      currency, stock_name, stock_type, updated_at) \
                     VALUES (CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;

                for (column, value) in &row.indicators {
                    // Column names are checked against INDICATOR_COLUMNS above.
                    let update_sql = format!(
                        "UPDATE stock_prices SET {column} = ? \
                         WHERE symbol = ? AND ts = CAST(? AS TIMESTAMP)"
                    );
                    let params: [&dyn ToSql; 3] = [value, &row.symbol, &row.ts];
                    connection.execute(update_sql.as_str(), params.as_slice())?;
                }
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Insert or replace a rule document under `name`.
    pub fn upsert_rule(&self, name: &str, definition: &str) -> Result<(), WarehouseError> {
        if name.trim().is_empty() {
            return Err(WarehouseError::InvalidRecord(String::from(
                "rule name must not be empty",
            )));
        }

        let connection = self.pool.acquire()?;
        let params: [&dyn ToSql; 2] = [&name, &definition];
        connection.execute(
            "INSERT OR REPLACE INTO alert_rules (name, definition, updated_at) \
             VALUES (?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        tracing::debug!(rule = name, "stored rule document");
        Ok(())
    }

    /// List stored rule documents ordered by name.
    pub fn list_rules(&self) -> Result<Vec<RuleRecord>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement =
            connection.prepare("SELECT name, definition FROM alert_rules ORDER BY name")?;
        let records = statement
            .query_map([], |row| {
                Ok(RuleRecord {
                    name: row.get(0)?,
                    definition: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Execute a SELECT query and collect results within the guardrails.
fn execute_select_query(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
) -> Result<QueryResult, WarehouseError> {
    let started = Instant::now();
    let mut statement = connection.prepare(sql)?;
    let mut rows_cursor = statement.query([] as [&dyn ToSql; 0])?;

    let columns = rows_cursor.as_ref().map(column_metadata).unwrap_or_default();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows_cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;

        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }

        rows.push(read_row(row, column_count)?);
    }

    ensure_timeout(started, guardrails.timeout())?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn column_metadata(statement: &Statement<'_>) -> Vec<SqlColumn> {
    (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map_or_else(|_| format!("column_{index}"), ToString::to_string),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

fn read_row(row: &::duckdb::Row<'_>, column_count: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

/// Convert a DuckDB value to a JSON value.
fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        DuckValue::Timestamp(unit, value) => timestamp_to_json(unit, value),
        DuckValue::Date32(days) => date_to_json(days),
        other => Value::String(format!("{other:?}")),
    }
}

/// Convert an f64 to a JSON number, returning Null for NaN/Inf.
fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn timestamp_to_json(unit: TimeUnit, value: i64) -> Value {
    let nanos = i128::from(value)
        * match unit {
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Nanosecond => 1,
        };
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|ts| ts.format(format).ok())
        .map_or(Value::Null, Value::String)
}

fn date_to_json(days: i32) -> Value {
    let format = format_description!("[year]-[month]-[day]");
    OffsetDateTime::UNIX_EPOCH
        .checked_add(time::Duration::days(i64::from(days)))
        .and_then(|ts| ts.format(format).ok())
        .map_or(Value::Null, Value::String)
}

fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim().trim_end_matches(';').trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized)
}

/// Enforce that a query is a single read-only statement.
fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "only SELECT/CTE queries are accepted",
        )));
    }
    if has_multiple_statements(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed",
        )));
    }
    Ok(())
}

fn is_select_like(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    )
}

fn has_multiple_statements(sql: &str) -> bool {
    sql.split(';')
        .filter(|part| !part.trim().is_empty())
        .count()
        > 1
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

/// Resolve the tickwatch home directory from `TICKWATCH_HOME`, then `$HOME/.tickwatch`.
pub fn resolve_tickwatch_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKWATCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickwatch");
    }

    PathBuf::from(".tickwatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp_warehouse(temp: &tempfile::TempDir) -> Warehouse {
        Warehouse::open(WarehouseConfig {
            db_path: temp.path().join("warehouse.duckdb"),
            max_pool_size: 2,
        })
        .expect("warehouse open")
    }

    fn price(symbol: &str, ts: &str, close: f64) -> PriceRecord {
        PriceRecord {
            symbol: symbol.to_string(),
            ts: ts.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: Some(close),
            volume: Some(1_000.0),
            currency: "USD".to_string(),
            name: symbol.to_string(),
            stock_type: "STOCK".to_string(),
            indicators: Vec::new(),
        }
    }

    #[test]
    fn initializes_tables() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        let query = warehouse
            .execute_query(
                "SELECT COUNT(*) AS c FROM information_schema.tables WHERE table_name IN ('stock_prices', 'alert_rules')",
                QueryGuardrails::default(),
            )
            .expect("query");
        assert_eq!(query.rows[0][0], Value::Number(Number::from(2)));
    }

    #[test]
    fn rejects_write_statements() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        let error = warehouse
            .execute_query("DROP TABLE stock_prices", QueryGuardrails::default())
            .expect_err("should reject");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));

        let error = warehouse
            .execute_query(
                "SELECT 1; DELETE FROM alert_rules",
                QueryGuardrails::default(),
            )
            .expect_err("should reject");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));
    }

    #[test]
    fn prices_round_trip_with_rendered_timestamps() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        let mut first = price("AAPL", "2024-03-01", 180.5);
        first.indicators.push(("sma20".to_string(), 175.25));
        warehouse
            .ingest_prices(&[first, price("AAPL", "2024-03-04", 182.0)])
            .expect("ingest");

        let result = warehouse
            .execute_query(
                "SELECT ts, close_price, sma20 FROM stock_prices WHERE symbol = 'AAPL' ORDER BY ts",
                QueryGuardrails::default(),
            )
            .expect("query");

        assert_eq!(result.row_count, 2);
        assert_eq!(result.column_index("CLOSE_PRICE"), Some(1));
        assert_eq!(result.rows[0][0], Value::String("2024-03-01 00:00:00".to_string()));
        assert_eq!(result.rows[0][2], number_from_f64(175.25));
        assert_eq!(result.rows[1][2], Value::Null);
    }

    #[test]
    fn unknown_indicator_columns_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        let mut row = price("MSFT", "2024-03-01", 400.0);
        row.indicators
            .push(("close_price = 0; --".to_string(), 1.0));
        let error = warehouse.ingest_prices(&[row]).expect_err("should reject");
        assert!(matches!(error, WarehouseError::InvalidRecord(_)));
    }

    #[test]
    fn rule_documents_are_upserted_by_name() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        warehouse.upsert_rule("rsi", "{\"v\":1}").expect("first");
        warehouse.upsert_rule("rsi", "{\"v\":2}").expect("second");
        warehouse.upsert_rule("cross", "{}").expect("third");

        let rules = warehouse.list_rules().expect("list");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].name, "rsi");
        assert_eq!(rules[1].definition, "{\"v\":2}");
    }

    #[test]
    fn truncates_at_max_rows() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp_warehouse(&temp);

        let result = warehouse
            .execute_query(
                "SELECT * FROM range(10)",
                QueryGuardrails {
                    max_rows: 3,
                    query_timeout_ms: 5_000,
                },
            )
            .expect("query");
        assert_eq!(result.row_count, 3);
        assert!(result.truncated);
    }

    #[test]
    fn dates_render_without_time() {
        assert_eq!(date_to_json(0), Value::String("1970-01-01".to_string()));
        assert_eq!(
            timestamp_to_json(TimeUnit::Second, 86_400 + 3_600),
            Value::String("1970-01-02 01:00:00".to_string())
        );
    }
}
