//! Versioned schema migrations for the tickwatch warehouse.

use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_stock_prices",
        sql: r#"
CREATE TABLE IF NOT EXISTS stock_prices (
    ts TIMESTAMP NOT NULL,
    symbol TEXT NOT NULL,
    open_price DOUBLE,
    high DOUBLE,
    low DOUBLE,
    close_price DOUBLE,
    adj_close DOUBLE,
    volume DOUBLE,
    currency TEXT,
    stock_name TEXT,
    stock_type TEXT,

    sma5 DOUBLE,
    sma20 DOUBLE,
    sma50 DOUBLE,
    sma120 DOUBLE,
    sma200 DOUBLE,
    ema5 DOUBLE,
    ema20 DOUBLE,
    ema50 DOUBLE,
    ema120 DOUBLE,
    ema200 DOUBLE,

    macd DOUBLE,
    macd_signal DOUBLE,
    macd_hist DOUBLE,
    rsi7 DOUBLE,
    rsi14 DOUBLE,
    rsi28 DOUBLE,

    bb_upper DOUBLE,
    bb_middle DOUBLE,
    bb_lower DOUBLE,

    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, ts)
);
"#,
    },
    Migration {
        version: "0002_alert_rules",
        sql: r#"
CREATE TABLE IF NOT EXISTS alert_rules (
    name TEXT PRIMARY KEY,
    definition TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_stock_prices_symbol_ts ON stock_prices(symbol, ts);
"#,
    },
];

/// Apply every migration that has not been recorded in `schema_migrations` yet.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying warehouse migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let connection = Connection::open_in_memory().expect("in-memory duckdb");
        apply_migrations(&connection).expect("first run");
        apply_migrations(&connection).expect("second run");

        let applied: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count migrations");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
