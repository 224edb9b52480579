//! Series providers: live warehouse queries and synthetic constants.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::Date;
use tracing::debug;

use crate::domain::{Identifier, Symbol, TimeSeries, Timestamp};
use crate::store::{StoreClient, StoreError};
use crate::ConfigError;

/// Query used when a source document has no `sql` of its own.
pub const DEFAULT_QUERY_TEMPLATE: &str = "SELECT ts, {field} FROM {table} WHERE symbol = '{symbol}' AND ts >= '{start}' AND ts <= '{end}' ORDER BY ts";

/// Column every query source must return alongside its value column.
pub const TIMESTAMP_COLUMN: &str = "ts";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Store(StoreError),

    #[error("store query did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("query result has no column '{column}'")]
    MissingColumn { column: String },

    #[error("row {row}: value {value} in column '{column}' is not numeric")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("row {row}: '{value}' is not a timestamp")]
    InvalidTimestamp { row: usize, value: String },
}

impl From<StoreError> for SourceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Query,
    Constant,
}

impl SourceKind {
    pub fn parse(tag: &str) -> Result<Self, ConfigError> {
        match tag.trim() {
            "sql" => Ok(Self::Query),
            "const" => Ok(Self::Constant),
            other => Err(ConfigError::UnsupportedSource {
                tag: other.to_string(),
            }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "sql",
            Self::Constant => "const",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlPart {
    Literal(String),
    Table,
    Symbol,
    Field,
    Start,
    End,
}

/// SQL text with `{table}`, `{symbol}`, `{field}`, `{start}` and `{end}`
/// placeholders. Bare `{}` fill `table, symbol, start, end` in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    source: String,
    parts: Vec<SqlPart>,
}

impl QueryTemplate {
    const POSITIONAL: [SqlPart; 4] = [SqlPart::Table, SqlPart::Symbol, SqlPart::Start, SqlPart::End];

    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTemplate {
            template: source.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut positional = 0_usize;
        let mut rest = source;

        while let Some(open) = rest.find(['{', '}']) {
            literal.push_str(&rest[..open]);
            let tail = &rest[open..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                literal.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                return Err(invalid(String::from("single '}' must be escaped as '}}'")));
            }

            let close = tail
                .find('}')
                .ok_or_else(|| invalid(String::from("unclosed '{'")))?;
            let part = match tail[1..close].trim() {
                "" => {
                    let part = Self::POSITIONAL.get(positional).cloned().ok_or_else(|| {
                        invalid(String::from("at most four '{}' placeholders are allowed"))
                    })?;
                    positional += 1;
                    part
                }
                "table" => SqlPart::Table,
                "symbol" | "stock" => SqlPart::Symbol,
                "field" => SqlPart::Field,
                "start" => SqlPart::Start,
                "end" => SqlPart::End,
                other => return Err(invalid(format!("unknown placeholder '{{{other}}}'"))),
            };

            if !literal.is_empty() {
                parts.push(SqlPart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(part);
            rest = &tail[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(SqlPart::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn render(&self, query: &QuerySource, start: &str, end: &str) -> String {
        let symbol = query.symbol.as_str().replace('\'', "''");
        let mut sql = String::with_capacity(self.source.len() + 64);
        for part in &self.parts {
            match part {
                SqlPart::Literal(text) => sql.push_str(text),
                SqlPart::Table => sql.push_str(query.table.as_str()),
                SqlPart::Symbol => sql.push_str(&symbol),
                SqlPart::Field => sql.push_str(query.field.as_str()),
                SqlPart::Start => sql.push_str(start),
                SqlPart::End => sql.push_str(end),
            }
        }
        sql
    }
}

/// Live series read from the warehouse for one symbol and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySource {
    template: QueryTemplate,
    symbol: Symbol,
    field: Identifier,
    table: Identifier,
}

#[derive(Debug, Deserialize)]
struct QuerySourceDocument {
    #[serde(default)]
    sql: Option<String>,
    #[serde(alias = "stock_symbol", alias = "symbol")]
    stock: String,
    field: String,
    table: String,
}

impl QuerySource {
    pub fn new(
        template: QueryTemplate,
        symbol: Symbol,
        field: Identifier,
        table: Identifier,
    ) -> Self {
        Self {
            template,
            symbol,
            field,
            table,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn field(&self) -> &Identifier {
        &self.field
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// SQL issued for the window `start..=end`.
    pub fn sql(&self, start: Date, end: Date) -> String {
        let start = Timestamp::from_date(start).to_string();
        let end = Timestamp::from_date(end).to_string();
        self.template.render(self, &start, &end)
    }

    async fn fetch(
        &self,
        n: usize,
        store: &StoreClient,
        start: Date,
        end: Date,
    ) -> Result<TimeSeries, SourceError> {
        let sql = self.sql(start, end);
        debug!(symbol = %self.symbol, field = %self.field, %sql, "querying source");
        let result = store.execute(sql).await?;

        let column_index = |name: &str| {
            result
                .column_index(name)
                .ok_or_else(|| SourceError::MissingColumn {
                    column: name.to_string(),
                })
        };
        let value_index = column_index(self.field.as_str())?;
        let ts_index = column_index(TIMESTAMP_COLUMN)?;

        let points = result
            .column_values(ts_index)
            .zip(result.column_values(value_index))
            .enumerate()
            .map(|(row, (ts, value))| -> Result<(Timestamp, f64), SourceError> {
                Ok((
                    parse_timestamp(row, ts)?,
                    parse_value(self.field.as_str(), row, value)?,
                ))
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        Ok(TimeSeries::from_points(points).last(n))
    }
}

fn parse_timestamp(row: usize, value: &Value) -> Result<Timestamp, SourceError> {
    let invalid = || SourceError::InvalidTimestamp {
        row,
        value: value.to_string(),
    };
    match value {
        Value::String(text) => Timestamp::parse(text).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// `NULL` becomes NaN so positions stay aligned and comparisons fail there.
fn parse_value(column: &str, row: usize, value: &Value) -> Result<f64, SourceError> {
    let invalid = || SourceError::InvalidValue {
        column: column.to_string(),
        row,
        value: value.to_string(),
    };
    match value {
        Value::Null => Ok(f64::NAN),
        Value::Number(number) => number.as_f64().ok_or_else(invalid),
        Value::String(text) => text.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// A fixed level repeated over the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantSource {
    threshold: f64,
}

#[derive(Debug, Deserialize)]
struct ConstantSourceDocument {
    threshold: f64,
}

impl ConstantSource {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `n` copies of the threshold, one per day, ending on `end`.
    pub fn series(&self, n: usize, end: Date) -> TimeSeries {
        let end = Timestamp::from_date(end);
        TimeSeries::from_points((0..n).map(|i| {
            let back = i64::try_from(n - 1 - i).unwrap_or(i64::MAX);
            (end.days_before(back), self.threshold)
        }))
    }
}

/// One side of a rule item comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Query(QuerySource),
    Constant(ConstantSource),
}

impl Source {
    /// Build a source from its `AType`/`BType` tag and document object.
    pub fn from_document(tag: &str, document: &Value) -> Result<Self, ConfigError> {
        match SourceKind::parse(tag)? {
            SourceKind::Query => {
                let doc = QuerySourceDocument::deserialize(document)
                    .map_err(ConfigError::document)?;
                let template = QueryTemplate::parse(
                    doc.sql.as_deref().unwrap_or(DEFAULT_QUERY_TEMPLATE),
                )?;
                let symbol = Symbol::parse(&doc.stock).map_err(|source| {
                    ConfigError::InvalidField {
                        field: "stock",
                        source,
                    }
                })?;
                let field = Identifier::parse(&doc.field).map_err(|source| {
                    ConfigError::InvalidField {
                        field: "field",
                        source,
                    }
                })?;
                let table = Identifier::parse(&doc.table).map_err(|source| {
                    ConfigError::InvalidField {
                        field: "table",
                        source,
                    }
                })?;
                Ok(Self::Query(QuerySource::new(template, symbol, field, table)))
            }
            SourceKind::Constant => {
                let doc = ConstantSourceDocument::deserialize(document)
                    .map_err(ConfigError::document)?;
                Ok(Self::Constant(ConstantSource::new(doc.threshold)))
            }
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Query(_) => SourceKind::Query,
            Self::Constant(_) => SourceKind::Constant,
        }
    }

    /// Most recent `n` points in `start..=end`. Only the query variant
    /// touches the store.
    pub async fn fetch(
        &self,
        n: usize,
        store: &StoreClient,
        start: Date,
        end: Date,
    ) -> Result<TimeSeries, SourceError> {
        match self {
            Self::Query(query) => query.fetch(n, store, start, end).await,
            Self::Constant(constant) => Ok(constant.series(n, end)),
        }
    }
}
