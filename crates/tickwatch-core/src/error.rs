use thiserror::Error;

use crate::equation::EquationError;

/// Field-level validation errors for values taken from rule documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter, digit or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("'{value}' is not a plain SQL identifier")]
    InvalidIdentifier { value: String },

    #[error("timestamp '{value}' is not a recognized date or datetime")]
    InvalidTimestamp { value: String },
}

/// Rule document problems. Raised while building a rule, never during evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("malformed rule document: {0}")]
    Document(String),

    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule '{rule}' declares no rule items")]
    NoItems { rule: String },

    #[error("unsupported source type '{tag}', expected 'sql' or 'const'")]
    UnsupportedSource { tag: String },

    #[error("unsupported condition type '{tag}', expected 'normal_threshold' or 'direction_threshold'")]
    UnsupportedCondition { tag: String },

    #[error("unknown operator '{value}'")]
    UnknownOperator { value: String },

    #[error("operator '{operator}' cannot be used with condition type '{kind}'")]
    OperatorKindMismatch {
        operator: &'static str,
        kind: &'static str,
    },

    #[error("invalid message template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("datapoint_num must be greater than zero")]
    ZeroDatapoints,

    #[error("datapoint_num {requested} exceeds the maximum of {max}")]
    TooManyDatapoints { requested: usize, max: usize },

    #[error("invalid field '{field}': {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: ValidationError,
    },

    #[error("rule item '{id}': {source}")]
    Item {
        id: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("equation: {0}")]
    Equation(#[from] EquationError),

    #[error("equation references undeclared rule item '{name}'")]
    UnknownItem { name: String },
}

impl ConfigError {
    pub(crate) fn document(error: impl std::fmt::Display) -> Self {
        Self::Document(error.to_string())
    }

    pub(crate) fn in_item(self, id: &str) -> Self {
        Self::Item {
            id: id.to_string(),
            source: Box::new(self),
        }
    }
}
