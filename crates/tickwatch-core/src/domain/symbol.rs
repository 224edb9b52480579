use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 20;

/// Market symbol as stored in the warehouse.
///
/// Case is preserved because it must match the stored rows exactly. Index,
/// FX and numeric exchange tickers such as `^GSPC`, `EURUSD=X` or `0700.HK`
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let len = trimmed.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        if let Some(first) = trimmed.chars().next() {
            if !(first.is_ascii_alphanumeric() || first == '^') {
                return Err(ValidationError::SymbolInvalidStart { ch: first });
            }
        }

        for (index, ch) in trimmed.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '=' | '^' | '_');
            if !valid {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// Plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`, optionally dot-qualified).
///
/// Table and column names are interpolated into query text, so only this
/// shape is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let valid = !trimmed.is_empty()
            && trimmed.split('.').all(|part| {
                let mut chars = part.chars();
                chars
                    .next()
                    .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            });

        if !valid {
            return Err(ValidationError::InvalidIdentifier {
                value: input.to_owned(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_case_and_accepts_index_tickers() {
        assert_eq!(Symbol::parse(" ^GSPC ").expect("index").as_str(), "^GSPC");
        assert_eq!(Symbol::parse("brk.b").expect("lower").as_str(), "brk.b");
        assert_eq!(Symbol::parse("EURUSD=X").expect("fx").as_str(), "EURUSD=X");
    }

    #[test]
    fn rejects_quotes_and_whitespace() {
        let err = Symbol::parse("AAPL' OR 1=1").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidChar { ch: '\'', .. }));
        assert!(matches!(
            Symbol::parse(".HK"),
            Err(ValidationError::SymbolInvalidStart { ch: '.' })
        ));
        assert!(matches!(
            Symbol::parse("=X"),
            Err(ValidationError::SymbolInvalidStart { ch: '=' })
        ));
    }

    #[test]
    fn accepts_exchange_tickers_starting_with_a_digit() {
        for ticker in ["0700.HK", "600519.SS", "000001.SZ", "9988.HK"] {
            assert_eq!(Symbol::parse(ticker).expect(ticker).as_str(), ticker);
        }
    }

    #[test]
    fn identifiers_allow_schema_qualification_only() {
        assert!(Identifier::parse("main.stock_prices").is_ok());
        assert!(Identifier::parse("rsi14").is_ok());
        assert!(Identifier::parse("close_price; DROP").is_err());
        assert!(Identifier::parse("a..b").is_err());
        assert!(Identifier::parse("").is_err());
    }
}
