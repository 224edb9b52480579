//! Boolean equations over rule item identifiers.
//!
//! Grammar (precedence `not` > `and` > `or`, keywords case-insensitive):
//!
//! ```text
//! expr    := and_expr ("or" and_expr)*
//! and_expr:= unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := IDENT | "(" expr ")"
//! ```
//!
//! `and`/`or` chains are stored flat, so tree depth only grows with nested
//! parentheses and `not`, which are capped at [`MAX_DEPTH`].

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Deepest allowed nesting of `(` and `not`.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EquationError {
    #[error("equation is empty")]
    Empty,
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("equation ended early, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("equation nests deeper than {max} levels at offset {offset}")]
    TooDeep { max: usize, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Var(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn eval(&self, lookup: &impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Var(name) => lookup(name),
            Self::Not(inner) => !inner.eval(lookup),
            Self::And(terms) => terms.iter().all(|term| term.eval(lookup)),
            Self::Or(terms) => terms.iter().any(|term| term.eval(lookup)),
        }
    }

    fn collect<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Self::Var(name) => {
                names.insert(name.as_str());
            }
            Self::Not(inner) => inner.collect(names),
            Self::And(terms) | Self::Or(terms) => {
                for term in terms {
                    term.collect(names);
                }
            }
        }
    }
}

/// Parsed equation plus its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equation {
    source: String,
    root: Expr,
}

impl Equation {
    pub fn parse(source: &str) -> Result<Self, EquationError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(EquationError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(token.unexpected());
        }

        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct identifiers referenced by the equation, sorted.
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.root.collect(&mut names);
        names
    }

    /// Evaluate against item verdicts. Identifiers missing from `values`
    /// count as false; rules reject such equations before they get here.
    pub fn evaluate(&self, values: &HashMap<String, bool>) -> bool {
        self.root
            .eval(&|name: &str| values.get(name).copied().unwrap_or(false))
    }
}

impl Display for Equation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn unexpected(&self) -> EquationError {
        let found = match &self.kind {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::And => String::from("'and'"),
            TokenKind::Or => String::from("'or'"),
            TokenKind::Not => String::from("'not'"),
            TokenKind::LParen => String::from("'('"),
            TokenKind::RParen => String::from("')'"),
        };
        EquationError::UnexpectedToken {
            found,
            offset: self.offset,
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, EquationError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match ch {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.to_ascii_lowercase().as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    _ => TokenKind::Ident(word),
                }
            }
            other => {
                return Err(EquationError::UnexpectedCharacter { ch: other, offset });
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| &token.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Called on `(` and `not`, before recursing.
    fn descend(&mut self, offset: usize) -> Result<(), EquationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EquationError::TooDeep {
                max: MAX_DEPTH,
                offset,
            });
        }
        Ok(())
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map_or(0, |token| token.offset)
    }

    fn expr(&mut self) -> Result<Expr, EquationError> {
        let mut terms = vec![self.and_expr()?];
        while self.eat(&TokenKind::Or) {
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Expr, EquationError> {
        let mut terms = vec![self.unary()?];
        while self.eat(&TokenKind::And) {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn unary(&mut self) -> Result<Expr, EquationError> {
        if self.eat(&TokenKind::Not) {
            self.descend(self.offset())?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EquationError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(EquationError::UnexpectedEnd {
                expected: "an identifier or '('",
            });
        };
        self.pos += 1;

        match token.kind {
            TokenKind::Ident(name) => Ok(Expr::Var(name)),
            TokenKind::LParen => {
                self.descend(token.offset)?;
                let inner = self.expr()?;
                match self.peek() {
                    Some(next) if next.kind == TokenKind::RParen => {
                        self.pos += 1;
                        self.depth -= 1;
                        Ok(inner)
                    }
                    Some(next) => Err(next.unexpected()),
                    None => Err(EquationError::UnexpectedEnd { expected: "')'" }),
                }
            }
            _ => Err(token.unexpected()),
        }
    }
}
