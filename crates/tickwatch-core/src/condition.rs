//! Comparison algorithms and the condition that binds one to a message.

use std::fmt::{Display, Formatter, Write as _};

use serde::{Deserialize, Serialize};

use crate::domain::{TimeSeries, Timestamp};
use crate::ConfigError;

/// Operator string from a rule document, e.g. `A >= B` or `A down B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Down,
    Up,
}

impl Operator {
    /// Parse an operator. Whitespace is ignored and `up`/`down` are
    /// case-insensitive, so `A<=B`, `A <= B` and `A DOWN B` are all accepted.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let compact: String = input
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        match compact.as_str() {
            "a<b" => Ok(Self::Less),
            "a<=b" => Ok(Self::LessEqual),
            "a>b" => Ok(Self::Greater),
            "a>=b" => Ok(Self::GreaterEqual),
            "adownb" => Ok(Self::Down),
            "aupb" => Ok(Self::Up),
            _ => Err(ConfigError::UnknownOperator {
                value: input.to_string(),
            }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Less => "A < B",
            Self::LessEqual => "A <= B",
            Self::Greater => "A > B",
            Self::GreaterEqual => "A >= B",
            Self::Down => "A down B",
            Self::Up => "A up B",
        }
    }

    pub const fn includes_equality(self) -> bool {
        matches!(self, Self::LessEqual | Self::GreaterEqual)
    }

    /// Condition kind this operator belongs to.
    pub const fn kind(self) -> ConditionKind {
        match self {
            Self::Down | Self::Up => ConditionKind::DirectionThreshold,
            _ => ConditionKind::Threshold,
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    #[serde(rename = "normal_threshold")]
    Threshold,
    #[serde(rename = "direction_threshold")]
    DirectionThreshold,
}

impl ConditionKind {
    pub fn parse(tag: &str) -> Result<Self, ConfigError> {
        match tag.trim() {
            "normal_threshold" => Ok(Self::Threshold),
            "direction_threshold" => Ok(Self::DirectionThreshold),
            other => Err(ConfigError::UnsupportedCondition {
                tag: other.to_string(),
            }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "normal_threshold",
            Self::DirectionThreshold => "direction_threshold",
        }
    }
}

/// First index where the inequality holds.
///
/// `A>B` and `A>=B` are rewritten as `B<A` and `B<=A`; every other operator
/// compares `A<B` strictly unless it includes equality. Sequences of unequal
/// length are scanned up to the shorter one. Returns `(false, 0)` when
/// nothing matches.
pub fn threshold(a: &[f64], b: &[f64], op: Operator) -> (bool, usize) {
    let (left, right) = match op {
        Operator::Greater | Operator::GreaterEqual => (b, a),
        _ => (a, b),
    };
    let equal = op.includes_equality();

    left.iter()
        .zip(right)
        .position(|(x, y)| x < y || (equal && x == y))
        .map_or((false, 0), |index| (true, index))
}

/// First index `i >= 1` where the left series rises to meet or exceed the
/// right one after being strictly below it at `i - 1`.
///
/// For `A down B` the left series is B; for `A up B` it is A.
pub fn direction_threshold(a: &[f64], b: &[f64], op: Operator) -> (bool, usize) {
    let (left, right) = match op {
        Operator::Down => (b, a),
        _ => (a, b),
    };
    let len = left.len().min(right.len());

    (1..len)
        .find(|&i| left[i] >= right[i] && left[i - 1] < right[i - 1])
        .map_or((false, 0), |index| (true, index))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot { index: usize, precision: Option<usize> },
}

/// Breach message with three slots: timestamp, A value, B value.
///
/// Accepts `{}` (sequential), `{0}`..`{2}` (indexed), an optional `:.N`
/// precision for the numeric slots, and `{{`/`}}` escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub const SLOTS: usize = 3;

    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut next_auto = 0_usize;
        let mut numbering: Option<bool> = None;
        let mut chars = source.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("single '}' must be escaped as '}}'")),
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        field.push(inner);
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'"));
                    }

                    let (position, spec) = match field.split_once(':') {
                        Some((position, spec)) => (position.trim(), Some(spec.trim())),
                        None => (field.trim(), None),
                    };

                    let manual = !position.is_empty();
                    if numbering.is_some_and(|previous| previous != manual) {
                        return Err(invalid("cannot mix '{}' and '{N}' placeholders"));
                    }
                    numbering = Some(manual);

                    let index = if manual {
                        position
                            .parse::<usize>()
                            .map_err(|_| invalid("placeholder index must be 0, 1 or 2"))?
                    } else {
                        next_auto += 1;
                        next_auto - 1
                    };
                    if index >= Self::SLOTS {
                        return Err(invalid("at most three values are available"));
                    }

                    let precision = match spec {
                        None | Some("") => None,
                        Some(spec) => Some(parse_precision(spec).ok_or_else(|| {
                            invalid("format spec must look like '.2' or '.2f'")
                        })?),
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot { index, precision });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, timestamp: Timestamp, a: f64, b: f64) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot { index: 0, .. } => {
                    let _ = write!(out, "{timestamp}");
                }
                Segment::Slot { index, precision } => {
                    let value = if *index == 1 { a } else { b };
                    out.push_str(&format_value(value, *precision));
                }
            }
        }
        out
    }
}

fn parse_precision(spec: &str) -> Option<usize> {
    let digits = spec.strip_prefix('.')?;
    let digits = digits.strip_suffix('f').unwrap_or(digits);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Whole numbers keep one decimal place (`3.0`), everything else uses the
/// shortest round-trip representation.
fn format_value(value: f64, precision: Option<usize>) -> String {
    match precision {
        Some(digits) => format!("{value:.digits$}"),
        None if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 => {
            format!("{value:.1}")
        }
        None => format!("{value}"),
    }
}

/// Where and how a condition was met.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub index: usize,
    pub message: String,
}

/// Comparison algorithm, operator and message template for one rule item.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    kind: ConditionKind,
    operator: Operator,
    template: MessageTemplate,
}

/// Condition object as it appears in a rule document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub msg: String,
}

impl Condition {
    pub fn new(
        kind: ConditionKind,
        operator: Operator,
        template: MessageTemplate,
    ) -> Result<Self, ConfigError> {
        if operator.kind() != kind {
            return Err(ConfigError::OperatorKindMismatch {
                operator: operator.as_str(),
                kind: kind.as_str(),
            });
        }
        Ok(Self {
            kind,
            operator,
            template,
        })
    }

    pub fn from_document(document: &ConditionDocument) -> Result<Self, ConfigError> {
        Self::new(
            ConditionKind::parse(&document.kind)?,
            Operator::parse(&document.value)?,
            MessageTemplate::parse(&document.msg)?,
        )
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn template(&self) -> &MessageTemplate {
        &self.template
    }

    /// Run the algorithm on two aligned series and render the message at the
    /// breach index, taking the timestamp from `a`.
    pub fn judge(&self, a: &TimeSeries, b: &TimeSeries) -> Option<Breach> {
        let (hit, index) = match self.kind {
            ConditionKind::Threshold => threshold(a.values(), b.values(), self.operator),
            ConditionKind::DirectionThreshold => {
                direction_threshold(a.values(), b.values(), self.operator)
            }
        };
        if !hit {
            return None;
        }

        let (timestamp, a_value) = a.point(index)?;
        let b_value = *b.values().get(index)?;
        Some(Breach {
            index,
            message: self.template.render(timestamp, a_value, b_value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(value: &str) -> Operator {
        Operator::parse(value).expect("operator")
    }

    #[test]
    fn threshold_scenarios() {
        assert_eq!(threshold(&[1.0, 2.0, 3.0], &[0.0, 1.0, 2.0], op("A>B")), (true, 0));
        assert_eq!(threshold(&[1.0, 2.0, 3.0], &[0.0, 1.0, 2.0], op("A<B")), (false, 0));
        assert_eq!(threshold(&[1.0, -2.0, 3.0], &[0.0, 1.0, 2.0], op("A<B")), (true, 1));
        assert_eq!(threshold(&[1.0, 2.0, 3.0], &[0.0, 2.0, 2.0], op("A<=B")), (true, 1));
        assert_eq!(threshold(&[1.0, 2.0, 3.0], &[2.0, 3.0, 2.0], op("A >= B")), (true, 2));
    }

    #[test]
    fn threshold_strictness_and_empty_input() {
        assert_eq!(threshold(&[2.0], &[2.0], op("A<B")), (false, 0));
        assert_eq!(threshold(&[2.0], &[2.0], op("A>=B")), (true, 0));
        assert_eq!(threshold(&[], &[], op("A<=B")), (false, 0));
        assert_eq!(threshold(&[f64::NAN], &[1.0], op("A<=B")), (false, 0));
    }

    #[test]
    fn direction_scenarios() {
        let down = op("A down B");
        assert_eq!(direction_threshold(&[3.0, 2.0, 1.0], &[1.0, 2.0, 3.0], down), (true, 1));
        assert_eq!(direction_threshold(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0], down), (false, 0));
        assert_eq!(direction_threshold(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], down), (false, 0));
        assert_eq!(direction_threshold(&[2.0, 3.0, 4.0], &[1.0, 2.0, 3.0], down), (false, 0));
        assert_eq!(direction_threshold(&[], &[], down), (false, 0));
        assert_eq!(direction_threshold(&[5.0], &[1.0], down), (false, 0));

        let up = op("A up B");
        assert_eq!(direction_threshold(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0], up), (true, 1));
        assert_eq!(direction_threshold(&[5.0, 1.0], &[1.0, 5.0], up), (false, 0));
    }

    #[test]
    fn operator_parsing_ignores_spacing() {
        assert_eq!(op("A <= B"), Operator::LessEqual);
        assert_eq!(op(" A DOWN B "), Operator::Down);
        assert!(matches!(
            Operator::parse("A != B"),
            Err(ConfigError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn condition_rejects_operator_of_other_kind() {
        let template = MessageTemplate::parse("{}").expect("template");
        let err = Condition::new(ConditionKind::Threshold, Operator::Up, template)
            .expect_err("mismatch");
        assert!(matches!(err, ConfigError::OperatorKindMismatch { .. }));
    }

    #[test]
    fn template_renders_sequential_indexed_and_precision_slots() {
        let ts = Timestamp::parse("2024-03-01").expect("ts");

        let sequential = MessageTemplate::parse("{} close {} above {}").expect("parse");
        assert_eq!(sequential.render(ts, 101.5, 100.0), "2024-03-01 close 101.5 above 100.0");

        let indexed = MessageTemplate::parse("{1:.2f} vs {2:.1} at {0} {{ok}}").expect("parse");
        assert_eq!(indexed.render(ts, 1.0 / 3.0, 2.26), "0.33 vs 2.3 at 2024-03-01 {ok}");
    }

    #[test]
    fn template_rejects_bad_placeholders() {
        for bad in ["{3}", "{} {1}", "{", "}", "{:x}", "{} {} {} {}"] {
            assert!(
                matches!(MessageTemplate::parse(bad), Err(ConfigError::InvalidTemplate { .. })),
                "{bad} should be rejected"
            );
        }
    }
}
