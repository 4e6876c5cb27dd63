//! Operator table and comparison logic for rule conditions.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{scalar_text, FieldType, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    Before,
    After,
    WithinDays,
    Has,
    HasNot,
    GreaterThan,
    LessThan,
    Between,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::In,
        Operator::Before,
        Operator::After,
        Operator::WithinDays,
        Operator::Has,
        Operator::HasNot,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::Between,
    ];

    /// Parses a persisted operator name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::WithinDays => "within_days",
            Operator::Has => "has",
            Operator::HasNot => "has_not",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Between => "between",
        }
    }

    pub fn is_behavioral(&self) -> bool {
        matches!(self, Operator::Has | Operator::HasNot)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldType {
    /// Operators valid for this field type.
    pub fn operators(&self) -> &'static [Operator] {
        match self {
            FieldType::Text => &[
                Operator::Equals,
                Operator::NotEquals,
                Operator::Contains,
                Operator::StartsWith,
                Operator::EndsWith,
            ],
            FieldType::Enum => &[Operator::Equals, Operator::NotEquals, Operator::In],
            FieldType::Array => &[Operator::Contains, Operator::NotContains],
            FieldType::Date => &[Operator::Before, Operator::After, Operator::WithinDays],
            FieldType::Behavior => &[Operator::Has, Operator::HasNot],
            FieldType::Number => &[
                Operator::Equals,
                Operator::GreaterThan,
                Operator::LessThan,
                Operator::Between,
            ],
        }
    }

    pub fn supports(&self, operator: Operator) -> bool {
        self.operators().contains(&operator)
    }

    /// The operator actually applied: unsupported operators fall back to this
    /// type's equality (`has` for behavioral fields).
    pub fn effective_operator(&self, operator: Operator) -> Operator {
        if self.supports(operator) {
            operator
        } else if *self == FieldType::Behavior {
            Operator::Has
        } else {
            Operator::Equals
        }
    }
}

/// A rule's literal value, parsed once for its field type and operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Lowercased text for case-insensitive comparison.
    Text(String),
    /// Exact enum literal.
    Literal(String),
    /// Exact enum literal set for `in`.
    Set(Vec<String>),
    Instant(DateTime<Utc>),
    Days(u32),
    Number(f64),
    Range(f64, f64),
    /// Behavioral operators take no value.
    Membership,
}

impl Operand {
    /// Parses `raw` for `operator` (already resolved through
    /// [`FieldType::effective_operator`]). Unparseable input yields `None`.
    pub fn parse(field_type: FieldType, operator: Operator, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match field_type {
            FieldType::Behavior => Some(Operand::Membership),
            FieldType::Text | FieldType::Array => {
                (!raw.is_empty()).then(|| Operand::Text(raw.to_lowercase()))
            }
            FieldType::Enum => match operator {
                Operator::In => {
                    let set: Vec<String> = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    (!set.is_empty()).then_some(Operand::Set(set))
                }
                _ => (!raw.is_empty()).then(|| Operand::Literal(raw.to_string())),
            },
            FieldType::Date => match operator {
                Operator::WithinDays => raw.parse::<u32>().ok().map(Operand::Days),
                _ => parse_timestamp(raw).map(Operand::Instant),
            },
            FieldType::Number => match operator {
                Operator::Between => {
                    let (lo, hi) = raw.split_once(',')?;
                    let (lo, hi) = (parse_number(lo)?, parse_number(hi)?);
                    Some(Operand::Range(lo.min(hi), lo.max(hi)))
                }
                _ => parse_number(raw).map(Operand::Number),
            },
        }
    }
}

/// Compares a resolved field value against a parsed operand.
///
/// Any shape mismatch (e.g. a date field holding an unparseable string)
/// yields `false`.
pub fn compare(
    field_type: FieldType,
    operator: Operator,
    left: &FieldValue<'_>,
    right: &Operand,
    now: DateTime<Utc>,
) -> bool {
    match (left, right) {
        (FieldValue::Membership(member), Operand::Membership) => match operator {
            Operator::Has => *member,
            Operator::HasNot => !*member,
            _ => false,
        },
        (FieldValue::Text(text), Operand::Text(expected)) => match operator {
            Operator::Equals => text == expected,
            Operator::NotEquals => text != expected,
            Operator::Contains => text.contains(expected.as_str()),
            Operator::StartsWith => text.starts_with(expected.as_str()),
            Operator::EndsWith => text.ends_with(expected.as_str()),
            _ => false,
        },
        (FieldValue::Raw(value), _) => compare_raw(field_type, operator, value, right, now),
        _ => false,
    }
}

fn compare_raw(
    field_type: FieldType,
    operator: Operator,
    value: &Value,
    right: &Operand,
    now: DateTime<Utc>,
) -> bool {
    match (field_type, right) {
        (FieldType::Enum, Operand::Literal(expected)) => {
            let Some(actual) = scalar_text(value) else {
                return false;
            };
            match operator {
                Operator::Equals => actual.trim() == expected,
                Operator::NotEquals => actual.trim() != expected,
                _ => false,
            }
        }
        (FieldType::Enum, Operand::Set(set)) => {
            scalar_text(value).is_some_and(|actual| set.iter().any(|s| s == actual.trim()))
        }
        (FieldType::Array, Operand::Text(expected)) => {
            let Some(elements) = array_elements(value) else {
                return false;
            };
            match operator {
                Operator::Contains => elements.iter().any(|e| e == expected),
                Operator::NotContains => !elements.iter().any(|e| e == expected),
                // String coercion of the whole collection.
                Operator::Equals => elements.join(",") == *expected,
                _ => false,
            }
        }
        (FieldType::Date, Operand::Instant(instant)) => {
            let Some(ts) = timestamp_value(value) else {
                return false;
            };
            match operator {
                Operator::Before => ts < *instant,
                Operator::After => ts > *instant,
                Operator::Equals => ts.date_naive() == instant.date_naive(),
                _ => false,
            }
        }
        (FieldType::Date, Operand::Days(days)) => {
            let cutoff = now
                .checked_sub_signed(Duration::days(i64::from(*days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            timestamp_value(value).is_some_and(|ts| ts >= cutoff)
        }
        (FieldType::Number, Operand::Number(expected)) => {
            let Some(actual) = number_value(value) else {
                return false;
            };
            match operator {
                Operator::Equals => actual == *expected,
                Operator::GreaterThan => actual > *expected,
                Operator::LessThan => actual < *expected,
                _ => false,
            }
        }
        (FieldType::Number, Operand::Range(lo, hi)) => {
            number_value(value).is_some_and(|actual| *lo <= actual && actual <= *hi)
        }
        _ => false,
    }
}

/// Convenience form of [`Operand::parse`] followed by [`compare`].
///
/// Unknown-for-type operators get equality semantics; an unparseable `right`
/// never matches.
pub fn matches(
    left: &FieldValue<'_>,
    operator: Operator,
    right: &str,
    field_type: FieldType,
    now: DateTime<Utc>,
) -> bool {
    let operator = field_type.effective_operator(operator);
    Operand::parse(field_type, operator, right)
        .is_some_and(|operand| compare(field_type, operator, left, &operand, now))
}

/// Lowercased elements of an array field. A plain string is read as a
/// comma-separated list.
fn array_elements(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_text)
                .map(|s| s.to_lowercase())
                .collect(),
        ),
        Value::String(s) => Some(
            s.split(',')
                .map(|part| part.trim().to_lowercase())
                .filter(|part| !part.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Accepts RFC 3339, naive date-times (read as UTC) and plain dates
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

/// Record timestamps may also be epoch milliseconds.
fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}
