//! Step gating conditions.
//!
//! Conditions are stored as a flat, ordered list of predicates. Each carries a
//! `logical_operator` hint, but evaluation lifts the stored list into a single
//! [`ConditionExpr::All`] node: every predicate must hold. [`ConditionExpr`]
//! already models `Any` so disjunction can be added without changing the
//! stored shape.
//!
//! Field paths are dot-separated and resolved against the entity snapshot
//! first, then against the instance metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Comparison applied between the resolved field value and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

impl ConditionOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
        }
    }

    /// Parse the stored textual form.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "EQUALS" => Self::Equals,
            "NOT_EQUALS" => Self::NotEquals,
            "CONTAINS" => Self::Contains,
            "NOT_CONTAINS" => Self::NotContains,
            "GREATER_THAN" => Self::GreaterThan,
            "LESS_THAN" => Self::LessThan,
            "IN" => Self::In,
            "NOT_IN" => Self::NotIn,
            _ => return None,
        })
    }

    /// Apply the operator. `field` is `None` when the path did not resolve.
    pub fn apply(self, field: Option<&Value>, expected: &Value) -> bool {
        match self {
            Self::Equals => field.is_some_and(|v| json_eq(v, expected)),
            Self::NotEquals => !field.is_some_and(|v| json_eq(v, expected)),
            Self::Contains => field.is_some_and(|v| contains(v, expected)),
            Self::NotContains => !field.is_some_and(|v| contains(v, expected)),
            Self::GreaterThan => compare_numbers(field, expected, |a, b| a > b),
            Self::LessThan => compare_numbers(field, expected, |a, b| a < b),
            Self::In => match expected {
                Value::Array(candidates) => {
                    field.is_some_and(|v| candidates.iter().any(|c| json_eq(v, c)))
                }
                _ => false,
            },
            Self::NotIn => match expected {
                Value::Array(candidates) => {
                    !field.is_some_and(|v| candidates.iter().any(|c| json_eq(v, c)))
                }
                _ => false,
            },
        }
    }
}

/// Hint stored alongside each condition. Evaluation currently ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A single stored predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Condition {
    #[validate(length(min = 1, max = 255))]
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, alias = "logicalOperator")]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub order: i32,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            logical_operator: LogicalOperator::And,
            order: 0,
        }
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        self.operator.apply(ctx.resolve(&self.field), &self.value)
    }
}

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

/// Boolean expression over condition predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    All(Vec<ConditionExpr>),
    Any(Vec<ConditionExpr>),
    Predicate(Condition),
}

impl ConditionExpr {
    /// Lift a stored condition list into an expression, ordered by `order`.
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        let mut sorted: Vec<&Condition> = conditions.iter().collect();
        sorted.sort_by_key(|c| c.order);
        ConditionExpr::All(
            sorted
                .into_iter()
                .cloned()
                .map(ConditionExpr::Predicate)
                .collect(),
        )
    }

    /// `All([])` is vacuously true, `Any([])` is false.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        match self {
            ConditionExpr::All(children) => children.iter().all(|c| c.evaluate(ctx)),
            ConditionExpr::Any(children) => children.iter().any(|c| c.evaluate(ctx)),
            ConditionExpr::Predicate(condition) => condition.evaluate(ctx),
        }
    }
}

/// The data a condition may read: the entity snapshot and instance metadata.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub entity: &'a Value,
    pub metadata: &'a Value,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(entity: &'a Value, metadata: &'a Value) -> Self {
        Self { entity, metadata }
    }

    /// Resolve `field` against the entity, falling back to the metadata.
    ///
    /// Metadata is checked for a literal key equal to `field` before walking
    /// the dot path, so keys that themselves contain dots still resolve.
    pub fn resolve(&self, field: &str) -> Option<&'a Value> {
        lookup_path(self.entity, field)
            .or_else(|| self.metadata.get(field))
            .or_else(|| lookup_path(self.metadata, field))
    }
}

/// Evaluate a stored condition list against an entity snapshot and metadata.
pub fn evaluate_conditions(entity: &Value, metadata: &Value, conditions: &[Condition]) -> bool {
    let ctx = EvaluationContext::new(entity, metadata);
    ConditionExpr::from_conditions(conditions).evaluate(&ctx)
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Walk a dot-separated path through nested objects (and array indices).
fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Equality that treats `150` and `150.0` as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Array membership, or substring match on the textual form.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| json_eq(item, needle)),
        Value::String(text) => text.contains(&scalar_text(needle)),
        Value::Number(_) | Value::Bool(_) => scalar_text(haystack).contains(&scalar_text(needle)),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_numbers(field: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (field.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
