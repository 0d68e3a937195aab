use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::EvaluationContext;
use super::expression::evaluate_expression;
use super::resolver::ValueResolver;
use super::value::{is_empty_value, strict_equals, to_display_string, to_number};

/// Declarative boolean test. Never mutated by evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Simple {
        left: Value,
        operator: Operator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Value>,
    },
    Compound {
        logic: Logic,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Expression {
        expression: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    IsEmpty,
    IsNotEmpty,
    Matches,
    Exists,
    NotExists,
    IsTrue,
    IsFalse,
    #[serde(other)]
    Unknown,
}

impl Condition {
    pub fn simple(left: impl Into<Value>, operator: Operator, right: impl Into<Value>) -> Self {
        Self::Simple {
            left: left.into(),
            operator,
            right: Some(right.into()),
        }
    }

    pub fn unary(left: impl Into<Value>, operator: Operator) -> Self {
        Self::Simple {
            left: left.into(),
            operator,
            right: None,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::Compound { logic: Logic::And, conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Compound { logic: Logic::Or, conditions }
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Self::Expression { expression: expression.into() }
    }
}

/// Evaluates conditions against a context without side effects.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    resolver: ValueResolver,
}

impl ConditionEvaluator {
    pub fn new(resolver: ValueResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ValueResolver {
        &self.resolver
    }

    pub fn evaluate(&self, condition: &Condition, context: &EvaluationContext) -> bool {
        match condition {
            Condition::Simple { left, operator, right } => {
                let left = self.operand(left, context);
                let right = right.as_ref().and_then(|r| self.operand(r, context));
                apply_operator(*operator, left.as_ref(), right.as_ref())
            }
            Condition::Compound { conditions, .. } if conditions.is_empty() => true,
            Condition::Compound { logic, conditions } => {
                let mut outcomes = conditions.iter().map(|c| self.evaluate(c, context));
                match logic {
                    Logic::And => outcomes.all(|outcome| outcome),
                    Logic::Or => outcomes.any(|outcome| outcome),
                }
            }
            Condition::Expression { expression } => evaluate_expression(expression, context),
        }
    }

    /// String operands go through the resolver; other JSON literals are used as-is.
    fn operand(&self, raw: &Value, context: &EvaluationContext) -> Option<Value> {
        match raw {
            Value::String(token) => self.resolver.resolve(token, context),
            other => Some(other.clone()),
        }
    }
}

fn apply_operator(operator: Operator, left: Option<&Value>, right: Option<&Value>) -> bool {
    match operator {
        Operator::Equals => strict_equals(left, right),
        Operator::NotEquals => !strict_equals(left, right),
        Operator::Contains => to_display_string(left).contains(&to_display_string(right)),
        Operator::StartsWith => to_display_string(left).starts_with(&to_display_string(right)),
        Operator::EndsWith => to_display_string(left).ends_with(&to_display_string(right)),
        Operator::GreaterThan => to_number(left) > to_number(right),
        Operator::LessThan => to_number(left) < to_number(right),
        Operator::GreaterOrEqual => to_number(left) >= to_number(right),
        Operator::LessOrEqual => to_number(left) <= to_number(right),
        Operator::IsEmpty => is_empty_value(left),
        Operator::IsNotEmpty => !is_empty_value(left),
        Operator::Matches => {
            let pattern = to_display_string(right);
            match Regex::new(&pattern) {
                Ok(regex) => regex.is_match(&to_display_string(left)),
                Err(e) => {
                    debug!("Invalid pattern '{}' in matches condition: {}", pattern, e);
                    false
                }
            }
        }
        Operator::Exists => !matches!(left, None | Some(Value::Null)),
        Operator::NotExists => matches!(left, None | Some(Value::Null)),
        Operator::IsTrue => match left {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            Some(Value::Number(n)) => n.as_f64() == Some(1.0),
            _ => false,
        },
        Operator::IsFalse => match left {
            Some(Value::Bool(b)) => !*b,
            Some(Value::String(s)) => s == "false",
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            _ => false,
        },
        Operator::Unknown => false,
    }
}
