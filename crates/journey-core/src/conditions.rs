//! Predicate evaluation for condition steps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    models::{Operator, Predicate},
    template::{value_number, value_text},
};

/// Outcome of a condition step, stored as its execution result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionOutcome {
    /// True when every predicate held
    pub passed: bool,
    pub evaluations: Vec<Evaluation>,
}

/// One predicate with the value it saw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub field: String,
    pub operator: Operator,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
}

/// Evaluates `predicates` as a conjunction over `fields`.
///
/// Every predicate is evaluated, so the outcome lists all of them even after
/// one fails. An empty predicate list passes.
pub fn evaluate(predicates: &[Predicate], fields: &Map<String, Value>) -> ConditionOutcome {
    let evaluations: Vec<Evaluation> = predicates
        .iter()
        .map(|predicate| {
            let actual = fields.get(&predicate.field).cloned().unwrap_or(Value::Null);
            Evaluation {
                passed: check(predicate.operator, &actual, &predicate.value),
                field: predicate.field.clone(),
                operator: predicate.operator,
                expected: predicate.value.clone(),
                actual,
            }
        })
        .collect();

    ConditionOutcome {
        passed: evaluations.iter().all(|e| e.passed),
        evaluations,
    }
}

fn check(operator: Operator, actual: &Value, expected: &Value) -> bool {
    match operator {
        Operator::Equals => is_set(actual) && value_text(actual) == value_text(expected),
        Operator::NotEquals => !is_set(actual) || value_text(actual) != value_text(expected),
        Operator::Contains => {
            let needle = value_text(expected);
            match actual {
                Value::String(s) => s.contains(&needle),
                Value::Array(items) => items.iter().any(|item| value_text(item) == needle),
                _ => false,
            }
        }
        Operator::GreaterThan => compare(actual, expected).is_some_and(|(a, b)| a > b),
        Operator::LessThan => compare(actual, expected).is_some_and(|(a, b)| a < b),
        Operator::IsSet => is_set(actual),
        Operator::IsNotSet => !is_set(actual),
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    Some((value_number(actual)?, value_number(expected)?))
}
