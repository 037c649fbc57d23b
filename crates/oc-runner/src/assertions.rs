//! Declarative response assertions
//!
//! An [`Assertion`] pairs a left-hand expression addressing the response
//! (`res.status`, `res.headers.content-type`, `res.body.items[0].id`, ...)
//! with an operator and a right-hand operand. The operand is interpolated
//! and then typed: numbers, `true`/`false`, `null`, `undefined` and quoted
//! strings become the matching JSON value, anything else is a string.

use oc_core::{Assertion, Response};
use oc_scripting::{walk_path, AssertionResult, ResultStatus, VariableStore};
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Assertion operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal (numbers compare numerically)
    Eq,
    /// Not equal
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// One of a comma-separated list
    In,
    /// None of a comma-separated list
    NotIn,
    /// Substring, array element or object key
    Contains,
    /// Negated `contains`
    NotContains,
    /// String, array or object length
    Length,
    /// Regular expression match
    Matches,
    /// Negated `matches`
    NotMatches,
    /// String prefix
    StartsWith,
    /// String suffix
    EndsWith,
    /// Inclusive numeric range `lo, hi`
    Between,
    /// Empty string, array or object
    IsEmpty,
    /// Non-empty string, array or object
    IsNotEmpty,
    /// `null`
    IsNull,
    /// Missing
    IsUndefined,
    /// Present
    IsDefined,
    /// Truthy in the script sense
    IsTruthy,
    /// Falsy in the script sense
    IsFalsy,
    /// Object or array
    IsJson,
    /// Number
    IsNumber,
    /// String
    IsString,
    /// Boolean
    IsBoolean,
    /// Array
    IsArray,
}

impl Operator {
    const ALL: [Operator; 28] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
        Operator::NotContains,
        Operator::Length,
        Operator::Matches,
        Operator::NotMatches,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Between,
        Operator::IsEmpty,
        Operator::IsNotEmpty,
        Operator::IsNull,
        Operator::IsUndefined,
        Operator::IsDefined,
        Operator::IsTruthy,
        Operator::IsFalsy,
        Operator::IsJson,
        Operator::IsNumber,
        Operator::IsString,
        Operator::IsBoolean,
        Operator::IsArray,
    ];

    /// Name as written in collection files
    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::Length => "length",
            Self::Matches => "matches",
            Self::NotMatches => "notMatches",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Between => "between",
            Self::IsEmpty => "isEmpty",
            Self::IsNotEmpty => "isNotEmpty",
            Self::IsNull => "isNull",
            Self::IsUndefined => "isUndefined",
            Self::IsDefined => "isDefined",
            Self::IsTruthy => "isTruthy",
            Self::IsFalsy => "isFalsy",
            Self::IsJson => "isJson",
            Self::IsNumber => "isNumber",
            Self::IsString => "isString",
            Self::IsBoolean => "isBoolean",
            Self::IsArray => "isArray",
        }
    }

    /// Whether the operator takes no right-hand operand
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Self::IsEmpty
                | Self::IsNotEmpty
                | Self::IsNull
                | Self::IsUndefined
                | Self::IsDefined
                | Self::IsTruthy
                | Self::IsFalsy
                | Self::IsJson
                | Self::IsNumber
                | Self::IsString
                | Self::IsBoolean
                | Self::IsArray
        )
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Eq => "equal",
            Self::Neq => "not equal",
            Self::Gt => "be above",
            Self::Gte => "be at least",
            Self::Lt => "be below",
            Self::Lte => "be at most",
            Self::In => "be one of",
            Self::NotIn => "not be one of",
            Self::Contains => "include",
            Self::NotContains => "not include",
            Self::Length => "have length",
            Self::Matches => "match",
            Self::NotMatches => "not match",
            Self::StartsWith => "start with",
            Self::EndsWith => "end with",
            Self::Between => "be between",
            Self::IsEmpty => "be empty",
            Self::IsNotEmpty => "not be empty",
            Self::IsNull => "be null",
            Self::IsUndefined => "be undefined",
            Self::IsDefined => "be defined",
            Self::IsTruthy => "be truthy",
            Self::IsFalsy => "be falsy",
            Self::IsJson => "be JSON",
            Self::IsNumber => "be a number",
            Self::IsString => "be a string",
            Self::IsBoolean => "be a boolean",
            Self::IsArray => "be an array",
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("Unknown assertion operator: {s}"))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Evaluates declarative assertions against a response
#[derive(Debug, Clone, Default)]
pub struct AssertionEvaluator;

impl AssertionEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every enabled assertion, in order
    pub fn evaluate(
        &self,
        assertions: &[Assertion],
        response: &Response,
        vars: &VariableStore,
    ) -> Vec<AssertionResult> {
        let view = response_view(response);
        assertions
            .iter()
            .filter(|a| !a.disabled)
            .map(|a| self.evaluate_one(a, &view, vars))
            .collect()
    }

    fn evaluate_one(
        &self,
        assertion: &Assertion,
        view: &Value,
        vars: &VariableStore,
    ) -> AssertionResult {
        let (operator, operand_text, rhs_expr) = split_operator(assertion);
        let mut result = AssertionResult {
            id: String::new(),
            status: ResultStatus::Fail,
            lhs_expr: assertion.expression.trim().to_string(),
            rhs_expr,
            operator: operator.clone(),
            rhs_operand: None,
            error: None,
        };

        let op = match operator.parse::<Operator>() {
            Ok(op) => op,
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        };

        let operand = if op.is_unary() {
            None
        } else {
            typed_operand(op, &vars.interpolate_str(&operand_text))
        };
        result.rhs_operand = operand.clone();

        let lhs = match lookup(view, &result.lhs_expr) {
            Ok(lhs) => lhs,
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        };

        match check(op, lhs, operand.as_ref()) {
            Ok(true) => result.status = ResultStatus::Pass,
            Ok(false) => {
                let message = if op.is_unary() {
                    format!("expected {} to {}", display(lhs), op.verb())
                } else {
                    format!(
                        "expected {} to {} {}",
                        display(lhs),
                        op.verb(),
                        display(operand.as_ref())
                    )
                };
                result.error = Some(message);
            }
            Err(e) => result.error = Some(e),
        }

        debug!(
            expression = %result.lhs_expr,
            operator = %op,
            status = ?result.status,
            "Assertion evaluated"
        );
        result
    }
}

/// Operator name, operand text and the right-hand side as written
fn split_operator(assertion: &Assertion) -> (String, String, String) {
    let value = assertion.value.trim();
    let operator = assertion.operator.trim();

    if !operator.is_empty() {
        let rhs_expr = if value.is_empty() {
            operator.to_string()
        } else {
            format!("{operator} {value}")
        };
        return (operator.to_string(), value.to_string(), rhs_expr);
    }

    let (head, rest) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
    if head.parse::<Operator>().is_ok() {
        (head.to_string(), rest.trim().to_string(), value.to_string())
    } else {
        ("eq".to_string(), value.to_string(), value.to_string())
    }
}

/// Type one operand: `None` stands for `undefined`
fn typed_value(text: &str) -> Option<Value> {
    let text = text.trim();
    let quoted = (text.len() >= 2)
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted {
        return Some(Value::String(text[1..text.len() - 1].to_string()));
    }

    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        "undefined" => return None,
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(json!(i));
    }
    if let Some(n) = text
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
    {
        return Some(Value::Number(n));
    }
    Some(Value::String(text.to_string()))
}

fn typed_operand(op: Operator, text: &str) -> Option<Value> {
    match op {
        Operator::In | Operator::NotIn | Operator::Between => Some(Value::Array(
            text.split(',')
                .map(|item| typed_value(item).unwrap_or(Value::Null))
                .collect(),
        )),
        Operator::Matches | Operator::NotMatches => Some(Value::String(text.trim().to_string())),
        _ => typed_value(text),
    }
}

fn response_view(response: &Response) -> Value {
    json!({
        "status": response.status,
        "statusText": response.status_text,
        "headers": response.headers,
        "body": response.data,
        "responseTime": response.duration,
        "url": response.url,
    })
}

fn lookup<'a>(view: &'a Value, expression: &str) -> Result<Option<&'a Value>, String> {
    let unsupported = || format!("Unsupported assertion expression: {expression}");
    let path = expression.strip_prefix("res.").ok_or_else(unsupported)?;

    let root = path.split(['.', '[']).next().unwrap_or_default();
    match root {
        "headers" => Ok(walk_path(view, &path.to_ascii_lowercase())),
        "status" | "statusText" | "body" | "responseTime" | "url" => Ok(walk_path(view, path)),
        _ => Err(unsupported()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    match (lhs, rhs) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if a == b {
                return true;
            }
            let numeric = matches!(a, Value::Number(_)) || matches!(b, Value::Number(_));
            match (numeric, as_number(a), as_number(b)) {
                (true, Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => false,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn length(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn numbers(op: Operator, lhs: Option<&Value>, rhs: Option<&Value>) -> Result<(f64, f64), String> {
    let lhs = lhs
        .and_then(as_number)
        .ok_or_else(|| format!("{op}: expected {} to be a number", display(lhs)))?;
    let rhs = rhs
        .and_then(as_number)
        .ok_or_else(|| format!("{op}: operand {} is not a number", display(rhs)))?;
    Ok((lhs, rhs))
}

fn pattern(operand: Option<&Value>) -> Result<Regex, String> {
    let source = text(operand).unwrap_or_default();
    let translated = match source.strip_prefix('/').and_then(|s| s.rsplit_once('/')) {
        Some((body, flags)) if flags.chars().all(|c| "imsx".contains(c)) => {
            if flags.is_empty() {
                body.to_string()
            } else {
                format!("(?{flags}){body}")
            }
        }
        _ => source.clone(),
    };
    Regex::new(&translated).map_err(|e| format!("Invalid pattern {source}: {e}"))
}

fn list(operand: Option<&Value>) -> &[Value] {
    match operand {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn check(op: Operator, lhs: Option<&Value>, rhs: Option<&Value>) -> Result<bool, String> {
    Ok(match op {
        Operator::Eq => loose_eq(lhs, rhs),
        Operator::Neq => !loose_eq(lhs, rhs),
        Operator::Gt => numbers(op, lhs, rhs).map(|(a, b)| a > b)?,
        Operator::Gte => numbers(op, lhs, rhs).map(|(a, b)| a >= b)?,
        Operator::Lt => numbers(op, lhs, rhs).map(|(a, b)| a < b)?,
        Operator::Lte => numbers(op, lhs, rhs).map(|(a, b)| a <= b)?,
        Operator::In => list(rhs).iter().any(|item| loose_eq(lhs, Some(item))),
        Operator::NotIn => !list(rhs).iter().any(|item| loose_eq(lhs, Some(item))),
        Operator::Contains | Operator::NotContains => {
            let found = match lhs {
                Some(Value::String(s)) => text(rhs).is_some_and(|needle| s.contains(&needle)),
                Some(Value::Array(items)) => items.iter().any(|item| loose_eq(Some(item), rhs)),
                Some(Value::Object(map)) => text(rhs).is_some_and(|key| map.contains_key(&key)),
                _ => false,
            };
            found == (op == Operator::Contains)
        }
        Operator::Length => {
            let expected = rhs
                .and_then(as_number)
                .ok_or_else(|| format!("length: operand {} is not a number", display(rhs)))?;
            length(lhs).is_some_and(|len| len as f64 == expected)
        }
        Operator::Matches | Operator::NotMatches => {
            let regex = pattern(rhs)?;
            let matched = text(lhs).is_some_and(|s| regex.is_match(&s));
            matched == (op == Operator::Matches)
        }
        Operator::StartsWith => match (text(lhs), text(rhs)) {
            (Some(s), Some(prefix)) => s.starts_with(&prefix),
            _ => false,
        },
        Operator::EndsWith => match (text(lhs), text(rhs)) {
            (Some(s), Some(suffix)) => s.ends_with(&suffix),
            _ => false,
        },
        Operator::Between => {
            let bounds = list(rhs);
            let (Some(lo), Some(hi)) = (
                bounds.first().and_then(as_number),
                bounds.get(1).and_then(as_number),
            ) else {
                return Err(format!(
                    "between: operand {} must be two numbers",
                    display(rhs)
                ));
            };
            lhs.and_then(as_number).is_some_and(|n| lo <= n && n <= hi)
        }
        Operator::IsEmpty => length(lhs) == Some(0),
        Operator::IsNotEmpty => length(lhs).is_some_and(|len| len > 0),
        Operator::IsNull => matches!(lhs, Some(Value::Null)),
        Operator::IsUndefined => lhs.is_none(),
        Operator::IsDefined => lhs.is_some(),
        Operator::IsTruthy => truthy(lhs),
        Operator::IsFalsy => !truthy(lhs),
        Operator::IsJson => matches!(lhs, Some(Value::Object(_) | Value::Array(_))),
        Operator::IsNumber => matches!(lhs, Some(Value::Number(_))),
        Operator::IsString => matches!(lhs, Some(Value::String(_))),
        Operator::IsBoolean => matches!(lhs, Some(Value::Bool(_))),
        Operator::IsArray => matches!(lhs, Some(Value::Array(_))),
    })
}

fn display(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => format!("'{s}'"),
        Some(other) => other.to_string(),
    }
}
