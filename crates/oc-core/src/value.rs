//! Variable values

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Largest integer a script engine double can represent exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Value held by a variable in any scope.
///
/// This is a closed variant: every consumer (interpolation, marshalling,
/// persistence) matches it exhaustively. `Json` only ever holds arrays or
/// objects; scalar JSON values are normalised into their own variants by
/// the `From<Value>` conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum VariableValue {
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer or floating point number
    Num(Number),
    /// String
    Str(String),
    /// Structured object or array
    Json(Value),
}

impl VariableValue {
    /// Create a string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        Self::Str(s.into())
    }

    /// Create a number value from a float, normalising integral floats
    /// within the safe-integer range into integers
    pub fn float(f: f64) -> Self {
        if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 {
            Self::Num(Number::from(f as i64))
        } else {
            Number::from_f64(f).map_or(Self::Null, Self::Num)
        }
    }

    /// Borrow the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a string value
    pub fn is_string(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    /// Script-facing type name (`typeof`-style)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Json(_) => "object",
        }
    }

    /// Text substituted for a `{{placeholder}}` resolving to this value
    pub fn to_interpolated_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Convert into a JSON value
    pub fn to_json(&self) -> Value {
        self.clone().into()
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_interpolated_string())
    }
}

impl From<Value> for VariableValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Num(n),
            Value::String(s) => Self::Str(s),
            other @ (Value::Array(_) | Value::Object(_)) => Self::Json(other),
        }
    }
}

impl From<VariableValue> for Value {
    fn from(value: VariableValue) -> Self {
        match value {
            VariableValue::Null => Value::Null,
            VariableValue::Bool(b) => Value::Bool(b),
            VariableValue::Num(n) => Value::Number(n),
            VariableValue::Str(s) => Value::String(s),
            VariableValue::Json(v) => v,
        }
    }
}

impl From<&str> for VariableValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for VariableValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for VariableValue {
    fn from(i: i64) -> Self {
        Self::Num(Number::from(i))
    }
}

impl From<f64> for VariableValue {
    fn from(f: f64) -> Self {
        Self::float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_are_normalised() {
        assert_eq!(VariableValue::from(json!("a")), VariableValue::Str("a".into()));
        assert_eq!(VariableValue::from(json!(null)), VariableValue::Null);
        assert!(matches!(VariableValue::from(json!({"a": 1})), VariableValue::Json(_)));
        assert!(matches!(VariableValue::from(json!([1, 2])), VariableValue::Json(_)));
    }

    #[test]
    fn test_integral_float_becomes_integer() {
        assert_eq!(VariableValue::float(3.0).to_interpolated_string(), "3");
        assert_eq!(VariableValue::float(3.5).to_interpolated_string(), "3.5");
        // Beyond 2^53 stays a float
        let big = VariableValue::float(1e300);
        assert!(matches!(big, VariableValue::Num(ref n) if n.is_f64()));
    }

    #[test]
    fn test_interpolated_string_forms() {
        assert_eq!(VariableValue::Null.to_interpolated_string(), "null");
        assert_eq!(VariableValue::Bool(true).to_interpolated_string(), "true");
        assert_eq!(
            VariableValue::from(json!({"k": "v"})).to_interpolated_string(),
            r#"{"k":"v"}"#
        );
    }

    #[test]
    fn test_serde_is_transparent() {
        let v: VariableValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, VariableValue::from(42i64));
        assert_eq!(serde_json::to_string(&VariableValue::from("x")).unwrap(), "\"x\"");
    }
}
