//! Environments and variable definitions

use crate::value::VariableValue;
use serde::{Deserialize, Serialize};

/// A named set of variables selected by the user for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name (exposed to scripts via `bru.getEnvName()`)
    pub name: String,

    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Ordered variable list
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Environment {
    /// Create an empty environment
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a variable (builder style)
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Enabled variables resolved to their values, in declaration order.
    ///
    /// Disabled and unnamed entries are skipped. A later entry with the same
    /// name overrides an earlier one.
    pub fn resolved_variables(&self) -> Vec<(String, VariableValue)> {
        resolve_variables(&self.variables)
    }

    /// Names of variables flagged as secret
    pub fn secret_names(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|v| v.secret)
            .map(|v| v.name.as_str())
    }
}

/// Resolve a variable list into ordered `(name, value)` pairs
pub fn resolve_variables(variables: &[Variable]) -> Vec<(String, VariableValue)> {
    let mut resolved: Vec<(String, VariableValue)> = Vec::with_capacity(variables.len());
    for variable in variables.iter().filter(|v| v.is_enabled()) {
        let value = variable.resolve();
        match resolved.iter_mut().find(|(name, _)| *name == variable.name) {
            Some(slot) => slot.1 = value,
            None => resolved.push((variable.name.clone(), value)),
        }
    }
    resolved
}

/// A single variable definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name
    pub name: String,

    /// Declared value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<VariableValueSpec>,

    /// Fallback used when `value` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<VariableValueSpec>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,

    /// Disabled variables are ignored
    #[serde(default)]
    pub disabled: bool,

    /// Secret values are masked in logs
    #[serde(default)]
    pub secret: bool,

    /// Transient values are not persisted back to disk
    #[serde(default)]
    pub transient: bool,
}

impl Variable {
    /// Create an enabled plain-string variable
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: Some(VariableValueSpec::Plain(value.into())),
            ..Default::default()
        }
    }

    /// Mark as disabled (builder style)
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Mark as secret (builder style)
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Whether this variable participates in resolution
    pub fn is_enabled(&self) -> bool {
        !self.disabled && !self.name.is_empty()
    }

    /// Resolve the declared value, falling back to `default`, then `""`
    pub fn resolve(&self) -> VariableValue {
        self.value
            .as_ref()
            .or(self.default.as_ref())
            .map(VariableValueSpec::resolve)
            .unwrap_or_else(|| VariableValue::Str(String::new()))
    }
}

/// Declared form of a variable value in a collection file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValueSpec {
    /// Plain string
    Plain(String),
    /// Typed value carried as text
    Typed(TypedValue),
    /// Alternatives, one of which is selected
    Variants(Vec<ValueVariant>),
}

impl VariableValueSpec {
    /// Resolve into a runtime value
    pub fn resolve(&self) -> VariableValue {
        match self {
            Self::Plain(s) => VariableValue::Str(s.clone()),
            Self::Typed(typed) => typed.resolve(),
            Self::Variants(variants) => variants
                .iter()
                .find(|v| v.selected)
                .or_else(|| variants.first())
                .map(|v| v.value.resolve())
                .unwrap_or_else(|| VariableValue::Str(String::new())),
        }
    }
}

/// Declared type of a [`TypedValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableValueType {
    /// String
    String,
    /// Number
    Number,
    /// Boolean
    Boolean,
    /// Null
    Null,
    /// JSON object or array
    Object,
}

/// A value carried as text together with its declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    /// Declared type
    #[serde(rename = "type")]
    pub kind: VariableValueType,
    /// Text payload
    pub data: String,
}

impl TypedValue {
    /// Decode the payload according to the declared type.
    ///
    /// Payloads that do not parse as their declared type are kept as strings.
    pub fn resolve(&self) -> VariableValue {
        let data = self.data.trim();
        match self.kind {
            VariableValueType::String => VariableValue::Str(self.data.clone()),
            VariableValueType::Null => VariableValue::Null,
            VariableValueType::Boolean => match data {
                "true" => VariableValue::Bool(true),
                "false" => VariableValue::Bool(false),
                _ => VariableValue::Str(self.data.clone()),
            },
            VariableValueType::Number => {
                if let Ok(i) = data.parse::<i64>() {
                    VariableValue::from(i)
                } else if let Ok(f) = data.parse::<f64>() {
                    VariableValue::float(f)
                } else {
                    VariableValue::Str(self.data.clone())
                }
            }
            VariableValueType::Object => serde_json::from_str::<serde_json::Value>(data)
                .map(VariableValue::from)
                .unwrap_or_else(|_| VariableValue::Str(self.data.clone())),
        }
    }
}

/// One alternative of a variant-valued variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueVariant {
    /// Display title
    pub title: String,
    /// Whether this alternative is active
    #[serde(default)]
    pub selected: bool,
    /// Alternative value
    pub value: VariableValueSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disabled_variables_are_filtered() {
        let env = Environment::new("dev")
            .with_variable(Variable::new("host", "localhost"))
            .with_variable(Variable::new("token", "x").disabled());

        let vars = env.resolved_variables();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].0, "host");
    }

    #[test]
    fn test_later_duplicate_wins() {
        let env = Environment::new("dev")
            .with_variable(Variable::new("a", "1"))
            .with_variable(Variable::new("a", "2"));
        assert_eq!(env.resolved_variables(), vec![("a".to_string(), VariableValue::from("2"))]);
    }

    #[test]
    fn test_typed_values_decode() {
        let variable: Variable = serde_json::from_value(json!({
            "name": "port",
            "value": { "type": "number", "data": "8080" }
        }))
        .unwrap();
        assert_eq!(variable.resolve(), VariableValue::from(8080i64));

        let variable: Variable = serde_json::from_value(json!({
            "name": "obj",
            "value": { "type": "object", "data": "{\"a\": true}" }
        }))
        .unwrap();
        assert_eq!(variable.resolve(), VariableValue::from(json!({"a": true})));
    }

    #[test]
    fn test_selected_variant_wins() {
        let variable: Variable = serde_json::from_value(json!({
            "name": "region",
            "value": [
                { "title": "eu", "value": "eu-west-1" },
                { "title": "us", "selected": true, "value": "us-east-1" }
            ]
        }))
        .unwrap();
        assert_eq!(variable.resolve(), VariableValue::from("us-east-1"));
    }

    #[test]
    fn test_default_then_empty_fallback() {
        let variable = Variable {
            name: "x".into(),
            default: Some(VariableValueSpec::Plain("fallback".into())),
            ..Default::default()
        };
        assert_eq!(variable.resolve(), VariableValue::from("fallback"));

        let empty = Variable {
            name: "y".into(),
            ..Default::default()
        };
        assert_eq!(empty.resolve(), VariableValue::from(""));
    }
}
