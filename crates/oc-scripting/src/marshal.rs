//! Host/sandbox value marshalling
//!
//! [`HostValue`] is the host-side mirror of every value a script can hand
//! to, or receive from, a bound function. [`to_sandbox`] and [`to_host`]
//! are the only functions in the crate that build or read engine values;
//! bindings and the runtime work purely with [`HostValue`].
//!
//! Engine handles are reference counted and scoped to the `Ctx` they were
//! created in. Every handle returned by [`to_sandbox`] is owned by the
//! caller and is released when it is dropped or moved into its destination
//! (an object property, an argument list), so a marshalled value never
//! outlives the sandbox context it was created for.

use crate::error::MarshalError;
use oc_core::{VariableValue, MAX_SAFE_INTEGER};
use rquickjs::function::Rest;
use rquickjs::{Array, Ctx, Exception, Function, Object, Type, Value};
use serde_json::{Map, Number};
use std::fmt;
use std::sync::Arc;

/// Maximum nesting depth crossing the boundary (guards against cycles)
pub const MAX_DEPTH: usize = 128;

/// Maximum number of values one [`to_host`] call may produce
pub const MAX_NODES: usize = 100_000;

/// Signature of a host function callable from the sandbox
pub type HostFn = dyn Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync;

/// A host function exposed to scripts.
///
/// Arguments are marshalled back to the host on every call; an `Err`
/// message is thrown into the script as an `Error`.
#[derive(Clone)]
pub struct HostFunction(Arc<HostFn>);

impl HostFunction {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the function
    pub fn call(&self, args: Vec<HostValue>) -> Result<HostValue, String> {
        (self.0)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

/// Host-side value
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Number without a fractional part, within the safe-integer range
    Int(i64),
    /// Any other number
    Float(f64),
    /// String
    String(String),
    /// Array
    Array(Vec<HostValue>),
    /// Plain object, in insertion order
    Object(Vec<(String, HostValue)>),
    /// Callable host function
    Function(HostFunction),
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl HostValue {
    /// Create a number, keeping integral values within the safe range as integers
    pub fn number(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 {
            Self::Int(f as i64)
        } else {
            Self::Float(f)
        }
    }

    /// Create a function value
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        Self::Function(HostFunction::new(f))
    }

    /// Script-facing type name (`typeof`)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) | Self::Object(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
        }
    }

    /// Whether this is `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a property of an object value
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// JavaScript truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) => true,
        }
    }

    /// Convert into JSON, following `JSON.stringify` rules for `undefined`
    /// (dropped from objects, `null` elsewhere). Functions are rejected.
    pub fn into_json(self) -> Result<serde_json::Value, MarshalError> {
        use serde_json::Value as Json;
        Ok(match self {
            Self::Undefined | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(b),
            Self::Int(i) => Json::Number(Number::from(i)),
            Self::Float(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s),
            Self::Array(items) => Json::Array(
                items
                    .into_iter()
                    .map(HostValue::into_json)
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    if matches!(value, Self::Undefined) {
                        continue;
                    }
                    map.insert(key, value.into_json()?);
                }
                Json::Object(map)
            }
            Self::Function(_) => return Err(MarshalError::Unsupported { type_name: "function" }),
        })
    }

    /// Convert into a variable value; `undefined` has none
    pub fn into_variable_value(self) -> Result<Option<VariableValue>, MarshalError> {
        match self {
            Self::Undefined => Ok(None),
            Self::Float(f) => Ok(Some(VariableValue::float(f))),
            other => other.into_json().map(|json| Some(VariableValue::from(json))),
        }
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<VariableValue> for HostValue {
    fn from(value: VariableValue) -> Self {
        Self::from(serde_json::Value::from(value))
    }
}

impl From<Option<VariableValue>> for HostValue {
    fn from(value: Option<VariableValue>) -> Self {
        value.map_or(Self::Undefined, Self::from)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Build an engine value from a host value
pub fn to_sandbox<'js>(ctx: &Ctx<'js>, value: &HostValue) -> Result<Value<'js>, MarshalError> {
    Ok(match value {
        HostValue::Undefined => Value::new_undefined(ctx.clone()),
        HostValue::Null => Value::new_null(ctx.clone()),
        HostValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        HostValue::Int(i) => match i32::try_from(*i) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            Err(_) => Value::new_float(ctx.clone(), *i as f64),
        },
        HostValue::Float(f) => Value::new_float(ctx.clone(), *f),
        HostValue::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        HostValue::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, to_sandbox(ctx, item)?)?;
            }
            array.into_value()
        }
        HostValue::Object(entries) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in entries {
                object.set(key.as_str(), to_sandbox(ctx, item)?)?;
            }
            object.into_value()
        }
        HostValue::Function(function) => {
            let function = function.clone();
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                    let args = args
                        .0
                        .iter()
                        .map(to_host)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| throw(&ctx, &e.to_string()))?;
                    let result = function.call(args).map_err(|message| throw(&ctx, &message))?;
                    to_sandbox(&ctx, &result).map_err(|e| throw(&ctx, &e.to_string()))
                },
            )?
            .into_value()
        }
    })
}

/// Read an engine value back into a host value.
///
/// Script functions, symbols and other engine-only values have no host
/// representation and fail with [`MarshalError::Unsupported`].
pub fn to_host(value: &Value<'_>) -> Result<HostValue, MarshalError> {
    let mut budget = MAX_NODES;
    to_host_at(value, 0, &mut budget)
}

fn to_host_at(
    value: &Value<'_>,
    depth: usize,
    budget: &mut usize,
) -> Result<HostValue, MarshalError> {
    if depth > MAX_DEPTH {
        return Err(MarshalError::TooDeep { limit: MAX_DEPTH });
    }
    if *budget == 0 {
        return Err(MarshalError::TooLarge { limit: MAX_NODES });
    }
    *budget -= 1;

    if value.is_undefined() {
        return Ok(HostValue::Undefined);
    }
    if value.is_null() {
        return Ok(HostValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(HostValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(HostValue::Int(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(HostValue::number(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(HostValue::String(s.to_string()?));
    }
    if value.is_function() {
        return Err(MarshalError::Unsupported { type_name: "function" });
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for index in 0..array.len() {
            let item: Value<'_> = array.get(index)?;
            items.push(to_host_at(&item, depth + 1, budget)?);
        }
        return Ok(HostValue::Array(items));
    }
    if let Some(object) = value.as_object() {
        let mut entries = Vec::new();
        for prop in object.props::<String, Value<'_>>() {
            let (key, item) = prop?;
            entries.push((key, to_host_at(&item, depth + 1, budget)?));
        }
        return Ok(HostValue::Object(entries));
    }

    Err(MarshalError::Unsupported {
        type_name: engine_type_name(value),
    })
}

fn engine_type_name(value: &Value<'_>) -> &'static str {
    match value.type_of() {
        Type::Symbol => "symbol",
        Type::BigInt => "bigint",
        _ => "unknown",
    }
}

/// Build an `Error` exception to be thrown into the script
pub(crate) fn throw(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    Exception::throw_message(ctx, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn with_ctx<F: FnOnce(&Ctx<'_>)>(f: F) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| f(&ctx));
    }

    #[test]
    fn test_integers_and_floats_are_preserved() {
        with_ctx(|ctx| {
            for value in [HostValue::Int(42), HostValue::Float(1.5), HostValue::Int(1 << 40)] {
                let js = to_sandbox(ctx, &value).unwrap();
                assert_eq!(to_host(&js).unwrap(), value);
            }

            let js: Value<'_> = ctx.eval("3.0").unwrap();
            assert_eq!(to_host(&js).unwrap(), HostValue::Int(3));

            let js: Value<'_> = ctx.eval("2 ** 60").unwrap();
            assert!(matches!(to_host(&js).unwrap(), HostValue::Float(_)));
        });
    }

    #[test]
    fn test_object_insertion_order_is_preserved() {
        with_ctx(|ctx| {
            let js: Value<'_> = ctx.eval("({ zeta: 1, alpha: [true, null, 'x'], mid: { k: undefined } })").unwrap();
            let host = to_host(&js).unwrap();
            let HostValue::Object(entries) = &host else {
                panic!("expected object");
            };
            let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
            assert_eq!(host.into_json().unwrap(), json!({"zeta": 1, "alpha": [true, null, "x"], "mid": {}}));
        });
    }

    #[test]
    fn test_script_functions_do_not_cross() {
        with_ctx(|ctx| {
            let js: Value<'_> = ctx.eval("(() => 1)").unwrap();
            assert_eq!(
                to_host(&js).unwrap_err(),
                MarshalError::Unsupported { type_name: "function" }
            );

            let js: Value<'_> = ctx.eval("Symbol('s')").unwrap();
            assert!(to_host(&js).is_err());
        });
    }

    #[test]
    fn test_cycles_are_rejected() {
        with_ctx(|ctx| {
            let js: Value<'_> = ctx.eval("const a = {}; a.self = a; a").unwrap();
            assert_eq!(to_host(&js).unwrap_err(), MarshalError::TooDeep { limit: MAX_DEPTH });
        });
    }

    #[test]
    fn test_shared_subobjects_hit_the_node_budget() {
        with_ctx(|ctx| {
            let js: Value<'_> = ctx
                .eval("let o = {}; for (let i = 0; i < 40; i++) o = {a: o, b: o}; o")
                .unwrap();
            assert_eq!(to_host(&js).unwrap_err(), MarshalError::TooLarge { limit: MAX_NODES });
        });
    }

    #[test]
    fn test_bigint_is_unsupported() {
        with_ctx(|ctx| {
            let js: Value<'_> = ctx.eval("10n").unwrap();
            assert_eq!(
                to_host(&js).unwrap_err(),
                MarshalError::Unsupported { type_name: "bigint" }
            );
        });
    }

    #[test]
    fn test_host_function_is_callable() {
        with_ctx(|ctx| {
            let add = HostValue::function(|args| match args.as_slice() {
                [HostValue::Int(a), HostValue::Int(b)] => Ok(HostValue::Int(a + b)),
                _ => Err("add expects two integers".to_string()),
            });
            ctx.globals().set("add", to_sandbox(ctx, &add).unwrap()).unwrap();

            let sum: i32 = ctx.eval("add(2, 3)").unwrap();
            assert_eq!(sum, 5);

            let message: String = ctx
                .eval("try { add('a'); '' } catch (e) { e.message }")
                .unwrap();
            assert_eq!(message, "add expects two integers");
        });
    }

    #[test]
    fn test_json_conversion() {
        let host = HostValue::from(json!({"a": [1, 2.5, "s"], "b": null}));
        assert_eq!(host.get("b"), Some(&HostValue::Null));
        assert_eq!(host.into_json().unwrap(), json!({"a": [1, 2.5, "s"], "b": null}));

        let f = HostValue::function(|_| Ok(HostValue::Undefined));
        assert!(f.into_json().is_err());
    }

    #[test]
    fn test_variable_value_conversion() {
        assert_eq!(HostValue::Undefined.into_variable_value().unwrap(), None);
        assert_eq!(
            HostValue::Float(4.0).into_variable_value().unwrap(),
            Some(VariableValue::from(4i64))
        );
        assert_eq!(HostValue::from(Some(VariableValue::from("x"))), HostValue::from("x"));
    }
}
