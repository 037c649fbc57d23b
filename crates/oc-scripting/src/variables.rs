//! Layered variable scopes and interpolation
//!
//! Scopes, lowest to highest precedence:
//!
//! | Scope | Lifetime |
//! |---|---|
//! | global | session (shared) |
//! | environment | session (shared) |
//! | collection | one run |
//! | folder | one run |
//! | request | one run |
//! | runtime | session (shared) |
//!
//! A [`VariableStore`] is a cheap handle: clones see the same scopes.
//! [`VariableStore::fork`] creates a store that shares the session scopes
//! but has its own collection/folder/request layers, so concurrent runs
//! only interfere through global, environment and runtime variables.

use crate::error::VariableError;
use crate::interpolate::{interpolate_with, json_to_text, walk_path};
use oc_core::VariableValue;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A variable layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableScope {
    /// Global environment defaults
    Global,
    /// Selected environment
    Environment,
    /// Collection root variables
    Collection,
    /// Enclosing folder variables (innermost wins)
    Folder,
    /// Request variables
    Request,
    /// Script-set runtime variables
    Runtime,
}

impl VariableScope {
    /// All scopes, highest precedence first
    pub const BY_PRECEDENCE: [VariableScope; 6] = [
        VariableScope::Runtime,
        VariableScope::Request,
        VariableScope::Folder,
        VariableScope::Collection,
        VariableScope::Environment,
        VariableScope::Global,
    ];

    fn is_shared(self) -> bool {
        matches!(
            self,
            VariableScope::Global | VariableScope::Environment | VariableScope::Runtime
        )
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Global => "global",
            Self::Environment => "environment",
            Self::Collection => "collection",
            Self::Folder => "folder",
            Self::Request => "request",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

type Layer = BTreeMap<String, VariableValue>;

#[derive(Debug, Default)]
struct SessionScopes {
    global: Layer,
    environment: Layer,
    runtime: Layer,
    persisted: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RunScopes {
    collection: Layer,
    folder: Layer,
    request: Layer,
}

/// Shared handle over the variable scopes
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    session: Arc<RwLock<SessionScopes>>,
    run: Arc<RwLock<RunScopes>>,
}

/// Check a name against `^[\w\-.]*$`
pub fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub(crate) fn validate_name(name: &str, kind: &'static str) -> Result<(), VariableError> {
    if name.is_empty() {
        return Err(VariableError::MissingName { kind });
    }
    if !is_valid_name(name) {
        return Err(VariableError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// A store sharing this one's session scopes with empty run scopes
    pub fn fork(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            run: Arc::default(),
        }
    }

    /// Replace a whole scope (builder style)
    pub fn with_scope<I>(self, scope: VariableScope, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, VariableValue)>,
    {
        self.set_scope(scope, vars);
        self
    }

    /// Replace a whole scope. Later duplicates win.
    pub fn set_scope<I>(&self, scope: VariableScope, vars: I)
    where
        I: IntoIterator<Item = (String, VariableValue)>,
    {
        let layer: Layer = vars.into_iter().collect();
        if scope.is_shared() {
            let mut session = self.session.write();
            *session_layer_mut(&mut session, scope) = layer;
        } else {
            let mut run = self.run.write();
            *run_layer_mut(&mut run, scope) = layer;
        }
    }

    /// Copy of one scope
    pub fn scope(&self, scope: VariableScope) -> BTreeMap<String, VariableValue> {
        self.read_raw(scope, |layer| layer.clone())
    }

    /// Every visible variable, resolved by precedence
    pub fn merged(&self) -> BTreeMap<String, VariableValue> {
        let mut merged = BTreeMap::new();
        for scope in VariableScope::BY_PRECEDENCE.iter().rev() {
            merged.extend(self.scope(*scope));
        }
        merged
    }

    /// Highest-precedence raw value of `name`
    pub fn resolve(&self, name: &str) -> Option<VariableValue> {
        let session = self.session.read();
        let run = self.run.read();
        VariableScope::BY_PRECEDENCE.iter().find_map(|scope| {
            let layer = if scope.is_shared() {
                session_layer(&session, *scope)
            } else {
                run_layer(&run, *scope)
            };
            layer.get(name).cloned()
        })
    }

    fn read_raw<T>(&self, scope: VariableScope, f: impl FnOnce(&Layer) -> T) -> T {
        if scope.is_shared() {
            f(session_layer(&self.session.read(), scope))
        } else {
            f(run_layer(&self.run.read(), scope))
        }
    }

    fn get_in(&self, scope: VariableScope, key: &str) -> Option<VariableValue> {
        let value = self.read_raw(scope, |layer| layer.get(key).cloned())?;
        Some(self.interpolate(&value))
    }

    fn set_session(&self, scope: VariableScope, key: &str, value: VariableValue) {
        let mut session = self.session.write();
        session_layer_mut(&mut session, scope).insert(key.to_string(), value);
    }

    fn delete_session(&self, scope: VariableScope, key: &str) {
        let mut session = self.session.write();
        session_layer_mut(&mut session, scope).remove(key);
    }

    // Environment scope

    /// Read an environment variable
    pub fn get_env_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Environment, key)
    }

    /// Set an environment variable. Persisted values must be strings.
    pub fn set_env_var(
        &self,
        key: &str,
        value: VariableValue,
        persist: bool,
    ) -> Result<(), VariableError> {
        validate_name(key, "env ")?;
        if persist && !value.is_string() {
            return Err(VariableError::PersistedType {
                name: key.to_string(),
                type_name: value.type_name(),
            });
        }

        let mut session = self.session.write();
        session.environment.insert(key.to_string(), value);
        if persist {
            session.persisted.insert(key.to_string());
        }
        Ok(())
    }

    /// Remove an environment variable
    pub fn delete_env_var(&self, key: &str) {
        let mut session = self.session.write();
        session.environment.remove(key);
        session.persisted.remove(key);
    }

    /// Whether an environment variable exists
    pub fn has_env_var(&self, key: &str) -> bool {
        self.read_raw(VariableScope::Environment, |layer| layer.contains_key(key))
    }

    /// Environment variables set with `persist`, for writing back to disk
    pub fn persisted_env_vars(&self) -> Vec<(String, VariableValue)> {
        let session = self.session.read();
        session
            .persisted
            .iter()
            .filter_map(|key| {
                session
                    .environment
                    .get(key)
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    // Global scope

    /// Read a global environment variable
    pub fn get_global_env_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Global, key)
    }

    /// Set a global environment variable
    pub fn set_global_env_var(&self, key: &str, value: VariableValue) -> Result<(), VariableError> {
        validate_name(key, "")?;
        self.set_session(VariableScope::Global, key, value);
        Ok(())
    }

    /// Remove a global environment variable
    pub fn delete_global_env_var(&self, key: &str) {
        self.delete_session(VariableScope::Global, key);
    }

    // Runtime scope

    /// Read a runtime variable
    pub fn get_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Runtime, key)
    }

    /// Set a runtime variable
    pub fn set_var(&self, key: &str, value: VariableValue) -> Result<(), VariableError> {
        validate_name(key, "")?;
        self.set_session(VariableScope::Runtime, key, value);
        Ok(())
    }

    /// Whether a runtime variable exists
    pub fn has_var(&self, key: &str) -> bool {
        self.read_raw(VariableScope::Runtime, |layer| layer.contains_key(key))
    }

    /// Remove a runtime variable
    pub fn delete_var(&self, key: &str) {
        self.delete_session(VariableScope::Runtime, key);
    }

    /// Remove every runtime variable
    pub fn delete_all_vars(&self) {
        self.session.write().runtime.clear();
    }

    // Read-only layers

    /// Read a collection variable
    pub fn get_collection_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Collection, key)
    }

    /// Read a folder variable
    pub fn get_folder_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Folder, key)
    }

    /// Read a request variable
    pub fn get_request_var(&self, key: &str) -> Option<VariableValue> {
        self.get_in(VariableScope::Request, key)
    }

    // Interpolation

    /// Text for one placeholder key, or `None` when unresolved.
    ///
    /// An exact name wins; otherwise the longest variable name that is a
    /// dotted/bracketed prefix of the key is walked into.
    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(value) = self.resolve(key) {
            return Some(value.to_interpolated_string());
        }

        let splits = key
            .char_indices()
            .filter(|(_, c)| *c == '.' || *c == '[')
            .map(|(i, _)| i)
            .rev();
        for split in splits {
            let (name, path) = key.split_at(split);
            if let Some(VariableValue::Json(json)) = self.resolve(name) {
                return walk_path(&json, path).map(json_to_text);
            }
        }
        None
    }

    /// Substitute `{{name}}` placeholders in a string
    pub fn interpolate_str(&self, template: &str) -> String {
        interpolate_with(template, |key| self.lookup(key))
    }

    /// Interpolate a JSON value: strings directly, structures by
    /// stringify, substitute, parse. A structure whose substituted text no
    /// longer parses is returned unchanged.
    pub fn interpolate_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.interpolate_str(s)),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                let text = value.to_string();
                let substituted = self.interpolate_str(&text);
                if substituted == text {
                    return value.clone();
                }
                serde_json::from_str(&substituted).unwrap_or_else(|_| value.clone())
            }
            other => other.clone(),
        }
    }

    /// Interpolate a variable value, keeping its shape
    pub fn interpolate(&self, value: &VariableValue) -> VariableValue {
        match value {
            VariableValue::Str(s) => VariableValue::Str(self.interpolate_str(s)),
            VariableValue::Json(json) => VariableValue::from(self.interpolate_json(json)),
            other => other.clone(),
        }
    }
}

fn session_layer(session: &SessionScopes, scope: VariableScope) -> &Layer {
    match scope {
        VariableScope::Global => &session.global,
        VariableScope::Runtime => &session.runtime,
        _ => &session.environment,
    }
}

fn session_layer_mut(session: &mut SessionScopes, scope: VariableScope) -> &mut Layer {
    match scope {
        VariableScope::Global => &mut session.global,
        VariableScope::Runtime => &mut session.runtime,
        _ => &mut session.environment,
    }
}

fn run_layer(run: &RunScopes, scope: VariableScope) -> &Layer {
    match scope {
        VariableScope::Collection => &run.collection,
        VariableScope::Folder => &run.folder,
        _ => &run.request,
    }
}

fn run_layer_mut(run: &mut RunScopes, scope: VariableScope) -> &mut Layer {
    match scope {
        VariableScope::Collection => &mut run.collection,
        VariableScope::Folder => &mut run.folder,
        _ => &mut run.request,
    }
}
