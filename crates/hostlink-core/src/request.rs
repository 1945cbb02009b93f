//! Request parameters
//!
//! Every protocol request carries a [`RequestParams`] bag. Lookups resolve
//! in a fixed order:
//!
//! 1. an explicitly set field (what the request builder assigned)
//! 2. the raw keyword bag supplied by the caller
//! 3. the caller's default
//!
//! A validator registered for the key then transforms whatever was resolved,
//! including a missing value (passed as `Value::Null`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Per-key transform applied on lookup
pub type Validator = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Common behaviour of protocol requests
pub trait Request: Send + Sync {
    /// Protocol label used in logs (`https`, `ssh`, `jdbc`, ...)
    fn protocol(&self) -> &str;

    /// Whether the connection must be authenticated before dispatch
    fn needs_auth(&self) -> bool {
        true
    }

    /// Pre-flight check; an error message becomes a failure response
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Immutable-after-build parameter bag with validator dispatch
#[derive(Clone, Default)]
pub struct RequestParams {
    fields: Map<String, Value>,
    kwargs: Map<String, Value>,
    validators: HashMap<String, Validator>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kwargs(kwargs: Map<String, Value>) -> Self {
        Self {
            kwargs,
            ..Self::default()
        }
    }

    /// Set an explicit field; takes precedence over the keyword bag
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn set_kwarg(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.kwargs.insert(key.into(), value.into());
    }

    pub fn set_validator<F>(&mut self, key: impl Into<String>, validator: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.validators.insert(key.into(), Arc::new(validator));
    }

    /// Resolve `key` with no default
    pub fn get(&self, key: &str) -> Option<Value> {
        self.resolve(key, None)
    }

    /// Resolve `key`, falling back to `default`
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.resolve(key, Some(default)).unwrap_or(Value::Null)
    }

    /// Resolve `key` as a string; non-string values yield `None`
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Resolve `key` as a JSON object; anything else yields an empty map
    pub fn get_object(&self, key: &str) -> Map<String, Value> {
        match self.get(key) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    fn resolve(&self, key: &str, default: Option<Value>) -> Option<Value> {
        let raw = self
            .fields
            .get(key)
            .or_else(|| self.kwargs.get(key))
            .cloned()
            .or(default);

        match self.validators.get(key) {
            Some(validator) => Some(validator(raw.unwrap_or(Value::Null))),
            None => raw,
        }
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut validators: Vec<&String> = self.validators.keys().collect();
        validators.sort();
        f.debug_struct("RequestParams")
            .field("fields", &self.fields)
            .field("kwargs", &self.kwargs)
            .field("validators", &validators)
            .finish()
    }
}
