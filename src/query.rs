use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A Dataset API query document.
///
/// Stored as the JSON object the caller wrote and forwarded verbatim; the
/// pipeline only overlays `format` and `runOnJobQueue` on the wire copy.
/// The getters are conveniences and never reshape the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    document: Map<String, Value>,
}

impl Query {
    /// Accepts any JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::InvalidQuery)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.document.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    /// Sets a top-level field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.document.insert(key.into(), value)
    }

    pub fn units(&self) -> Option<&Value> {
        self.get("units")
    }

    pub fn geometry(&self) -> Option<&Value> {
        self.get("geometry")
    }

    pub fn time_intervals(&self) -> Option<&Value> {
        self.get("timeIntervals")
    }

    /// The sub-queries, when `queries` is an array.
    pub fn queries(&self) -> Option<&[Value]> {
        self.get("queries").and_then(Value::as_array).map(Vec::as_slice)
    }

    /// The document as sent on the wire: the query with `overrides` applied
    /// on top. `self` is left untouched.
    pub(crate) fn wire_body(&self, overrides: &[(&str, Value)]) -> Value {
        let mut body = self.document.clone();
        for (k, v) in overrides {
            body.insert((*k).to_string(), v.clone());
        }
        Value::Object(body)
    }

    /// The `format` the caller asked for, if any.
    pub fn format(&self) -> Option<&str> {
        self.get("format").and_then(Value::as_str)
    }
}

impl FromStr for Query {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(Error::InvalidQuery)
    }
}

impl TryFrom<Value> for Query {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}
