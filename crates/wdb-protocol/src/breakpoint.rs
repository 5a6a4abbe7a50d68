//! Breakpoint descriptors as exchanged with debuggees and browsers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A breakpoint descriptor: an opaque JSON object (file, line, condition,
/// function, ...) compared structurally. The `temporary` key marks one-shot
/// breakpoints, which are forwarded but never kept in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Breakpoint(Map<String, Value>);

impl Breakpoint {
    /// Parse a descriptor from its JSON text form. Anything that is not a
    /// JSON object is rejected.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Whether the `temporary` key is present and truthy.
    pub fn is_temporary(&self) -> bool {
        self.0
            .get("temporary")
            .is_some_and(|value| !matches!(value, Value::Null | Value::Bool(false)))
    }

    /// Drop the `temporary` key so the stored form only describes the
    /// breakpoint itself.
    pub fn strip_temporary(&mut self) {
        self.0.remove("temporary");
    }

    pub fn set_temporary(&mut self, temporary: bool) {
        self.0.insert("temporary".to_string(), json!(temporary));
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}
