use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::StartupError;

/// Immutable parameter bag scoping one partition's run.
///
/// Cloning is cheap; the map is shared and never mutated after [`ExecutionContextBuilder::build`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Arc<BTreeMap<String, Value>>,
}

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
pub struct ExecutionContextBuilder {
    values: BTreeMap<String, Value>,
}

impl ExecutionContextBuilder {
    pub fn put_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn put_i64(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), Value::from(value));
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            values: Arc::new(self.values),
        }
    }
}

/// Unique, stable name of a partition, used for logging and audit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionLabel(String);

impl PartitionLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A partition as handed to one worker: its label and its read-only context
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub label: PartitionLabel,
    pub context: ExecutionContext,
}

impl Partition {
    pub fn new(label: PartitionLabel, context: ExecutionContext) -> Self {
        Self { label, context }
    }

    /// Look up a required string key, reporting the partition when it is missing
    pub fn require_str(&self, key: &str) -> Result<&str, StartupError> {
        self.context
            .get_str(key)
            .ok_or_else(|| StartupError::MissingContextKey {
                partition: self.label.to_string(),
                key: key.to_string(),
            })
    }
}
