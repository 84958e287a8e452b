use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a state node folds its input into a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMode {
    #[default]
    Merge,
    Replace,
    Append,
}

/// Run-scoped keyed memory written by state nodes and read through the
/// template `state.<namespace>` scope. Child runners get their own store.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<HashMap<String, Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().unwrap().clone()
    }

    /// Fold `value` into `namespace` and return the namespace's new value.
    pub fn apply(&self, namespace: &str, mode: StateMode, value: Value) -> Value {
        let mut inner = self.inner.lock().unwrap();
        let updated = match mode {
            StateMode::Replace => value,
            StateMode::Merge => match (inner.remove(namespace), value) {
                (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                    for (key, item) in incoming {
                        existing.insert(key, item);
                    }
                    Value::Object(existing)
                }
                (_, value) => value,
            },
            StateMode::Append => match inner.remove(namespace) {
                Some(Value::Array(mut items)) => {
                    items.push(value);
                    Value::Array(items)
                }
                Some(existing) => Value::Array(vec![existing, value]),
                None => Value::Array(vec![value]),
            },
        };
        inner.insert(namespace.to_string(), updated.clone());
        updated
    }
}
