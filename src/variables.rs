// src/variables.rs
use indexmap::IndexMap;
use serde_json::Value;

/// Variables shared by all steps of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct Variables {
    store: IndexMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Variables {
            store: IndexMap::new(),
        }
    }

    /// Absent names read as `None` rather than failing
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.store.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.store.get_mut(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(name.into(), value.into());
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys().cloned().collect()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.store.shift_remove(name).is_some()
    }

    /// Add one to an integer variable, treating a missing or non-integer value as 0
    pub fn increment_counter(&mut self, name: &str) -> i64 {
        let current = self.store.get(name).and_then(Value::as_i64).unwrap_or(0);
        let new_value = current + 1;
        self.store.insert(name.to_string(), Value::from(new_value));
        new_value
    }
}

impl From<IndexMap<String, Value>> for Variables {
    fn from(store: IndexMap<String, Value>) -> Self {
        Variables { store }
    }
}
