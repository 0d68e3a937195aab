use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Mutable state shared by every step of a single workflow run.
///
/// Created once per run and owned exclusively by it. The page is not part of
/// the context; callers hand the page capability to the extraction engine
/// directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub results: HashMap<String, Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context seeded with the given variables
    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            results: HashMap::new(),
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Record the output of a completed step
    pub fn set_result(&mut self, step_id: impl Into<String>, value: Value) {
        self.results.insert(step_id.into(), value);
    }

    pub fn result(&self, step_id: &str) -> Option<&Value> {
        self.results.get(step_id)
    }

    /// Look up a top-level name in the merged view; step results shadow variables.
    pub fn lookup_root(&self, name: &str) -> Option<&Value> {
        self.results.get(name).or_else(|| self.variables.get(name))
    }

    /// Snapshot of `{...variables, ...results}`
    pub fn merged_view(&self) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in &self.results {
            merged.insert(key.clone(), value.clone());
        }

        merged
    }
}
