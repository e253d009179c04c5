//! Layered variable store.
//!
//! Resolution walks the scopes highest-priority first: invocation overrides,
//! run-time captures, environment variables, global project variables. The
//! inline placeholder default sits below all four and is handled by the
//! renderer. Only the capture layer mutates after seeding.

use std::collections::HashMap;

use rand::Rng;
use serde_json::Value;

use crate::errors::EngineError;

/// Upper bound (exclusive) for the `$randomInt` builtin.
const RANDOM_INT_UPPER: i64 = 10_000;

/// Per-flow variable state. Instantiated when a flow starts and discarded
/// when it ends; never shared across flows.
#[derive(Debug, Default)]
pub struct VarStore {
    overrides: HashMap<String, Value>,
    captures: HashMap<String, Value>,
    env: HashMap<String, Value>,
    global: HashMap<String, Value>,
}

impl VarStore {
    /// Populates the three static layers. They are read-only afterwards.
    pub fn seed(
        global: HashMap<String, Value>,
        env: HashMap<String, Value>,
        overrides: HashMap<String, Value>,
    ) -> Self {
        Self {
            overrides,
            captures: HashMap::new(),
            env,
            global,
        }
    }

    /// Writes to the dynamic capture layer.
    ///
    /// Names beginning with `$` are reserved for builtins; capturing into one
    /// is a configuration error.
    pub fn capture(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        if name.starts_with('$') {
            return Err(EngineError::Config(format!(
                "cannot capture into reserved name '{name}'"
            )));
        }
        self.captures.insert(name.to_string(), value);
        Ok(())
    }

    /// Resolves a name against the lattice, highest scope first. Builtins
    /// are evaluated at call time and need no per-flow setup.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(builtin) = resolve_builtin(name) {
            return Some(builtin);
        }
        self.overrides
            .get(name)
            .or_else(|| self.captures.get(name))
            .or_else(|| self.env.get(name))
            .or_else(|| self.global.get(name))
            .cloned()
    }

    /// Merged deep copy of every layer, highest scope winning, for debug
    /// output. Builtins are excluded since they change per resolution.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut merged = self.global.clone();
        merged.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(self.captures.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(self.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// The capture layer alone. This is what the flow record persists, so
    /// static environment and global values never leak into run history.
    pub fn captured(&self) -> &HashMap<String, Value> {
        &self.captures
    }
}

fn resolve_builtin(name: &str) -> Option<Value> {
    match name {
        "$timestamp" => Some(Value::from(chrono::Utc::now().timestamp())),
        "$randomInt" => Some(Value::from(rand::thread_rng().gen_range(0..RANDOM_INT_UPPER))),
        _ => None,
    }
}
