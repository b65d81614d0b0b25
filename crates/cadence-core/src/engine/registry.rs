//! Name-indexed registry of execution engines.

use std::collections::HashMap;
use std::sync::Arc;

use super::box_engine::BoxEngine;

/// Name of the engine (and implicit target) used when nothing is configured.
pub const DEFAULT_ENGINE: &str = "local";

/// Registry of available execution engines, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<BoxEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own name, replacing any previous one.
    pub fn register(&mut self, engine: BoxEngine) {
        self.engines
            .insert(engine.name().to_string(), Arc::new(engine));
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
