//! Registry of usable actions, keyed by lower-cased name.

use std::collections::HashMap;
use std::sync::Arc;

use super::box_action::BoxAction;

#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<BoxAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its own name, replacing any previous one.
    pub fn register(&mut self, action: BoxAction) {
        self.actions
            .insert(action.name().to_lowercase(), Arc::new(action));
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<BoxAction>> {
        self.actions.get(&name.to_lowercase()).cloned()
    }

    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::usable::{ActionContext, ActionError, UsableAction};
    use serde_json::{json, Value};

    struct Echo;

    impl UsableAction for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
            Ok(ctx.param("value").cloned())
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let mut registry = ActionRegistry::new();
        registry.register(BoxAction::new(Echo));

        let action = registry.get("ECHO").unwrap();
        let ctx = ActionContext::new(json!({"value": 42}));
        assert_eq!(action.run(&ctx).await.unwrap(), Some(json!(42)));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list_names(), vec!["echo"]);
    }
}
