//! `output`: sets a step output without running anything.

use cadence_core::action::{ActionContext, ActionError, UsableAction};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputAction;

impl UsableAction for OutputAction {
    fn name(&self) -> &str {
        "output"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
        if let Some(message) = ctx.param("message") {
            let message = match message {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ctx.print(&format!("{message}\n"));
        }
        Ok(ctx.param("value").cloned())
    }
}
