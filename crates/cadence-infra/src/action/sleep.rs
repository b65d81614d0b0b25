//! `sleep`: waits for `with.seconds`, ending early when stopped.

use std::time::Duration;

use cadence_core::action::{ActionContext, ActionError, UsableAction};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct SleepAction;

fn seconds(ctx: &ActionContext) -> Result<f64, ActionError> {
    let seconds = match ctx.param("seconds") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => Ok(s),
        _ => Err(ActionError::Setup(
            "sleep requires a non-negative `seconds` parameter".to_string(),
        )),
    }
}

impl UsableAction for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
        let seconds = seconds(ctx)?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => Ok(None),
            _ = ctx.cancel.cancelled() => Err(ActionError::Stopped),
        }
    }
}
