//! `shell`: runs `with.commands` one after another through the step's
//! execution engine, stopping at the first failure.

use cadence_core::action::{ActionContext, ActionError, UsableAction};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellAction;

fn commands(ctx: &ActionContext) -> Result<Vec<&str>, ActionError> {
    let invalid =
        || ActionError::Setup("shell requires `commands` as a string or a list of strings".into());
    match ctx.param("commands") {
        Some(Value::String(command)) => Ok(vec![command.as_str()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

impl UsableAction for ShellAction {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
        for command in commands(ctx)? {
            let exit = ctx.run_command(command).await?;
            if !exit.success() {
                let reason = match exit.code {
                    Some(code) => format!("exit code {code}"),
                    None => "a signal".to_string(),
                };
                return Err(ActionError::Failed(format!(
                    "Command \"{command}\" failed with {reason}"
                )));
            }
        }
        Ok(None)
    }
}
