//! Built-in usable actions.
//!
//! | Name     | `with` parameters                  | Output                      |
//! |----------|------------------------------------|-----------------------------|
//! | `sleep`  | `seconds` (number)                 | nothing                     |
//! | `output` | `value` (any), `message` (string)  | `value`, else the message   |
//! | `shell`  | `commands` (string or list)        | combined stdout             |

pub mod output;
pub mod shell;
pub mod sleep;

use cadence_core::action::BoxAction;

pub use output::OutputAction;
pub use shell::ShellAction;
pub use sleep::SleepAction;

/// Every built-in action, ready to register.
pub fn builtin_actions() -> Vec<BoxAction> {
    vec![
        BoxAction::new(SleepAction),
        BoxAction::new(OutputAction),
        BoxAction::new(ShellAction),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::action::ActionRegistry;

    #[test]
    fn builtins_register_under_their_names() {
        let mut registry = ActionRegistry::new();
        for action in builtin_actions() {
            registry.register(action);
        }
        assert_eq!(registry.list_names(), vec!["output", "shell", "sleep"]);
    }
}
