//! Usable action port, its type-erased wrapper, and the action registry.

pub mod box_action;
pub mod registry;
pub mod usable;

pub use box_action::BoxAction;
pub use registry::ActionRegistry;
pub use usable::{ActionContext, ActionError, UsableAction};
