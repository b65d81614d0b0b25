//! Workflow orchestration: steps, routines, strategies, and the scheduler.

pub mod context;
pub mod dag;
pub mod definition;
pub mod expression;
pub mod lifecycle;
pub mod routine;
pub mod scheduler;
pub mod step;
pub mod strategy;

pub use definition::{load_workflow_file, parse_workflow_yaml, validate_definition, WorkflowError};
pub use lifecycle::Outcome;
pub use scheduler::{default_max_concurrent_routines, Workflow, WorkflowOptions};
