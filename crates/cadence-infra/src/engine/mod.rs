//! Execution engine adapters.

pub mod local;

pub use local::LocalEngine;
