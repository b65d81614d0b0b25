//! Event distribution for workflow runs.

pub mod bus;
