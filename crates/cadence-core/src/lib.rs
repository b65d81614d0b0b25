//! Workflow engine for Cadence.
//!
//! Defines the ports the infrastructure layer implements (execution engines,
//! usable actions) and the scheduler that drives them. It depends only on
//! `cadence-types`, never on `cadence-infra`.

pub mod action;
pub mod engine;
pub mod event;
pub mod workflow;

#[cfg(test)]
mod testing;
