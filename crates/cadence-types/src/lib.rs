//! Shared domain types for Cadence.
//!
//! This crate contains the serde types used across the workspace: the
//! workflow descriptor, the run status state machine, the graph snapshot,
//! the event stream, and global configuration.
//!
//! Zero infrastructure dependencies -- only serde, indexmap, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod event;
pub mod graph;
pub mod status;
