//! Infrastructure layer for Cadence.
//!
//! Contains implementations of the ports defined in `cadence-core`: the local
//! shell execution engine, the built-in usable actions, and loading of the
//! global `config.toml`.

pub mod action;
pub mod config;
pub mod engine;
