//! Observability setup for Cadence: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
