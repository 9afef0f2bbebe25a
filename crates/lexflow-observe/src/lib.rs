//! Observability setup for Lexflow.

pub mod tracing_setup;
