//! Shared domain types for Lexflow.
//!
//! Pure data: no I/O, no async. Everything here is serde-serializable and
//! shared between the core engine and the infra layer.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
