//! Core engine logic for Lexflow: the sequential workflow executor, step
//! operators, the polling monitor, repository traits, and the event bus.
//!
//! Storage backends live in `lexflow-infra`; this crate only depends on the
//! [`repository::WorkflowRepository`] trait (plus an in-memory implementation
//! used for tests and embedded deployments).

pub mod event;
pub mod llm;
pub mod repository;
pub mod workflow;
