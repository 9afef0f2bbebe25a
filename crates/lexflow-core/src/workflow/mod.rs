//! Workflow execution: context data-flow, operator dispatch, the sequential
//! engine, and the polling monitor.

pub mod context;
pub mod engine;
pub mod monitor;
pub mod operator;
pub mod operators;
pub mod retry;

pub use engine::{EngineError, ExecutionEngine};
pub use monitor::{MonitorConfig, WorkflowMonitor};
pub use operator::{OperatorRegistry, StepOperator};
