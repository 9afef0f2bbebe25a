//! Step operator trait and registry.
//!
//! Operators are dispatched by a step's `step_type` string. The trait is
//! object-safe (boxed futures) so the registry can hold heterogeneous
//! operators behind `Arc<dyn StepOperator>`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use lexflow_types::error::OperatorError;
use lexflow_types::workflow::JsonMap;

use crate::llm::BoxLanguageModel;

use super::operators::{
    AiAnalysisOperator, DataTransformationOperator, DocumentExtractionOperator,
    ValidationOperator,
};

/// A pluggable unit of work executed for one workflow step.
///
/// `parameters` comes from the step's definition snapshot; `context` is the
/// accumulated data-flow map. The returned object is merged into the context
/// by the engine; operators never mutate the context themselves.
pub trait StepOperator: Send + Sync {
    /// The `step_type` string this operator handles.
    fn step_type(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        parameters: &'a JsonMap,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, OperatorError>> + Send + 'a>>;
}

/// Maps `step_type` strings to operators.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: HashMap<&'static str, Arc<dyn StepOperator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four standard operators wired up.
    pub fn with_builtins(model: Arc<BoxLanguageModel>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DocumentExtractionOperator));
        registry.register(Arc::new(AiAnalysisOperator::new(model)));
        registry.register(Arc::new(ValidationOperator));
        registry.register(Arc::new(DataTransformationOperator));
        registry
    }

    /// Register an operator under its `step_type`, replacing any previous one.
    pub fn register(&mut self, operator: Arc<dyn StepOperator>) {
        self.operators.insert(operator.step_type(), operator);
    }

    pub fn get(&self, step_type: &str) -> Option<&Arc<dyn StepOperator>> {
        self.operators.get(step_type)
    }

    pub fn step_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operators.keys().copied()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("step_types", &self.operators.keys().collect::<Vec<_>>())
            .finish()
    }
}
