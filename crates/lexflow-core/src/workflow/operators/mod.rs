//! Built-in step operators.
//!
//! Four standard step types ship with the engine: `document_extraction`,
//! `ai_analysis`, `validation`, and `data_transformation`. Anything else is
//! skipped by the engine rather than failing the run, so definitions written
//! for a newer engine degrade gracefully on an older one.

mod ai_analysis;
mod document_extraction;
mod transformation;
mod validation;

pub use ai_analysis::AiAnalysisOperator;
pub use document_extraction::DocumentExtractionOperator;
pub use transformation::DataTransformationOperator;
pub use validation::ValidationOperator;
