//! Document extraction operator.
//!
//! Scaffold for a real extraction pipeline (OCR, format conversion): the
//! accumulated context, which upstream ingestion seeded with document
//! content, is passed through under `extracted_data`.

use std::future::Future;
use std::pin::Pin;

use lexflow_types::error::OperatorError;
use lexflow_types::workflow::JsonMap;
use serde_json::Value;

use crate::workflow::operator::StepOperator;

pub struct DocumentExtractionOperator;

impl StepOperator for DocumentExtractionOperator {
    fn step_type(&self) -> &'static str {
        "document_extraction"
    }

    fn execute<'a>(
        &'a self,
        _parameters: &'a JsonMap,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, OperatorError>> + Send + 'a>> {
        Box::pin(async move {
            let mut output = JsonMap::new();
            output.insert(
                "operation".to_string(),
                Value::String("document_extraction".to_string()),
            );
            output.insert("extracted_data".to_string(), Value::Object(context.clone()));
            output.insert(
                "status".to_string(),
                Value::String("completed".to_string()),
            );
            Ok(output)
        })
    }
}
