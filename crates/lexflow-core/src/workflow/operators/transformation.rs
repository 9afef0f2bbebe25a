//! Data transformation operator.
//!
//! Applies `transformations` from the step parameters to a copy of the
//! context and returns it under `transformed_data`. Transformations whose
//! source field is absent are skipped.

use std::future::Future;
use std::pin::Pin;

use lexflow_types::error::OperatorError;
use lexflow_types::workflow::JsonMap;
use serde_json::{Value, json};

use crate::workflow::context::value_to_string;
use crate::workflow::operator::StepOperator;

pub struct DataTransformationOperator;

impl StepOperator for DataTransformationOperator {
    fn step_type(&self) -> &'static str {
        "data_transformation"
    }

    fn execute<'a>(
        &'a self,
        parameters: &'a JsonMap,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, OperatorError>> + Send + 'a>> {
        Box::pin(async move {
            let transformations = parameters
                .get("transformations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let mut transformed = context.clone();
            for transform in &transformations {
                let operation = transform.get("operation").and_then(Value::as_str);
                let source = transform.get("source_field").and_then(Value::as_str);
                let target = transform.get("target_field").and_then(Value::as_str);
                let (Some(operation), Some(source), Some(target)) = (operation, source, target)
                else {
                    continue;
                };
                let Some(source_value) = transformed.get(source).cloned() else {
                    continue;
                };
                let new_value = match operation {
                    "copy" => source_value,
                    "uppercase" => {
                        Value::String(value_to_string(&source_value).to_uppercase())
                    }
                    "lowercase" => {
                        Value::String(value_to_string(&source_value).to_lowercase())
                    }
                    _ => continue,
                };
                transformed.insert(target.to_string(), new_value);
            }

            let mut output = JsonMap::new();
            output.insert("operation".to_string(), json!("data_transformation"));
            output.insert("transformed_data".to_string(), Value::Object(transformed));
            output.insert(
                "applied_transformations".to_string(),
                Value::Array(transformations),
            );
            output.insert("status".to_string(), json!("completed"));
            Ok(output)
        })
    }
}
