//! Validation operator.
//!
//! Evaluates `rules` from the step parameters against the context. Rule
//! failures are data, not errors: the step completes with `all_passed: false`
//! and the run continues. Rules naming a field absent from the context are
//! skipped entirely, matching the permissive contract definitions rely on.

use std::future::Future;
use std::pin::Pin;

use lexflow_types::error::OperatorError;
use lexflow_types::workflow::JsonMap;
use serde_json::{Value, json};

use crate::workflow::context::value_to_string;
use crate::workflow::operator::StepOperator;

pub struct ValidationOperator;

/// `equals` / `not_equals` compare JSON values; `contains` tests the expected
/// value's string form as a substring of the field's string form; `not_empty`
/// rejects null and blank strings. Unknown conditions fail the rule.
fn evaluate_condition(field_value: &Value, condition: &str, expected: Option<&Value>) -> bool {
    match condition {
        "equals" => expected.is_some_and(|e| field_value == e),
        "not_equals" => expected.is_none_or(|e| field_value != e),
        "contains" => expected.is_some_and(|e| {
            value_to_string(field_value).contains(&value_to_string(e))
        }),
        "not_empty" => {
            !field_value.is_null() && !value_to_string(field_value).trim().is_empty()
        }
        _ => false,
    }
}

impl StepOperator for ValidationOperator {
    fn step_type(&self) -> &'static str {
        "validation"
    }

    fn execute<'a>(
        &'a self,
        parameters: &'a JsonMap,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, OperatorError>> + Send + 'a>> {
        Box::pin(async move {
            let rules = parameters
                .get("rules")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let mut results = Vec::new();
            for rule in &rules {
                let Some(field) = rule.get("field").and_then(Value::as_str) else {
                    continue;
                };
                let Some(field_value) = context.get(field) else {
                    continue;
                };
                let condition = rule.get("condition").and_then(Value::as_str).unwrap_or("");
                let passed = evaluate_condition(field_value, condition, rule.get("value"));
                results.push(json!({
                    "rule": rule,
                    "passed": passed,
                    "actual_value": field_value,
                }));
            }

            let all_passed = results
                .iter()
                .all(|r| r["passed"].as_bool().unwrap_or(false));

            let mut output = JsonMap::new();
            output.insert("operation".to_string(), json!("validation"));
            output.insert("validation_results".to_string(), Value::Array(results));
            output.insert("all_passed".to_string(), json!(all_passed));
            output.insert("status".to_string(), json!("completed"));
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> JsonMap {
        serde_json::from_value(value).unwrap()
    }

    fn run_rules(rules: serde_json::Value, context: serde_json::Value) -> JsonMap {
        let parameters = map(json!({"rules": rules}));
        let context = map(context);
        futures_util::FutureExt::now_or_never(ValidationOperator.execute(&parameters, &context))
            .expect("validation is synchronous")
            .unwrap()
    }

    #[test]
    fn equals_and_not_equals() {
        let output = run_rules(
            json!([
                {"field": "doc_type", "condition": "equals", "value": "memo"},
                {"field": "doc_type", "condition": "not_equals", "value": "email"},
            ]),
            json!({"doc_type": "memo"}),
        );
        assert_eq!(output["all_passed"], true);
        assert_eq!(output["validation_results"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn contains_uses_string_forms() {
        let output = run_rules(
            json!([{"field": "summary", "condition": "contains", "value": "merger"}]),
            json!({"summary": "Notes on the proposed merger terms"}),
        );
        assert_eq!(output["all_passed"], true);
    }

    #[test]
    fn not_empty_rejects_null_and_blank() {
        let output = run_rules(
            json!([
                {"field": "a", "condition": "not_empty"},
                {"field": "b", "condition": "not_empty"},
            ]),
            json!({"a": "  ", "b": null}),
        );
        assert_eq!(output["all_passed"], false);
        for result in output["validation_results"].as_array().unwrap() {
            assert_eq!(result["passed"], false);
        }
    }

    #[test]
    fn failed_rule_is_data_not_error() {
        let output = run_rules(
            json!([{"field": "doc_type", "condition": "equals", "value": "email"}]),
            json!({"doc_type": "memo"}),
        );
        assert_eq!(output["all_passed"], false);
        assert_eq!(output["status"], "completed");
        assert_eq!(output["validation_results"][0]["actual_value"], "memo");
    }

    #[test]
    fn missing_field_rules_are_skipped() {
        let output = run_rules(
            json!([{"field": "absent", "condition": "not_empty"}]),
            json!({"present": 1}),
        );
        assert!(output["validation_results"].as_array().unwrap().is_empty());
        // Vacuously true: nothing evaluated, nothing failed.
        assert_eq!(output["all_passed"], true);
    }

    #[test]
    fn unknown_condition_fails_the_rule() {
        let output = run_rules(
            json!([{"field": "a", "condition": "matches_regex", "value": ".*"}]),
            json!({"a": "x"}),
        );
        assert_eq!(output["all_passed"], false);
    }
}
