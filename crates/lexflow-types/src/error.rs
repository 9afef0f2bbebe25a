//! Error types shared across layers.

use thiserror::Error;

/// Errors from workflow storage backends.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("workflow definition not found")]
    DefinitionNotFound,

    #[error("workflow definition is inactive")]
    DefinitionInactive,
}

/// Errors from language model backends.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Errors raised by step operators.
///
/// Validation rule failures are NOT operator errors; they are recorded in the
/// step output with `all_passed = false` and the run continues.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_error_wraps_llm_error() {
        let err: OperatorError = LlmError::EmptyResponse.into();
        assert!(err.to_string().contains("empty response"));
    }

    #[test]
    fn repository_error_messages() {
        assert_eq!(
            RepositoryError::DefinitionInactive.to_string(),
            "workflow definition is inactive"
        );
        assert!(
            RepositoryError::Query("no such table".to_string())
                .to_string()
                .contains("no such table")
        );
    }
}
