//! Language model abstraction used by the `ai_analysis` operator.
//!
//! [`LanguageModel`] is the RPITIT trait implementations provide (see
//! `lexflow-infra` for the OpenAI-compatible client). Since RPITIT traits are
//! not object-safe, [`BoxLanguageModel`] wraps any implementation behind a
//! boxed-future [`LanguageModelDyn`] trait for dynamic dispatch, via a
//! blanket impl.

use std::future::Future;
use std::pin::Pin;

use lexflow_types::error::LlmError;

/// A single prompt/response exchange. Operators build these from step
/// parameters and document text pulled out of the workflow context.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system prompt framing the task.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Override for the backend's default model.
    pub model: Option<String>,
    /// Hard cap on response tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: None,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Trait for language model backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition); wrap in
/// [`BoxLanguageModel`] where dynamic dispatch is needed.
pub trait LanguageModel: Send + Sync {
    /// Human-readable backend name (e.g. "openai-compatible").
    fn name(&self) -> &str;

    /// Send a completion request and return the response text.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;
}

/// Object-safe version of [`LanguageModel`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation covers
/// every `LanguageModel`.
pub trait LanguageModelDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

impl<T: LanguageModel> LanguageModelDyn for T {
    fn name(&self) -> &str {
        LanguageModel::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }
}

/// Type-erased language model for runtime backend selection.
pub struct BoxLanguageModel {
    inner: Box<dyn LanguageModelDyn>,
}

impl BoxLanguageModel {
    pub fn new<T: LanguageModel + 'static>(model: T) -> Self {
        Self {
            inner: Box::new(model),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.inner.complete_boxed(request).await
    }
}

impl std::fmt::Debug for BoxLanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLanguageModel")
            .field("name", &self.inner.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    impl LanguageModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(request.prompt.clone())
        }
    }

    #[tokio::test]
    async fn box_model_delegates_to_inner() {
        let model = BoxLanguageModel::new(EchoModel);
        assert_eq!(model.name(), "echo");

        let reply = model
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(reply, "hello");
    }

    #[test]
    fn request_builder() {
        let request = CompletionRequest::new("summarize this")
            .with_system("You are a legal document analyst.")
            .with_max_tokens(256);
        assert_eq!(request.max_tokens, 256);
        assert!(request.system.is_some());
    }
}
