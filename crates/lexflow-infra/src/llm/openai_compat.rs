//! OpenAI-compatible language model client.
//!
//! One [`OpenAiCompatibleModel`] covers OpenAI, Azure OpenAI, Ollama, and any
//! other backend speaking the `/chat/completions` dialect, selected purely by
//! base URL. Analysis operators only need a single prompt/response exchange,
//! so the client speaks plain JSON over [`reqwest`] with no streaming.

use lexflow_core::llm::{CompletionRequest, LanguageModel};
use lexflow_types::config::LlmConfig;
use lexflow_types::error::LlmError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
///
/// Does NOT derive Debug; the API key lives inside and must never reach logs.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    default_model: String,
}

impl OpenAiCompatibleModel {
    /// Create a client from engine configuration plus an optional API key.
    /// Local backends such as Ollama accept requests without one.
    pub fn new(config: &LlmConfig, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: config.model.clone(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key.expose_secret());
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
