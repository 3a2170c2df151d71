//! OpenAI-compatible chat-completions provider.
//!
//! Works with OpenAI itself and with servers that mimic its API (vLLM,
//! Ollama, LM Studio) through [`OpenAiProvider::with_base_url`].

use super::{CompletionRequest, CompletionResponse, LlmProvider, Role, StopReason, TokenUsage};
use crate::error::{LlmError, LlmResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider for the public OpenAI API
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.into()),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create from environment variable OPENAI_API_KEY
    pub fn from_env() -> LlmResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Configuration("OPENAI_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Local servers usually need no key
    pub fn without_key() -> Self {
        Self {
            api_key: None,
            ..Self::new("")
        }
    }

    /// Point at a different OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_api_request(request: &CompletionRequest) -> ApiRequest {
        let system = request.system.iter().map(|s| ApiMessage {
            role: "system".to_string(),
            content: s.clone(),
        });
        let turns = request.messages.iter().map(|turn| ApiMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: turn.content.clone(),
        });

        ApiRequest {
            model: request.model.clone(),
            messages: system.chain(turns).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn parse_response(api_response: ApiResponse) -> LlmResult<CompletionResponse> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            text: choice.message.content.unwrap_or_default(),
            stop_reason: StopReason::from_api(choice.finish_reason.as_deref()),
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&Self::to_api_request(&request));

        if let Some(api_key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(match status {
                401 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited,
                _ => LlmError::Api { status, message },
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Self::parse_response(api_response)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn is_ready(&self) -> bool {
        self.api_key.as_deref().map_or(true, |k| !k.is_empty())
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Turn;

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let request = CompletionRequest::new("gpt-4o-mini")
            .with_system("You are a helpful Minecraft agent.")
            .with_messages(vec![Turn::user("hi")]);
        let json = serde_json::to_value(OpenAiProvider::to_api_request(&request)).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "{\"action\":\"noop\"}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let parsed = OpenAiProvider::parse_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(parsed.text, r#"{"action":"noop"}"#);
        assert_eq!(parsed.usage.total(), 16);
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let raw = r#"{"choices": []}"#;
        let err = OpenAiProvider::parse_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn test_readiness() {
        assert!(OpenAiProvider::without_key().is_ready());
        assert!(!OpenAiProvider::new("").is_ready());
        assert_eq!(OpenAiProvider::new("k").name(), "openai");
    }
}
