//! LLM providers and the gateway that turns their replies into decisions.
//!
//! [`LlmProvider`] is a thin request/response wrapper over one vendor API.
//! [`DecisionMaker`] is what the agent loop talks to; [`LlmGateway`] implements
//! it on top of any provider.

pub mod anthropic;
pub mod gateway;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gateway::{GatewayConfig, LlmGateway};
pub use openai::OpenAiProvider;

use crate::command::CommandSummary;
use crate::decision::Decision;
use crate::error::LlmResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Core trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Check if provider is configured and ready
    fn is_ready(&self) -> bool {
        true
    }
}

/// Produces a decision for one trigger
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    /// Decide what to do. Never fails: problems become a synthetic no-op.
    async fn decide(
        &self,
        context: &DecisionContext,
        commands: &[CommandSummary],
        cancel: &CancellationToken,
    ) -> Decision;
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The agent's side (what we send)
    User,
    /// The model's side
    Assistant,
}

/// One message in a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Turn {
    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request for LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// System prompt
    pub system: Option<String>,
    /// Messages in the conversation
    pub messages: Vec<Turn>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature (0.0 - 1.0)
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: Vec::new(),
            max_tokens: 512,
            temperature: None,
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set messages
    pub fn with_messages(mut self, messages: Vec<Turn>) -> Self {
        self.messages = messages;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp.clamp(0.0, 1.0));
        self
    }
}

/// Response from LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Unique response ID
    pub id: String,
    /// Model used
    pub model: String,
    /// Concatenated text output
    pub text: String,
    /// Stop reason
    pub stop_reason: StopReason,
    /// Token usage
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// A response carrying only text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            text: text.into(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }
}

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached end of response
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Hit a stop sequence
    StopSequence,
    /// Provider reported something else
    Other,
}

impl StopReason {
    fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("end_turn") | Some("stop") => StopReason::EndTurn,
            Some("max_tokens") | Some("length") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::Other,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens
    pub input_tokens: usize,
    /// Output tokens
    pub output_tokens: usize,
}

impl TokenUsage {
    /// Get total tokens used
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Everything the model sees about one trigger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionContext {
    /// The agent's in-game name
    pub agent_name: String,
    /// Player who addressed the agent
    pub player: String,
    /// What they said, address stripped
    pub message: String,
    /// Rendered memories, most recent first
    pub memories: Vec<String>,
    /// Players currently online
    pub online_players: Vec<String>,
}

impl DecisionContext {
    /// The user turn sent to the model
    pub fn render(&self) -> String {
        let mut prompt = String::new();
        if !self.online_players.is_empty() {
            prompt.push_str(&format!(
                "Online players: {}\n",
                self.online_players.join(", ")
            ));
        }
        if !self.memories.is_empty() {
            prompt.push_str("What you remember (newest first):\n");
            for memory in &self.memories {
                prompt.push_str(&format!("- {memory}\n"));
            }
        }
        prompt.push_str(&format!("{} says: {}", self.player, self.message));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request() {
        let req = CompletionRequest::new("gpt-4o-mini")
            .with_system("You are a helpful Minecraft agent.")
            .with_messages(vec![Turn::user("Hello")])
            .with_max_tokens(1000)
            .with_temperature(1.7);

        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 1000);
        assert_eq!(req.temperature, Some(1.0));
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_api(Some("stop")), StopReason::EndTurn);
        assert_eq!(StopReason::from_api(Some("length")), StopReason::MaxTokens);
        assert_eq!(StopReason::from_api(None), StopReason::Other);
    }

    #[test]
    fn test_context_render() {
        let context = DecisionContext {
            agent_name: "AgentBot1".to_string(),
            player: "Steve".to_string(),
            message: "give me a diamond sword".to_string(),
            memories: vec!["Steve's favourite_block is obsidian".to_string()],
            online_players: vec!["Alex".to_string(), "Steve".to_string()],
        };
        let rendered = context.render();
        assert!(rendered.starts_with("Online players: Alex, Steve\n"));
        assert!(rendered.contains("- Steve's favourite_block is obsidian\n"));
        assert!(rendered.ends_with("Steve says: give me a diamond sword"));
    }
}
