//! Prompting, parsing and retry policy on top of an [`LlmProvider`].

use super::{CompletionRequest, DecisionContext, DecisionMaker, LlmProvider, Turn};
use crate::command::{CommandSummary, RiskClass};
use crate::decision::{rationale, Decision, NOOP_ACTION};
use crate::error::DecisionError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Knobs for [`LlmGateway`]
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Model name passed to the provider
    pub model: String,
    /// Output token cap
    pub max_tokens: usize,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Attempts per decision, shared by timeouts and unparseable replies
    pub max_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: Some(0.2),
            timeout: Duration::from_secs(20),
            max_attempts: 2,
        }
    }
}

/// [`DecisionMaker`] backed by an LLM
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    config: GatewayConfig,
}

impl LlmGateway {
    /// Create a gateway over `provider`
    pub fn new(provider: Arc<dyn LlmProvider>, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    fn request(&self, system: &str, messages: &[Turn]) -> CompletionRequest {
        let request = CompletionRequest::new(&self.config.model)
            .with_system(system)
            .with_messages(messages.to_vec())
            .with_max_tokens(self.config.max_tokens);
        match self.config.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }
}

#[async_trait]
impl DecisionMaker for LlmGateway {
    async fn decide(
        &self,
        context: &DecisionContext,
        commands: &[CommandSummary],
        cancel: &CancellationToken,
    ) -> Decision {
        let offered: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        let system = system_prompt(&context.agent_name, commands);
        let mut messages = vec![Turn::user(context.render())];
        let mut failure = rationale::UNPARSEABLE;

        for attempt in 1..=self.config.max_attempts.max(1) {
            let request = self.request(&system, &messages);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Decision::noop(rationale::CANCELLED),
                outcome = tokio::time::timeout(self.config.timeout, self.provider.complete(request)) => outcome,
            };

            let response = match outcome {
                Err(_) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        player = %context.player,
                        attempt,
                        timeout = ?self.config.timeout,
                        "LLM call timed out"
                    );
                    failure = rationale::TIMEOUT;
                    continue;
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        player = %context.player,
                        %error,
                        "LLM provider error"
                    );
                    return Decision::noop(rationale::PROVIDER_ERROR);
                }
                Ok(Ok(response)) => response,
            };

            match Decision::parse(&response.text, &offered) {
                Ok(decision) => {
                    tracing::debug!(
                        player = %context.player,
                        action = %decision.action,
                        attempt,
                        tokens = response.usage.total(),
                        "decision parsed"
                    );
                    return decision;
                }
                Err(error) => {
                    tracing::warn!(player = %context.player, attempt, %error, "unusable LLM reply");
                    failure = rationale::UNPARSEABLE;
                    messages.push(Turn::assistant(response.text));
                    messages.push(Turn::user(corrective_prompt(&error, &offered)));
                }
            }
        }

        Decision::noop(failure)
    }
}

/// System prompt listing the commands and the reply format
pub fn system_prompt(agent_name: &str, commands: &[CommandSummary]) -> String {
    let mut prompt = format!(
        "You are {agent_name}, a helpful Minecraft agent playing on a multiplayer server. \
         Players talk to you in chat. For each message, choose exactly one action.\n\n\
         Reply with a single JSON object and nothing else:\n\
         {{\"action\": \"<command name>\", \"arguments\": {{...}}, \"rationale\": \"<short reason>\"}}\n\n\
         Use \"{NOOP_ACTION}\" with empty arguments when no action fits. \
         Commands marked needs_confirmation will ask the player to confirm first.\n\n\
         Available commands:\n"
    );
    for command in commands {
        prompt.push_str(&format!(
            "- {} ({}): {}\n  arguments schema: {}\n",
            command.name,
            match command.risk {
                RiskClass::Safe => "safe",
                RiskClass::NeedsConfirmation => "needs_confirmation",
            },
            command.description,
            command.parameters
        ));
    }
    prompt.push_str(&format!("- {NOOP_ACTION}: do nothing\n"));
    prompt
}

fn corrective_prompt(error: &DecisionError, offered: &[&str]) -> String {
    let mut names = offered.to_vec();
    names.push(NOOP_ACTION);
    format!(
        "Your previous reply could not be used: {error}. \
         Reply again with only one JSON object whose \"action\" is one of: {}.",
        names.join(", ")
    )
}
