//! YAML configuration, read once at startup.
//!
//! ```yaml
//! agent:
//!   name: AgentBot1
//!   aliases: [agent]
//! minecraft:
//!   host: localhost
//!   port: 25565
//! llm:
//!   provider: openai
//!   model: gpt-4o-mini
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Secrets can come from the environment instead of the file; see
//! [`Config::apply_env`].

use crate::agent::context::MemoryPolicy;
use crate::agent::AgentConfig;
use crate::chat::{ListenerConfig, MAX_CHAT_LEN};
use crate::command::{builtin, CommandRegistry};
use crate::error::{Error, Result};
use crate::llm::{AnthropicProvider, GatewayConfig, LlmProvider, OpenAiProvider};
use crate::transport::Credentials;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Providers [`LlmSettings::provider`] understands
pub const PROVIDERS: &[&str] = &["openai", "anthropic"];

/// Whole-application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and loop behaviour
    pub agent: AgentSettings,
    /// Server login
    pub minecraft: MinecraftSettings,
    /// Model provider
    pub llm: LlmSettings,
    /// Persistent memory
    pub memory: MemorySettings,
    /// Command catalog selection
    pub commands: CommandSettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// `agent:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Name the agent answers to and uses in prompts
    pub name: String,
    /// Other names it answers to
    pub aliases: Vec<String>,
    /// Prefixes such as `!` that address it
    pub prefixes: Vec<String>,
    /// Answer to its name anywhere in a message
    pub mention_anywhere: bool,
    /// Handle `say` and `jump` without the model
    pub direct_commands: bool,
    /// Report successes in chat
    pub acknowledge: bool,
    /// Report failures in chat
    pub notify_failures: bool,
    /// Confirmation window for risky commands
    pub confirmation_timeout_secs: u64,
    /// Decisions in flight at once
    pub max_concurrent_decisions: usize,
    /// Incoming messages are cut to this many characters
    pub max_message_len: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "AgentBot1".to_string(),
            aliases: vec!["agent".to_string()],
            prefixes: Vec::new(),
            mention_anywhere: false,
            direct_commands: true,
            acknowledge: true,
            notify_failures: false,
            confirmation_timeout_secs: 30,
            max_concurrent_decisions: 4,
            max_message_len: MAX_CHAT_LEN,
        }
    }
}

/// `minecraft:` section
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinecraftSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login name; defaults to `agent.name`
    pub username: Option<String>,
    /// Login password, usually from `MINECRAFT_PASSWORD`
    pub password: Option<String>,
}

impl Default for MinecraftSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25565,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for MinecraftSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinecraftSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `llm:` section
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// One of [`PROVIDERS`]
    pub provider: String,
    /// Model name
    pub model: String,
    /// API key, usually from the environment
    pub api_key: Option<String>,
    /// OpenAI-compatible or proxy endpoint
    pub base_url: Option<String>,
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// Attempts per decision
    pub max_attempts: u32,
    /// Per-command execution timeout
    pub command_timeout_secs: u64,
    /// Output token cap
    pub max_tokens: usize,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            provider: "openai".to_string(),
            model: gateway.model,
            api_key: None,
            base_url: None,
            timeout_secs: gateway.timeout.as_secs(),
            max_attempts: gateway.max_attempts,
            command_timeout_secs: CommandRegistry::DEFAULT_TIMEOUT.as_secs(),
            max_tokens: gateway.max_tokens,
            temperature: gateway.temperature,
        }
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl LlmSettings {
    /// Build the configured provider.
    ///
    /// An OpenAI-compatible endpoint may run without a key; the public APIs
    /// may not.
    pub fn provider(&self) -> Result<Arc<dyn LlmProvider>> {
        match self.provider.as_str() {
            "openai" => {
                let provider = match (&self.api_key, &self.base_url) {
                    (Some(key), _) => OpenAiProvider::new(key),
                    (None, Some(_)) => OpenAiProvider::without_key(),
                    (None, None) => {
                        return Err(Error::Config(
                            "llm.api_key (or OPENAI_API_KEY) is required for openai".to_string(),
                        ))
                    }
                };
                Ok(Arc::new(match &self.base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                }))
            }
            "anthropic" => {
                let key = self.api_key.as_ref().ok_or_else(|| {
                    Error::Config(
                        "llm.api_key (or ANTHROPIC_API_KEY) is required for anthropic".to_string(),
                    )
                })?;
                let provider = AnthropicProvider::new(key);
                Ok(Arc::new(match &self.base_url {
                    Some(url) => provider.with_base_url(url),
                    None => provider,
                }))
            }
            other => Err(unknown_provider(other)),
        }
    }
}

/// `memory:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Directory of the JSON file store
    pub path: PathBuf,
    /// Entries per namespace in each prompt
    pub recent_limit: usize,
    /// Namespace shared by all players
    pub global_namespace: Option<String>,
    /// Keep every chat line in the sender's history
    pub record_chat: bool,
}

impl Default for MemorySettings {
    fn default() -> Self {
        let policy = MemoryPolicy::default();
        Self {
            path: PathBuf::from("memory"),
            recent_limit: policy.recent_limit,
            global_namespace: policy.global_namespace,
            record_chat: true,
        }
    }
}

/// `commands:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Commands the model may use
    pub enabled: Vec<String>,
    /// Force confirmation on otherwise safe commands
    pub require_confirmation: Vec<String>,
    /// Items `give_item` may hand out
    pub allowed_items: Vec<String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            enabled: builtin::names(),
            require_confirmation: Vec::new(),
            allowed_items: builtin::DEFAULT_ALLOWED_ITEMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// `logging:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing-subscriber` filter directive
    pub filter: String,
    /// Append-mode log file; none logs to stdout only
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: Some(PathBuf::from("agent.log")),
        }
    }
}

impl Config {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Override secrets and the log filter from the process environment
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Override secrets and the log filter from `lookup`.
    ///
    /// `OPENAI_API_KEY` or `ANTHROPIC_API_KEY` (matching the provider),
    /// `MINECRAFT_PASSWORD` and `BLOCKMIND_LOG` win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let key_var = match self.llm.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = lookup(key_var) {
            self.llm.api_key = Some(key);
        }
        if let Some(password) = lookup("MINECRAFT_PASSWORD") {
            self.minecraft.password = Some(password);
        }
        if let Some(filter) = lookup("BLOCKMIND_LOG") {
            self.logging.filter = filter;
        }
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.name.trim().is_empty() {
            return Err(Error::Config("agent.name must not be empty".to_string()));
        }
        if self.minecraft.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(Error::Config("minecraft.username must not be empty".to_string()));
        }
        if self.minecraft.host.trim().is_empty() {
            return Err(Error::Config("minecraft.host must not be empty".to_string()));
        }
        for (field, value) in [
            ("agent.confirmation_timeout_secs", self.agent.confirmation_timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("llm.command_timeout_secs", self.llm.command_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be positive")));
            }
        }
        if self.llm.max_attempts == 0 {
            return Err(Error::Config("llm.max_attempts must be positive".to_string()));
        }
        if self.agent.max_message_len == 0 {
            return Err(Error::Config("agent.max_message_len must be positive".to_string()));
        }
        if !PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(unknown_provider(&self.llm.provider));
        }
        Ok(())
    }

    /// In-game login name; defaults to the agent name
    pub fn username(&self) -> &str {
        self.minecraft.username.as_deref().unwrap_or(&self.agent.name)
    }

    /// Server login
    pub fn credentials(&self) -> Credentials {
        Credentials {
            host: self.minecraft.host.clone(),
            port: self.minecraft.port,
            username: self.username().to_string(),
            password: self.minecraft.password.clone(),
        }
    }

    /// How the listener recognises the agent.
    ///
    /// The login name is always an alias when it differs from the agent name.
    pub fn listener(&self) -> ListenerConfig {
        let mut listener = ListenerConfig::new(self.username());
        listener.aliases = std::iter::once(self.agent.name.clone())
            .chain(self.agent.aliases.iter().cloned())
            .filter(|a| a != self.username())
            .collect();
        listener.prefixes = self.agent.prefixes.clone();
        listener.mention_anywhere = self.agent.mention_anywhere;
        listener.max_message_len = self.agent.max_message_len;
        listener
    }

    /// Loop behaviour
    pub fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new(self.agent.name.clone())
            .with_confirmation_timeout(Duration::from_secs(self.agent.confirmation_timeout_secs))
            .with_max_concurrent_decisions(self.agent.max_concurrent_decisions)
            .with_memory_policy(MemoryPolicy {
                recent_limit: self.memory.recent_limit,
                global_namespace: self.memory.global_namespace.clone(),
            });
        config.direct_commands = self.agent.direct_commands;
        config.acknowledge = self.agent.acknowledge;
        config.notify_failures = self.agent.notify_failures;
        config
    }

    /// Prompting and retry policy
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            timeout: Duration::from_secs(self.llm.timeout_secs),
            max_attempts: self.llm.max_attempts,
        }
    }

    /// Build the command registry; unknown command names are fatal
    pub fn registry(&self) -> Result<CommandRegistry> {
        let registry = CommandRegistry::from_catalog(
            builtin::catalog(&self.commands.allowed_items),
            &self.commands.enabled,
            &self.commands.require_confirmation,
        )?;
        Ok(registry.with_timeout(Duration::from_secs(self.llm.command_timeout_secs)))
    }
}

fn unknown_provider(name: &str) -> Error {
    Error::Config(format!(
        "unknown llm.provider '{name}', expected one of {}",
        PROVIDERS.join(", ")
    ))
}
