//! # blockmind-core
//!
//! The decision loop of a chat-driven Minecraft agent: untrusted chat in,
//! validated and bounded in-game actions out, with an LLM choosing the action
//! and persistent memory shaping each choice.
//!
//! ## Core Concepts
//!
//! - **Trigger**: a chat line addressed to the agent ([`chat::ChatListener`])
//! - **Decision**: the model's proposed action ([`decision::Decision`])
//! - **Command**: a registered action with an argument schema and a risk class
//!   ([`command::CommandRegistry`])
//! - **Memory**: key/value records plus an episodic log per player
//!   ([`memory::MemoryStore`])
//! - **Agent loop**: validates decisions, parks risky ones until the player
//!   confirms, and records every outcome ([`agent::AgentLoop`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use blockmind_core::prelude::*;
//!
//! let config = Config::from_file("config.yaml").await?;
//! let registry = Arc::new(config.registry()?);
//! let decider = Arc::new(LlmGateway::new(config.llm.provider()?, config.gateway_config()));
//! let memory = Arc::new(JsonFileStore::open(&config.memory.path).await?);
//! let session = Session::start(&transport, session_config, registry, decider, memory).await?;
//! session.closed().await;
//! session.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod agent;
pub mod chat;
pub mod command;
pub mod config;
pub mod decision;
pub mod error;
pub mod id;
pub mod llm;
pub mod memory;
pub mod session;
pub mod testing;
pub mod transport;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentLoop, AgentState};
    pub use crate::chat::{ChatEvent, ChatListener, ListenerConfig, Trigger};
    pub use crate::command::{
        ActionResult, ArgSpec, ArgType, CommandContext, CommandHandler, CommandRegistry,
        CommandSpec, RiskClass,
    };
    pub use crate::config::Config;
    pub use crate::decision::Decision;
    pub use crate::error::*;
    pub use crate::id::*;
    pub use crate::llm::{DecisionMaker, GatewayConfig, LlmGateway, LlmProvider};
    pub use crate::memory::{InMemoryStore, JsonFileStore, MemoryStore};
    pub use crate::session::{Session, SessionConfig};
    pub use crate::transport::{ChatSink, Connection, Credentials, Transport, TransportEvent};
}
