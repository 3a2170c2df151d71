//! blockmind: an LLM-driven Minecraft chat agent.
//!
//! Reads `config.yaml`, connects, and answers players who address the agent
//! until the connection ends or Ctrl-C.
//!
//! ```bash
//! cargo run -p blockmind -- --config config.yaml
//! ```
//!
//! The bundled console transport reads chat from stdin, so the agent can be
//! tried without a server:
//!
//! ```text
//! <Steve> agent, give me a diamond sword
//! ```

mod console;
mod logging;

use anyhow::Context;
use blockmind_core::config::Config;
use blockmind_core::llm::LlmGateway;
use blockmind_core::memory::JsonFileStore;
use blockmind_core::session::{Session, SessionConfig};
use clap::Parser;
use console::ConsoleTransport;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "blockmind", version, about = "LLM-driven Minecraft chat agent")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "BLOCKMIND_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Append logs to this file instead of the configured one
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Player name for console lines without a `<Name>` prefix
    #[arg(long, default_value = "Player")]
    player: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        Config::from_file(&args.config).await?
    } else {
        Config::default()
    };
    config.apply_process_env();
    if let Some(path) = args.log_file {
        config.logging.file = Some(path);
    }
    config.validate()?;

    logging::init(&config.logging)?;
    if config_found {
        tracing::info!(path = %args.config.display(), "loaded configuration");
    } else {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
    }
    if args.check {
        tracing::info!(?config, "configuration is valid");
        return Ok(());
    }

    let registry = Arc::new(config.registry()?);
    let provider = config.llm.provider()?;
    tracing::info!(provider = provider.name(), model = %config.llm.model, "model provider ready");
    let decider = Arc::new(LlmGateway::new(provider, config.gateway_config()));
    let memory = Arc::new(
        JsonFileStore::open(&config.memory.path)
            .await
            .with_context(|| format!("cannot open memory at {}", config.memory.path.display()))?,
    );

    let session_config = SessionConfig {
        credentials: config.credentials(),
        listener: config.listener(),
        agent: config.agent_config(),
        record_chat: config.memory.record_chat,
    };
    let transport = ConsoleTransport::new(args.player);
    let session = Session::start(&transport, session_config, registry, decider, memory).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = session.closed() => tracing::info!("connection closed"),
    }
    session.shutdown().await?;
    Ok(())
}
