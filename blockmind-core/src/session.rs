//! One connected agent session: transport, listener, loop and memory wired
//! together, with orderly shutdown.
//!
//! ```text
//! transport events --pump--> roster
//!                        \--> ChatListener --triggers--> AgentLoop
//!                        \--> chat recorder --> MemoryStore
//! ```

use crate::agent::{AgentConfig, AgentLoop};
use crate::chat::{ChatEvent, ChatListener, ListenerConfig};
use crate::command::{ActionResult, CommandRegistry};
use crate::error::{Result, TransportResult};
use crate::id::SessionId;
use crate::llm::DecisionMaker;
use crate::memory::MemoryStore;
use crate::transport::{truncate_chat, ChatSink, Credentials, Roster, Transport, TransportEvent};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything a session needs besides its collaborators
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server login
    pub credentials: Credentials,
    /// How triggers are recognised
    pub listener: ListenerConfig,
    /// Loop behaviour
    pub agent: AgentConfig,
    /// Append every chat line to the sender's memory
    pub record_chat: bool,
}

/// A running session
pub struct Session {
    id: SessionId,
    agent: AgentLoop,
    roster: Roster,
    memory: Arc<dyn MemoryStore>,
    cancel: CancellationToken,
    closed: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect and start all session tasks.
    ///
    /// Failing to connect is the only error; everything after that is
    /// handled per trigger.
    pub async fn start(
        transport: &dyn Transport,
        config: SessionConfig,
        registry: Arc<CommandRegistry>,
        decider: Arc<dyn DecisionMaker>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let id = SessionId::new();
        tracing::info!(
            session = %id.short(),
            transport = transport.name(),
            address = %config.credentials.address(),
            username = %config.credentials.username,
            commands = ?registry.names(),
            "connecting"
        );
        let connection = transport.connect(&config.credentials).await?;
        tracing::info!(session = %id.short(), "connected");

        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();
        let roster = Roster::new();
        let chat: Arc<dyn ChatSink> = Arc::new(TruncatingChat(connection.chat));
        let agent = AgentLoop::with_parts(
            config.agent,
            registry,
            decider,
            memory.clone(),
            chat,
            roster.clone(),
            cancel.clone(),
        );

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let recorder = config.record_chat.then(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, tokio::spawn(record_chat(rx, memory.clone())))
        });
        let (record_tx, recorder_task) = match recorder {
            Some((tx, task)) => (Some(tx), Some(task)),
            None => (None, None),
        };

        let pump = Pump {
            listener: ChatListener::new(config.listener),
            roster: roster.clone(),
            triggers: trigger_tx,
            recorder: record_tx,
            cancel: cancel.clone(),
            closed: closed.clone(),
        };
        let mut tasks = vec![tokio::spawn(pump.run(connection.events))];
        let runner = agent.clone();
        tasks.push(tokio::spawn(async move { runner.run(trigger_rx).await }));
        tasks.extend(recorder_task);

        Ok(Self {
            id,
            agent,
            roster,
            memory,
            cancel,
            closed,
            tasks,
        })
    }

    /// Session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The agent loop
    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    /// Online players
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Receive every recorded [`ActionResult`]
    pub fn subscribe(&self) -> broadcast::Receiver<ActionResult> {
        self.agent.subscribe()
    }

    /// Resolves when the server connection ends
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Stop everything and close memory.
    ///
    /// Aborts in-flight decisions and confirmation timers, waits for the
    /// tasks, then closes the store so no write is left half done.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(session = %self.id.short(), "shutting down");
        self.cancel.cancel();
        for joined in join_all(self.tasks).await {
            if let Err(error) = joined {
                tracing::error!(%error, "session task failed");
            }
        }
        self.memory.close().await?;
        tracing::info!(session = %self.id.short(), "session closed");
        Ok(())
    }
}

/// Receive path: roster, listener, recorder. Never waits on the agent.
struct Pump {
    listener: ChatListener,
    roster: Roster,
    triggers: mpsc::UnboundedSender<crate::chat::Trigger>,
    recorder: Option<mpsc::UnboundedSender<ChatEvent>>,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl Pump {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::warn!("transport event stream ended");
                        break;
                    }
                },
            };
            self.roster.apply(&event).await;

            match event {
                TransportEvent::Chat(chat) => {
                    if let Some(recorder) = &self.recorder {
                        // Recorder only stops at shutdown
                        let _ = recorder.send(chat.clone());
                    }
                    if let Some(trigger) = self.listener.on_event(&chat) {
                        if self.triggers.send(trigger).is_err() {
                            break;
                        }
                    }
                }
                TransportEvent::Disconnected(reason) => {
                    tracing::warn!(%reason, "disconnected from server");
                    break;
                }
                TransportEvent::PlayerJoined(_) | TransportEvent::PlayerLeft(_) => {}
            }
        }
        self.closed.cancel();
    }
}

async fn record_chat(mut events: mpsc::UnboundedReceiver<ChatEvent>, memory: Arc<dyn MemoryStore>) {
    while let Some(event) = events.recv().await {
        if let Err(error) = memory.append_chat(&event.sender, &event).await {
            tracing::warn!(player = %event.sender, %error, "failed to record chat");
        }
    }
}

/// Caps every outgoing line at the server chat limit
struct TruncatingChat(Arc<dyn ChatSink>);

#[async_trait]
impl ChatSink for TruncatingChat {
    async fn send_chat(&self, text: &str) -> TransportResult<()> {
        self.0.send_chat(truncate_chat(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{builtin, codes};
    use crate::memory::{EpisodeKind, InMemoryStore};
    use crate::testing::{ChannelTransport, ScriptedDecider};
    use crate::decision::Decision;
    use serde_json::Map;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig {
            credentials: Credentials {
                host: "localhost".to_string(),
                port: 25565,
                username: "AgentBot1".to_string(),
                password: None,
            },
            listener: ListenerConfig::new("AgentBot1").with_alias("agent"),
            agent: AgentConfig::new("AgentBot1"),
            record_chat: true,
        }
    }

    fn registry() -> Arc<CommandRegistry> {
        Arc::new(CommandRegistry::from_catalog(builtin::catalog(&[]), &builtin::names(), &[]).unwrap())
    }

    #[tokio::test]
    async fn test_session_end_to_end() {
        let (transport, handle) = ChannelTransport::new();
        let memory = Arc::new(InMemoryStore::new());
        let decider = Arc::new(ScriptedDecider::new([Decision::new("jump", Map::new(), "why not")]));
        let session = Session::start(&transport, config(), registry(), decider, memory.clone())
            .await
            .unwrap();
        let mut outcomes = session.subscribe();

        handle.event(TransportEvent::PlayerJoined("Steve".into())).await;
        handle.say("Steve", "hello world").await;
        handle.say("Steve", "agent, hop around").await;

        let result = outcomes.recv().await.unwrap();
        assert!(result.success);
        assert_eq!(result.command, "jump");
        assert_eq!(handle.chat.sent().await, vec![builtin::JUMP_EMOTE]);
        assert!(session.roster().contains("Steve").await);

        session.shutdown().await.unwrap();
        let chats = memory
            .episodes("Steve")
            .await
            .into_iter()
            .filter(|e| matches!(e.kind, EpisodeKind::Chat(_)))
            .count();
        assert_eq!(chats, 2);
        assert!(memory.query_recent("Steve", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_decision() {
        let (transport, handle) = ChannelTransport::new();
        let memory = Arc::new(InMemoryStore::new());
        let decider = Arc::new(
            ScriptedDecider::new([Decision::new("jump", Map::new(), "too late")])
                .with_delay(Duration::from_secs(3600)),
        );
        let session = Session::start(&transport, config(), registry(), decider.clone(), memory.clone())
            .await
            .unwrap();
        let mut outcomes = session.subscribe();

        handle.say("Steve", "agent, think it over").await;
        while decider.calls().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        session.shutdown().await.unwrap();

        let result = outcomes.recv().await.unwrap();
        assert!(result.failed_with(codes::CANCELLED));
        assert!(handle.chat.sent().await.is_empty());
        let cancelled = memory
            .episodes("Steve")
            .await
            .into_iter()
            .filter(|e| matches!(&e.kind, EpisodeKind::Action(r) if r.failed_with(codes::CANCELLED)))
            .count();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_second_connect_fails() {
        let (transport, _handle) = ChannelTransport::new();
        let memory = Arc::new(InMemoryStore::new());
        let decider = Arc::new(ScriptedDecider::new([]));
        let first = Session::start(&transport, config(), registry(), decider.clone(), memory.clone())
            .await
            .unwrap();
        let second = Session::start(&transport, config(), registry(), decider, memory).await;
        assert!(second.is_err());
        first.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_closes_session() {
        let (transport, handle) = ChannelTransport::new();
        let session = Session::start(
            &transport,
            config(),
            registry(),
            Arc::new(ScriptedDecider::new([])),
            Arc::new(InMemoryStore::new()),
        )
        .await
        .unwrap();
        handle.event(TransportEvent::Disconnected("kicked".into())).await;
        session.closed().await;
        session.shutdown().await.unwrap();
    }
}
