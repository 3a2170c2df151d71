//! Deterministic doubles for tests.
//!
//! - [`ScriptedDecider`] and [`ScriptedProvider`] replay canned decisions or
//!   model replies without API calls
//! - [`RecordingChat`] captures outgoing chat
//! - [`UnavailableStore`] fails every memory call
//! - [`ChannelTransport`] is a transport driven from the test body

use crate::chat::ChatEvent;
use crate::command::{ActionResult, CommandSummary};
use crate::decision::{rationale, Decision, NOOP_ACTION};
use crate::error::{LlmError, LlmResult, StorageError, StorageResult, TransportError, TransportResult};
use crate::id::EpisodeId;
use crate::llm::{CompletionRequest, CompletionResponse, DecisionContext, DecisionMaker, LlmProvider};
use crate::memory::{MemoryEntry, MemoryRecord, MemoryStore, Origin};
use crate::transport::{ChatSink, Connection, Credentials, Transport, TransportEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// A decision maker that returns scripted decisions in order.
///
/// Once the script runs out every call yields a model `noop`.
#[derive(Debug, Default)]
pub struct ScriptedDecider {
    script: Mutex<VecDeque<Decision>>,
    contexts: Mutex<Vec<DecisionContext>>,
    delay: Option<Duration>,
}

impl ScriptedDecider {
    /// Create a decider with scripted decisions
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            script: Mutex::new(decisions.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue another decision
    pub async fn push(&self, decision: Decision) {
        self.script.lock().await.push_back(decision);
    }

    /// Number of decide calls so far
    pub async fn calls(&self) -> usize {
        self.contexts.lock().await.len()
    }

    /// Every context passed to decide, in call order
    pub async fn contexts(&self) -> Vec<DecisionContext> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecider {
    async fn decide(
        &self,
        context: &DecisionContext,
        _commands: &[CommandSummary],
        cancel: &CancellationToken,
    ) -> Decision {
        self.contexts.lock().await.push(context.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Decision::noop(rationale::CANCELLED),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Decision::new(NOOP_ACTION, Default::default(), "script exhausted"))
    }
}

/// One scripted provider outcome
#[derive(Debug)]
pub enum ScriptedReply {
    /// Reply with this text
    Text(String),
    /// Fail with this error
    Error(LlmError),
    /// Never answer
    Hang,
}

impl ScriptedReply {
    /// A text reply
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

/// An LLM provider that replays scripted replies
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Create a provider with scripted replies
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of completion calls so far
    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request received, in call order
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.requests.lock().await.push(request);
        let next = self.script.lock().await.pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(CompletionResponse::text(text)),
            Some(ScriptedReply::Error(error)) => Err(error),
            Some(ScriptedReply::Hang) => {
                std::future::pending::<()>().await;
                Err(LlmError::Network("unreachable".to_string()))
            }
            None => Err(LlmError::Configuration("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Captures every line sent to chat
#[derive(Debug, Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingChat {
    /// A sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose sends always fail
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Lines sent so far
    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatSink for RecordingChat {
    async fn send_chat(&self, text: &str) -> TransportResult<()> {
        if self.failing {
            return Err(TransportError::Send {
                reason: "connection closed".to_string(),
            });
        }
        self.sent.lock().await.push(text.to_string());
        Ok(())
    }
}

/// A memory store whose backend is always down
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn error() -> StorageError {
        StorageError::Unavailable {
            reason: "backend offline".to_string(),
        }
    }
}

#[async_trait]
impl MemoryStore for UnavailableStore {
    async fn get(&self, _namespace: &str, _key: &str) -> StorageResult<MemoryRecord> {
        Err(Self::error())
    }

    async fn put(
        &self,
        _namespace: &str,
        _key: &str,
        _value: Value,
        _origin: Origin,
    ) -> StorageResult<MemoryRecord> {
        Err(Self::error())
    }

    async fn append_episode(
        &self,
        _namespace: &str,
        _result: &ActionResult,
    ) -> StorageResult<EpisodeId> {
        Err(Self::error())
    }

    async fn append_chat(&self, _namespace: &str, _event: &ChatEvent) -> StorageResult<EpisodeId> {
        Err(Self::error())
    }

    async fn query_recent(&self, _namespace: &str, _limit: usize) -> StorageResult<Vec<MemoryEntry>> {
        Err(Self::error())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Test-side handle of a [`ChannelTransport`]
#[derive(Debug, Clone)]
pub struct TransportHandle {
    events: mpsc::Sender<TransportEvent>,
    /// Everything the agent sent
    pub chat: Arc<RecordingChat>,
}

impl TransportHandle {
    /// Deliver a chat line from `sender`
    pub async fn say(&self, sender: &str, text: &str) {
        self.event(TransportEvent::Chat(ChatEvent::new(sender, text))).await;
    }

    /// Deliver any event
    pub async fn event(&self, event: TransportEvent) {
        // The session may already be gone
        let _ = self.events.send(event).await;
    }
}

/// A transport fed by a [`TransportHandle`]; connects once
#[derive(Debug)]
pub struct ChannelTransport {
    connection: Mutex<Option<Connection>>,
}

impl ChannelTransport {
    /// A transport and the handle that drives it
    pub fn new() -> (Self, TransportHandle) {
        let (tx, rx) = mpsc::channel(64);
        let chat = Arc::new(RecordingChat::new());
        let connection = Connection {
            chat: chat.clone(),
            events: rx,
        };
        (
            Self {
                connection: Mutex::new(Some(connection)),
            },
            TransportHandle { events: tx, chat },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Connection> {
        self.connection
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::Connect {
                address: credentials.address(),
                reason: "already connected".to_string(),
            })
    }

    fn name(&self) -> &str {
        "channel"
    }
}
