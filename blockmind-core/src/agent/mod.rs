//! The agent loop: triggers in, validated and dispatched actions out.
//!
//! For each trigger the loop walks one player through
//!
//! ```text
//! Idle -> AwaitingDecision -> Validating -> Executing            -> Idle
//!                                       \-> AwaitingConfirmation -> Idle
//! ```
//!
//! Every trigger ends in at most one [`ActionResult`] of its own, appended to
//! the player's memory and broadcast to subscribers. Nothing that goes wrong
//! while handling one trigger reaches another.

pub mod confirm;
pub mod context;

use crate::chat::Trigger;
use crate::command::{
    codes, ActionResult, Arguments, CommandContext, CommandRegistry, CommandSpec,
};
use crate::decision::{rationale, Decision, NOOP_ACTION};
use crate::error::Error;
use crate::id::TriggerId;
use crate::llm::DecisionMaker;
use crate::memory::MemoryStore;
use crate::transport::{truncate_chat, ChatSink, Roster};
use confirm::{ConfirmFailure, PendingAction, PendingConfirmations, Reply};
use context::MemoryPolicy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Chat line sent when a command fails and failure notices are on
pub const FAILURE_NOTICE: &str = "[Agent Error] Could not process your request.";

/// Commands whose whole effect is already a chat line
const SPEAKING_COMMANDS: &[&str] = &["say", "jump"];

/// Where a player is in the decision pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Waiting on the decision maker
    AwaitingDecision,
    /// Checking the decision against the registry
    Validating,
    /// Running a command
    Executing,
    /// Parking a risky command until the player confirms
    AwaitingConfirmation,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::AwaitingDecision => "awaiting_decision",
            AgentState::Validating => "validating",
            AgentState::Executing => "executing",
            AgentState::AwaitingConfirmation => "awaiting_confirmation",
        };
        f.write_str(name)
    }
}

/// Behaviour switches for the loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// The agent's in-game name
    pub agent_name: String,
    /// Handle `say <text>` and `jump` without the model
    pub direct_commands: bool,
    /// Tell the player in chat when a command succeeded
    pub acknowledge: bool,
    /// Tell the player in chat when a command failed
    pub notify_failures: bool,
    /// How long a risky command waits for confirmation
    pub confirmation_timeout: Duration,
    /// Decisions in flight at once across all players
    pub max_concurrent_decisions: usize,
    /// Memory selection for prompts
    pub memory: MemoryPolicy,
}

impl AgentConfig {
    /// Defaults for an agent with this name
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            direct_commands: true,
            acknowledge: true,
            notify_failures: false,
            confirmation_timeout: Duration::from_secs(30),
            max_concurrent_decisions: 4,
            memory: MemoryPolicy::default(),
        }
    }

    /// Set the confirmation window
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Set the decision concurrency cap
    pub fn with_max_concurrent_decisions(mut self, max: usize) -> Self {
        self.max_concurrent_decisions = max;
        self
    }

    /// Set the memory policy
    pub fn with_memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.memory = policy;
        self
    }
}

/// The orchestrating state machine. Cheap to clone.
#[derive(Clone)]
pub struct AgentLoop {
    inner: Arc<Inner>,
}

struct Inner {
    config: AgentConfig,
    registry: Arc<CommandRegistry>,
    decider: Arc<dyn DecisionMaker>,
    memory: Arc<dyn MemoryStore>,
    chat: Arc<dyn ChatSink>,
    roster: Roster,
    pending: PendingConfirmations,
    states: RwLock<HashMap<String, AgentState>>,
    permits: Semaphore,
    outcomes: broadcast::Sender<ActionResult>,
    cancel: CancellationToken,
}

impl fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLoop")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    /// Wire up a loop
    pub fn new(
        config: AgentConfig,
        registry: Arc<CommandRegistry>,
        decider: Arc<dyn DecisionMaker>,
        memory: Arc<dyn MemoryStore>,
        chat: Arc<dyn ChatSink>,
    ) -> Self {
        Self::with_parts(config, registry, decider, memory, chat, Roster::new(), CancellationToken::new())
    }

    /// Wire up a loop sharing a roster and cancellation token with its session
    pub fn with_parts(
        config: AgentConfig,
        registry: Arc<CommandRegistry>,
        decider: Arc<dyn DecisionMaker>,
        memory: Arc<dyn MemoryStore>,
        chat: Arc<dyn ChatSink>,
        roster: Roster,
        cancel: CancellationToken,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(256);
        let permits = Semaphore::new(config.max_concurrent_decisions.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                decider,
                memory,
                chat,
                roster,
                pending: PendingConfirmations::new(),
                states: RwLock::new(HashMap::new()),
                permits,
                outcomes,
                cancel,
            }),
        }
    }

    /// Receive every [`ActionResult`] the loop records from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ActionResult> {
        self.inner.outcomes.subscribe()
    }

    /// The session cancellation token
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Current state of a player's pipeline
    pub async fn state(&self, player: &str) -> AgentState {
        self.inner
            .states
            .read()
            .await
            .get(player)
            .copied()
            .unwrap_or_default()
    }

    /// Token of the player's pending confirmation, if any
    pub async fn pending_token(&self, player: &str) -> Option<String> {
        self.inner.pending.token_for(player).await
    }

    /// Consume triggers until the channel closes or the session is cancelled.
    ///
    /// Each player gets a worker task, so one player's triggers are handled in
    /// arrival order while different players interleave. Confirm and cancel
    /// replies skip the queue: a reply that arrives inside the window is
    /// honoured even while the player's previous request is still deciding.
    /// Workers with nothing to do for [`WORKER_IDLE`] are reaped.
    pub async fn run(&self, mut triggers: mpsc::UnboundedReceiver<Trigger>) {
        let mut workers: HashMap<String, Worker> = HashMap::new();
        let mut tasks = JoinSet::new();
        let start = tokio::time::Instant::now() + WORKER_IDLE;
        let mut reap = tokio::time::interval_at(start, WORKER_IDLE);

        loop {
            let trigger = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                next = triggers.recv() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(error) = joined {
                        tracing::error!(%error, "player task failed");
                    }
                    continue;
                }
                _ = reap.tick() => {
                    reap_idle(&mut workers);
                    continue;
                }
            };

            if confirm::parse_reply(&trigger.body).is_some() {
                let agent = self.clone();
                tasks.spawn(async move {
                    agent.handle_trigger(trigger).await;
                });
                continue;
            }

            let player = trigger.player().to_string();
            let worker = workers
                .entry(player.clone())
                .or_insert_with(|| self.spawn_worker(&mut tasks, player));
            worker.send(trigger);
        }

        drop(workers);
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "player task failed");
            }
        }
        self.discard_pending().await;
        tracing::info!("agent loop stopped");
    }

    fn spawn_worker(&self, tasks: &mut JoinSet<()>, player: String) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Trigger>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let agent = self.clone();
        let counter = in_flight.clone();
        tasks.spawn(async move {
            tracing::debug!(%player, "player worker started");
            loop {
                let trigger = tokio::select! {
                    biased;
                    _ = agent.inner.cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(trigger) => trigger,
                        None => break,
                    },
                };
                agent.handle_trigger(trigger).await;
                counter.fetch_sub(1, Ordering::AcqRel);
            }
            tracing::debug!(%player, "player worker stopped");
        });
        Worker {
            tx,
            in_flight,
            last_used: tokio::time::Instant::now(),
        }
    }

    /// Handle one trigger to completion.
    ///
    /// Returns the trigger's own result, or `None` when the action was parked
    /// for confirmation.
    pub async fn handle_trigger(&self, trigger: Trigger) -> Option<ActionResult> {
        let player = trigger.player().to_string();
        tracing::info!(%player, trigger = %trigger.id.short(), body = %trigger.body, "trigger");

        if let Some(reply) = confirm::parse_reply(&trigger.body) {
            return Some(self.handle_reply(&trigger, reply).await);
        }

        let started = Instant::now();
        self.transition(&player, AgentState::AwaitingDecision).await;
        let decision = match self.direct_decision(&trigger.body) {
            Some(decision) => decision,
            None => self.decide(&trigger).await,
        };
        tracing::debug!(
            %player,
            action = %decision.action,
            rationale = %decision.rationale,
            "decision"
        );

        self.transition(&player, AgentState::Validating).await;
        let result = self.dispatch(&trigger, decision).await;
        self.transition(&player, AgentState::Idle).await;

        let result = result?.with_duration(started.elapsed());
        self.record(&result).await;
        Some(result)
    }

    async fn decide(&self, trigger: &Trigger) -> Decision {
        let _permit = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => {
                return Decision::noop(rationale::CANCELLED);
            }
            permit = self.inner.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Decision::noop(rationale::CANCELLED),
            },
        };

        let context = context::assemble(
            &self.inner.config.agent_name,
            trigger,
            self.inner.memory.as_ref(),
            &self.inner.config.memory,
            self.inner.roster.players().await,
        )
        .await;
        let commands = self.inner.registry.summaries();
        self.inner
            .decider
            .decide(&context, &commands, &self.inner.cancel)
            .await
    }

    /// `say <text>` and `jump` skip the model when those commands exist
    fn direct_decision(&self, body: &str) -> Option<Decision> {
        if !self.inner.config.direct_commands {
            return None;
        }
        let body = body.trim();
        let (word, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let word = word.to_lowercase();
        if !self.inner.registry.contains(&word) {
            return None;
        }

        let mut arguments = Map::new();
        match (word.as_str(), rest.trim()) {
            ("jump", "") => {}
            ("say", text) if !text.is_empty() => {
                arguments.insert("message".to_string(), Value::String(text.to_string()));
            }
            _ => return None,
        }
        Some(Decision::direct(word, arguments))
    }

    /// Validate a decision and either run it or park it.
    async fn dispatch(&self, trigger: &Trigger, decision: Decision) -> Option<ActionResult> {
        let player = trigger.player();

        if decision.is_synthetic() {
            return Some(
                ActionResult::failure(NOOP_ACTION, player, &decision.rationale, "no action taken")
                    .with_trigger(Some(trigger.id)),
            );
        }
        if decision.is_noop() {
            return Some(
                ActionResult::success(NOOP_ACTION, player, "no action taken")
                    .with_trigger(Some(trigger.id)),
            );
        }

        let validated = self
            .inner
            .registry
            .resolve(&decision.action)
            .and_then(|spec| {
                let arguments = self.inner.registry.validate(&spec, &decision.arguments)?;
                Ok((spec, arguments))
            });
        let (spec, arguments) = match validated {
            Ok(validated) => validated,
            Err(error) => {
                tracing::warn!(
                    %player,
                    trigger = %trigger.id.short(),
                    action = %decision.action,
                    %error,
                    "rejected invalid decision"
                );
                return Some(
                    ActionResult::failure(
                        &decision.action,
                        player,
                        codes::INVALID_DECISION,
                        error.to_string(),
                    )
                    .with_trigger(Some(trigger.id)),
                );
            }
        };

        if spec.needs_confirmation() {
            self.transition(player, AgentState::AwaitingConfirmation).await;
            self.park(trigger, spec, arguments).await;
            return None;
        }

        self.transition(player, AgentState::Executing).await;
        Some(self.execute(&spec, arguments, player, trigger.id).await)
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        arguments: Arguments,
        player: &str,
        trigger_id: TriggerId,
    ) -> ActionResult {
        let ctx = CommandContext {
            player: player.to_string(),
            trigger_id: Some(trigger_id),
            chat: self.inner.chat.clone(),
            memory: self.inner.memory.clone(),
        };
        let result = self
            .inner
            .registry
            .execute(spec, arguments, ctx, &self.inner.cancel)
            .await;
        self.acknowledge(&result).await;
        result
    }

    async fn park(
        &self,
        trigger: &Trigger,
        spec: Arc<CommandSpec>,
        arguments: Arguments,
    ) {
        let player = trigger.player().to_string();
        let timeout = self.inner.config.confirmation_timeout;
        let summary = format!("{} {}", spec.name, arguments);
        let pending = PendingAction::new(
            &player,
            spec,
            arguments,
            trigger.id,
            tokio::time::Instant::now() + timeout,
        );
        let token = pending.token.clone();
        let expires_at = pending.expires_at;

        if let Some(old) = self.inner.pending.insert(pending).await {
            tracing::info!(%player, command = %old.spec.name, "pending confirmation superseded");
            self.record(
                &ActionResult::failure(
                    &old.spec.name,
                    &old.player,
                    codes::CONFIRMATION_SUPERSEDED,
                    "replaced by a newer request",
                )
                .with_trigger(Some(old.trigger_id)),
            )
            .await;
        }

        let agent = self.clone();
        let timer_player = player.clone();
        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = agent.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(expires_at) => agent.expire(&timer_player, &timer_token).await,
            }
        });
        self.inner
            .pending
            .attach_timer(&player, &token, timer.abort_handle())
            .await;

        tracing::info!(%player, %token, command = %summary, "awaiting confirmation");
        self.say(&format!(
            "{player}: {} needs confirmation. Say \"{}, confirm {token}\" within {}s.",
            summary.trim_end(),
            self.inner.config.agent_name,
            timeout.as_secs()
        ))
        .await;
    }

    async fn expire(&self, player: &str, token: &str) {
        if let Some(expired) = self.inner.pending.expire(player, token).await {
            tracing::info!(%player, command = %expired.spec.name, "confirmation timed out");
            self.record(&timeout_result(&expired, self.inner.config.confirmation_timeout)).await;
        }
    }

    async fn handle_reply(&self, trigger: &Trigger, reply: Reply) -> ActionResult {
        let player = trigger.player();
        let pending = match reply {
            Reply::Cancel => {
                let result = match self.inner.pending.cancel(player).await {
                    Some(cancelled) => ActionResult::failure(
                        &cancelled.spec.name,
                        player,
                        codes::CONFIRMATION_CANCELLED,
                        "cancelled by player",
                    )
                    .with_trigger(Some(cancelled.trigger_id)),
                    None => ActionResult::failure(
                        NOOP_ACTION,
                        player,
                        codes::CONFIRMATION_MISMATCH,
                        "nothing pending to cancel",
                    )
                    .with_trigger(Some(trigger.id)),
                };
                self.record(&result).await;
                return result;
            }
            Reply::Confirm(token) => {
                self.inner
                    .pending
                    .confirm(player, &token, tokio::time::Instant::now())
                    .await
            }
        };

        let result = match pending {
            Ok(pending) => {
                tracing::info!(%player, command = %pending.spec.name, "confirmed");
                // The player's worker may be mid-decision; leave its state alone
                let tracked = self
                    .replace_state(player, AgentState::Idle, AgentState::Executing)
                    .await;
                let result = self
                    .execute(&pending.spec, pending.arguments, player, pending.trigger_id)
                    .await;
                if tracked {
                    self.replace_state(player, AgentState::Executing, AgentState::Idle)
                        .await;
                }
                result
            }
            Err(ConfirmFailure::Expired(expired)) => {
                timeout_result(&expired, self.inner.config.confirmation_timeout)
            }
            Err(ConfirmFailure::Mismatch) => {
                tracing::info!(%player, "confirmation did not match anything pending");
                ActionResult::failure(
                    NOOP_ACTION,
                    player,
                    codes::CONFIRMATION_MISMATCH,
                    "no pending action with that token",
                )
                .with_trigger(Some(trigger.id))
            }
        };
        self.record(&result).await;
        result
    }

    async fn discard_pending(&self) {
        for pending in self.inner.pending.drain().await {
            self.record(
                &ActionResult::failure(
                    &pending.spec.name,
                    &pending.player,
                    codes::CANCELLED,
                    "session ended before confirmation",
                )
                .with_trigger(Some(pending.trigger_id)),
            )
            .await;
        }
    }

    async fn transition(&self, player: &str, to: AgentState) {
        let mut states = self.inner.states.write().await;
        let from = states.insert(player.to_string(), to).unwrap_or_default();
        if from != to {
            tracing::debug!(%player, %from, %to, "state transition");
        }
    }

    /// Move `player` from `from` to `to`; false if they were elsewhere
    async fn replace_state(&self, player: &str, from: AgentState, to: AgentState) -> bool {
        let mut states = self.inner.states.write().await;
        let current = states.get(player).copied().unwrap_or_default();
        if current != from {
            return false;
        }
        states.insert(player.to_string(), to);
        tracing::debug!(%player, %from, %to, "state transition");
        true
    }

    /// Append to memory and broadcast. Storage failures are logged only.
    async fn record(&self, result: &ActionResult) {
        if let Err(error) = self
            .inner
            .memory
            .append_episode(&result.player, result)
            .await
        {
            tracing::warn!(player = %result.player, command = %result.command, %error, "failed to record episode");
        }
        if result.success {
            tracing::info!(player = %result.player, command = %result.command, effect = %result.effect, "action succeeded");
        } else {
            tracing::info!(
                player = %result.player,
                command = %result.command,
                error = result.error.as_deref().unwrap_or_default(),
                "action failed"
            );
        }
        // No subscribers is fine
        let _ = self.inner.outcomes.send(result.clone());
    }

    async fn acknowledge(&self, result: &ActionResult) {
        let config = &self.inner.config;
        if result.success {
            if config.acknowledge && !SPEAKING_COMMANDS.contains(&result.command.as_str()) {
                self.say(&format!("{}: {}", result.player, result.effect)).await;
            }
        } else if config.notify_failures {
            self.say(FAILURE_NOTICE).await;
        }
    }

    async fn say(&self, text: &str) {
        if let Err(error) = self.inner.chat.send_chat(truncate_chat(text)).await {
            tracing::warn!(%error, "failed to send chat");
        }
    }
}

/// How long a player worker may sit with an empty queue before it is reaped
pub const WORKER_IDLE: Duration = Duration::from_secs(300);

/// Sending half of one player's queue
struct Worker {
    tx: mpsc::UnboundedSender<Trigger>,
    /// Triggers sent but not yet fully handled
    in_flight: Arc<AtomicUsize>,
    last_used: tokio::time::Instant,
}

impl Worker {
    fn send(&mut self, trigger: Trigger) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.last_used = tokio::time::Instant::now();
        if let Err(mpsc::error::SendError(trigger)) = self.tx.send(trigger) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(player = %trigger.player(), "player worker gone, dropping trigger");
        }
    }

    fn is_idle(&self, now: tokio::time::Instant) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
            && now.saturating_duration_since(self.last_used) >= WORKER_IDLE
    }
}

/// Drop the queues of idle workers; each worker exits once its queue closes.
/// `run` is the only sender, so nothing can be queued between the check and
/// the drop.
fn reap_idle(workers: &mut HashMap<String, Worker>) {
    let now = tokio::time::Instant::now();
    workers.retain(|player, worker| {
        let keep = !worker.is_idle(now);
        if !keep {
            tracing::debug!(%player, "reaping idle player worker");
        }
        keep
    });
}

fn timeout_result(expired: &PendingAction, after: Duration) -> ActionResult {
    let reason = Error::ConfirmationTimeout {
        player: expired.player.clone(),
        command: expired.spec.name.clone(),
        after,
    };
    ActionResult::failure(
        &expired.spec.name,
        &expired.player,
        codes::CONFIRMATION_TIMEOUT,
        reason.to_string(),
    )
    .with_trigger(Some(expired.trigger_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatEvent;
    use crate::command::builtin;
    use crate::memory::InMemoryStore;
    use crate::testing::{RecordingChat, ScriptedDecider};
    use serde_json::json;

    struct Harness {
        agent: AgentLoop,
        decider: Arc<ScriptedDecider>,
        chat: Arc<RecordingChat>,
        memory: Arc<InMemoryStore>,
    }

    fn harness(decisions: Vec<Decision>) -> Harness {
        let allowed: Vec<String> = builtin::DEFAULT_ALLOWED_ITEMS.iter().map(|s| s.to_string()).collect();
        let registry = CommandRegistry::from_catalog(
            builtin::catalog(&allowed),
            &builtin::names(),
            &[],
        )
        .unwrap();
        let decider = Arc::new(ScriptedDecider::new(decisions));
        let chat = Arc::new(RecordingChat::new());
        let memory = Arc::new(InMemoryStore::new());
        let agent = AgentLoop::new(
            AgentConfig::new("AgentBot1"),
            Arc::new(registry),
            decider.clone(),
            memory.clone(),
            chat.clone(),
        );
        Harness {
            agent,
            decider,
            chat,
            memory,
        }
    }

    fn trigger(player: &str, body: &str) -> Trigger {
        Trigger::new(ChatEvent::new(player, format!("agent, {body}")), body)
    }

    fn decision(action: &str, arguments: Value) -> Decision {
        Decision::new(action, arguments.as_object().cloned().unwrap_or_default(), "test")
    }

    #[tokio::test]
    async fn test_safe_command_executes() {
        let h = harness(vec![decision("give_item", json!({"item": "diamond_sword", "qty": 1}))]);
        let result = h.agent.handle_trigger(trigger("Steve", "give me a diamond sword")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.command, "give_item");
        assert_eq!(
            h.chat.sent().await,
            vec!["/give Steve minecraft:diamond_sword 1", "Steve: gave 1 diamond_sword to Steve"]
        );
        assert_eq!(h.memory.episodes("Steve").await.len(), 1);
        assert_eq!(h.agent.state("Steve").await, AgentState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_action_is_invalid_decision() {
        let h = harness(vec![decision("teleport_admin", json!({}))]);
        let result = h.agent.handle_trigger(trigger("Steve", "make me admin")).await.unwrap();
        assert!(result.failed_with(codes::INVALID_DECISION));
        assert!(h.chat.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_decision() {
        let h = harness(vec![decision("give_item", json!({"item": "bedrock"}))]);
        let result = h.agent.handle_trigger(trigger("Steve", "bedrock pls")).await.unwrap();
        assert!(result.failed_with(codes::INVALID_DECISION));
        assert!(result.effect.contains("bedrock"));
    }

    #[tokio::test]
    async fn test_synthetic_noop_records_rationale() {
        let h = harness(vec![Decision::noop(rationale::TIMEOUT)]);
        let result = h.agent.handle_trigger(trigger("Steve", "hello?")).await.unwrap();
        assert!(result.failed_with(rationale::TIMEOUT));
        assert!(h.chat.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_model_noop_is_success() {
        let h = harness(vec![decision("noop", json!({}))]);
        let result = h.agent.handle_trigger(trigger("Steve", "nice weather")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.command, NOOP_ACTION);
    }

    #[tokio::test]
    async fn test_direct_commands_skip_decider() {
        let h = harness(Vec::new());
        let result = h.agent.handle_trigger(trigger("Steve", "jump")).await.unwrap();
        assert!(result.success);
        let result = h.agent.handle_trigger(trigger("Steve", "say hello there")).await.unwrap();
        assert!(result.success);
        assert_eq!(h.chat.sent().await, vec![builtin::JUMP_EMOTE, "hello there"]);
        assert_eq!(h.decider.calls().await, 0);
    }

    #[tokio::test]
    async fn test_direct_say_still_validated() {
        let h = harness(Vec::new());
        let result = h.agent.handle_trigger(trigger("Steve", "say /op Steve")).await.unwrap();
        assert!(result.failed_with(codes::INVALID_DECISION));
        assert!(h.chat.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_flow() {
        let h = harness(vec![decision("set_time", json!({"time": "night"}))]);
        assert!(h.agent.handle_trigger(trigger("Steve", "make it night")).await.is_none());
        let token = h.agent.pending_token("Steve").await.unwrap();
        assert!(h.chat.sent().await[0].contains(&format!("confirm {token}")));

        // Someone else cannot confirm Steve's action
        let other = h.agent.handle_trigger(trigger("Alex", &format!("confirm {token}"))).await.unwrap();
        assert!(other.failed_with(codes::CONFIRMATION_MISMATCH));

        let result = h.agent.handle_trigger(trigger("Steve", &format!("confirm {token}"))).await.unwrap();
        assert!(result.success);
        assert!(h.chat.sent().await.contains(&"/time set night".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout() {
        let h = harness(vec![decision("set_time", json!({"time": "day"}))]);
        let mut outcomes = h.agent.subscribe();
        assert!(h.agent.handle_trigger(trigger("Steve", "day please")).await.is_none());

        let result = outcomes.recv().await.unwrap();
        assert!(result.failed_with(codes::CONFIRMATION_TIMEOUT));
        assert!(h.agent.pending_token("Steve").await.is_none());
        assert!(!h.chat.sent().await.iter().any(|l| l.starts_with("/time")));
    }

    #[tokio::test]
    async fn test_cancel_discards_pending() {
        let h = harness(vec![decision("set_time", json!({"time": "day"}))]);
        h.agent.handle_trigger(trigger("Steve", "day please")).await;
        let result = h.agent.handle_trigger(trigger("Steve", "cancel")).await.unwrap();
        assert!(result.failed_with(codes::CONFIRMATION_CANCELLED));
        assert!(h.agent.pending_token("Steve").await.is_none());
    }

    #[tokio::test]
    async fn test_newer_request_supersedes() {
        let h = harness(vec![
            decision("set_time", json!({"time": "day"})),
            decision("set_time", json!({"time": "night"})),
        ]);
        let mut outcomes = h.agent.subscribe();
        h.agent.handle_trigger(trigger("Steve", "day")).await;
        h.agent.handle_trigger(trigger("Steve", "no, night")).await;
        let superseded = outcomes.recv().await.unwrap();
        assert!(superseded.failed_with(codes::CONFIRMATION_SUPERSEDED));
    }

    #[tokio::test]
    async fn test_run_processes_until_channel_closes() {
        let h = harness(vec![decision("jump", json!({})), decision("jump", json!({}))]);
        let mut outcomes = h.agent.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(trigger("Steve", "hop")).unwrap();
        tx.send(trigger("Alex", "hop")).unwrap();
        drop(tx);
        h.agent.run(rx).await;

        let mut players = vec![
            outcomes.recv().await.unwrap().player,
            outcomes.recv().await.unwrap().player,
        ];
        players.sort();
        assert_eq!(players, vec!["Alex", "Steve"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_workers_are_reaped() {
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
        let (busy_tx, _busy_rx) = mpsc::unbounded_channel();
        let now = tokio::time::Instant::now();
        let mut workers = HashMap::new();
        workers.insert(
            "Steve".to_string(),
            Worker {
                tx: idle_tx,
                in_flight: Arc::default(),
                last_used: now,
            },
        );
        workers.insert(
            "Alex".to_string(),
            Worker {
                tx: busy_tx,
                in_flight: Arc::new(AtomicUsize::new(1)),
                last_used: now,
            },
        );

        tokio::time::advance(WORKER_IDLE / 2).await;
        reap_idle(&mut workers);
        assert_eq!(workers.len(), 2);

        tokio::time::advance(WORKER_IDLE).await;
        reap_idle(&mut workers);
        assert!(workers.contains_key("Alex"));
        assert!(!workers.contains_key("Steve"));
        assert!(idle_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_is_served_again_after_reaping() {
        let h = harness(Vec::new());
        let mut outcomes = h.agent.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = h.agent.clone();
        let runner = tokio::spawn(async move { agent.run(rx).await });

        tx.send(trigger("Steve", "jump")).unwrap();
        assert_eq!(outcomes.recv().await.unwrap().command, "jump");

        tokio::time::sleep(WORKER_IDLE * 3).await;
        tx.send(trigger("Steve", "jump")).unwrap();
        assert_eq!(outcomes.recv().await.unwrap().command, "jump");
        assert_eq!(h.decider.calls().await, 0);

        drop(tx);
        runner.await.unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AgentState::AwaitingConfirmation.to_string(), "awaiting_confirmation");
    }
}
