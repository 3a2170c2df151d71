//! Pending confirmations for risky commands.
//!
//! At most one action per player waits for confirmation. Confirming,
//! cancelling, superseding and expiring all remove the entry under one
//! mutex, so whichever gets there first wins and the others see nothing.

use crate::command::{Arguments, CommandSpec};
use crate::id::TriggerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// An action parked until its player confirms
#[derive(Debug)]
pub struct PendingAction {
    /// Code the player must echo back
    pub token: String,
    /// Player who asked for it
    pub player: String,
    /// Validated command
    pub spec: Arc<CommandSpec>,
    /// Validated arguments
    pub arguments: Arguments,
    /// Trigger that produced the decision
    pub trigger_id: TriggerId,
    /// Deadline
    pub expires_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingAction {
    /// Park a validated action with a fresh token
    pub fn new(
        player: impl Into<String>,
        spec: Arc<CommandSpec>,
        arguments: Arguments,
        trigger_id: TriggerId,
        expires_at: Instant,
    ) -> Self {
        Self {
            token: new_token(),
            player: player.into(),
            spec,
            arguments,
            trigger_id,
            expires_at,
            timer: None,
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// What a player said in reply to a confirmation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `confirm <token>`
    Confirm(String),
    /// `cancel`
    Cancel,
}

/// Recognise `confirm <token>` and `cancel`, case-insensitively
pub fn parse_reply(body: &str) -> Option<Reply> {
    let mut words = body.split_whitespace();
    let first = words.next()?.to_lowercase();
    let token = words.next();
    if words.next().is_some() {
        return None;
    }
    match (first.as_str(), token) {
        ("confirm", Some(token)) => Some(Reply::Confirm(token.to_lowercase())),
        ("confirm", None) => Some(Reply::Confirm(String::new())),
        ("cancel", None) => Some(Reply::Cancel),
        _ => None,
    }
}

/// Why a confirmation did not release an action
#[derive(Debug)]
pub enum ConfirmFailure {
    /// Nothing pending, or the token differs; the pending action is kept
    Mismatch,
    /// The deadline had passed; the action was removed
    Expired(PendingAction),
}

/// Per-player table of pending actions
#[derive(Debug, Default)]
pub struct PendingConfirmations {
    inner: Mutex<HashMap<String, PendingAction>>,
}

impl PendingConfirmations {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an action, returning the one it supersedes
    pub async fn insert(&self, pending: PendingAction) -> Option<PendingAction> {
        let mut superseded = self
            .inner
            .lock()
            .await
            .insert(pending.player.clone(), pending);
        if let Some(old) = superseded.as_mut() {
            old.stop_timer();
        }
        superseded
    }

    /// Attach the expiry timer, unless the entry is already gone
    pub async fn attach_timer(&self, player: &str, token: &str, timer: AbortHandle) {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(player) {
            Some(pending) if pending.token == token => pending.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Release the action if `token` matches and the deadline has not passed
    pub async fn confirm(
        &self,
        player: &str,
        token: &str,
        now: Instant,
    ) -> Result<PendingAction, ConfirmFailure> {
        let mut inner = self.inner.lock().await;
        match inner.get(player) {
            Some(pending) if pending.token.eq_ignore_ascii_case(token) => {}
            _ => return Err(ConfirmFailure::Mismatch),
        }
        let mut pending = inner.remove(player).ok_or(ConfirmFailure::Mismatch)?;
        pending.stop_timer();
        if now >= pending.expires_at {
            Err(ConfirmFailure::Expired(pending))
        } else {
            Ok(pending)
        }
    }

    /// Remove the action if it is still the one with `token` (timer path)
    pub async fn expire(&self, player: &str, token: &str) -> Option<PendingAction> {
        let mut inner = self.inner.lock().await;
        match inner.get(player) {
            Some(pending) if pending.token == token => inner.remove(player),
            _ => None,
        }
    }

    /// Discard the player's pending action
    pub async fn cancel(&self, player: &str) -> Option<PendingAction> {
        let mut pending = self.inner.lock().await.remove(player)?;
        pending.stop_timer();
        Some(pending)
    }

    /// Remove everything, stopping all timers
    pub async fn drain(&self) -> Vec<PendingAction> {
        self.inner
            .lock()
            .await
            .drain()
            .map(|(_, mut pending)| {
                pending.stop_timer();
                pending
            })
            .collect()
    }

    /// Token of the player's pending action, if any
    pub async fn token_for(&self, player: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .get(player)
            .map(|p| p.token.clone())
    }
}

/// Six lowercase hex characters, short enough to type in chat
fn new_token() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}
