//! The boundary to the game server.
//!
//! The Minecraft protocol itself lives outside this crate; a [`Transport`]
//! hands back a [`Connection`] made of an outgoing [`ChatSink`] and a channel
//! of [`TransportEvent`]s.

use crate::chat::{truncate_chars, ChatEvent, MAX_CHAT_LEN};
use crate::error::TransportResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Login details for the server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Account name the agent logs in as
    pub username: String,
    /// Account password, if the server needs one
    pub password: Option<String>,
}

impl Credentials {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Something that happened on the server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A player chatted
    Chat(ChatEvent),
    /// A player came online
    PlayerJoined(String),
    /// A player went offline
    PlayerLeft(String),
    /// The connection ended
    Disconnected(String),
}

/// Outgoing chat
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Send one chat line (or a `/` server command) as the agent
    async fn send_chat(&self, text: &str) -> TransportResult<()>;
}

/// A live server session
pub struct Connection {
    /// Outgoing half
    pub chat: Arc<dyn ChatSink>,
    /// Incoming events; closes when the session ends
    pub events: mpsc::Receiver<TransportEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Establishes server sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// Log in and start receiving events
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Connection>;

    /// Human-readable transport name for logs
    fn name(&self) -> &str;
}

/// Cut outgoing text to the server's chat limit
pub fn truncate_chat(text: &str) -> &str {
    truncate_chars(text, MAX_CHAT_LEN)
}

/// Parse a vanilla chat line of the form `<Steve> hello`
pub fn parse_chat_line(line: &str) -> Option<ChatEvent> {
    let rest = line.trim().strip_prefix('<')?;
    let (sender, text) = rest.split_once('>')?;
    let sender = sender.trim();
    if sender.is_empty() || sender.contains(char::is_whitespace) {
        return None;
    }
    Some(ChatEvent::new(sender, text.trim()))
}

/// Players currently online
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: Arc<RwLock<BTreeSet<String>>>,
}

impl Roster {
    /// An empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a join/leave event; other events are ignored
    pub async fn apply(&self, event: &TransportEvent) {
        match event {
            TransportEvent::PlayerJoined(name) => {
                self.players.write().await.insert(name.clone());
                tracing::info!(player = %name, "player joined");
            }
            TransportEvent::PlayerLeft(name) => {
                self.players.write().await.remove(name);
                tracing::info!(player = %name, "player left");
            }
            TransportEvent::Chat(chat) => {
                // Anyone talking is evidently online
                self.players.write().await.insert(chat.sender.clone());
            }
            TransportEvent::Disconnected(_) => self.players.write().await.clear(),
        }
    }

    /// Whether a player is online
    pub async fn contains(&self, player: &str) -> bool {
        self.players.read().await.contains(player)
    }

    /// Sorted list of online players
    pub async fn players(&self) -> Vec<String> {
        self.players.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_line() {
        let event = parse_chat_line("<Steve> agent, hi there").unwrap();
        assert_eq!(event.sender, "Steve");
        assert_eq!(event.text, "agent, hi there");
        assert!(parse_chat_line("Steve joined the game").is_none());
        assert!(parse_chat_line("<> nothing").is_none());
    }

    #[test]
    fn test_truncate_chat() {
        let long = "x".repeat(300);
        assert_eq!(truncate_chat(&long).len(), 256);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            host: "localhost".to_string(),
            port: 25565,
            username: "AgentBot1".to_string(),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(creds.address(), "localhost:25565");
    }

    #[tokio::test]
    async fn test_roster_tracks_joins_and_leaves() {
        let roster = Roster::new();
        roster.apply(&TransportEvent::PlayerJoined("Steve".into())).await;
        roster.apply(&TransportEvent::PlayerJoined("Alex".into())).await;
        roster.apply(&TransportEvent::PlayerLeft("Steve".into())).await;
        assert_eq!(roster.players().await, vec!["Alex".to_string()]);

        roster.apply(&TransportEvent::Disconnected("bye".into())).await;
        assert!(!roster.contains("Alex").await);
    }
}
