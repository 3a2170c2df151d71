//! A transport on stdin/stdout for play-testing without a server.
//!
//! Input lines:
//!
//! ```text
//! <Steve> agent, give me a diamond sword   chat from Steve
//! agent, jump                              chat from the default player
//! /join Alex                               Alex joins
//! /leave Alex                              Alex leaves
//! /quit                                    disconnect
//! ```
//!
//! Everything the agent sends is printed as `[AgentName] text`.

use async_trait::async_trait;
use blockmind_core::chat::ChatEvent;
use blockmind_core::error::{TransportError, TransportResult};
use blockmind_core::transport::{
    parse_chat_line, ChatSink, Connection, Credentials, Transport, TransportEvent,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{mpsc, Mutex};

/// Console transport
pub struct ConsoleTransport {
    default_player: String,
}

impl ConsoleTransport {
    /// Bare input lines are attributed to `default_player`
    pub fn new(default_player: impl Into<String>) -> Self {
        Self {
            default_player: default_player.into(),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Connection> {
        let (tx, rx) = mpsc::channel(64);
        let default_player = self.default_player.clone();
        tokio::spawn(read_stdin(default_player, tx));

        let chat = Arc::new(ConsoleChat {
            name: credentials.username.clone(),
            out: Mutex::new(tokio::io::stdout()),
        });
        Ok(Connection { chat, events: rx })
    }

    fn name(&self) -> &str {
        "console"
    }
}

async fn read_stdin(default_player: String, events: mpsc::Sender<TransportEvent>) {
    let _ = events
        .send(TransportEvent::PlayerJoined(default_player.clone()))
        .await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = parse_input(&line, &default_player) else {
                    continue;
                };
                let quit = matches!(event, TransportEvent::Disconnected(_));
                if events.send(event).await.is_err() || quit {
                    return;
                }
            }
            Ok(None) => break "end of input".to_string(),
            Err(error) => break error.to_string(),
        }
    };
    let _ = events.send(TransportEvent::Disconnected(reason)).await;
}

fn parse_input(line: &str, default_player: &str) -> Option<TransportEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix('/') {
        let (command, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim();
        return match command {
            "join" if !arg.is_empty() => Some(TransportEvent::PlayerJoined(arg.to_string())),
            "leave" if !arg.is_empty() => Some(TransportEvent::PlayerLeft(arg.to_string())),
            "quit" => Some(TransportEvent::Disconnected("quit".to_string())),
            _ => {
                eprintln!("unknown console command: {line}");
                None
            }
        };
    }
    let event = parse_chat_line(line).unwrap_or_else(|| ChatEvent::new(default_player, line));
    Some(TransportEvent::Chat(event))
}

struct ConsoleChat {
    name: String,
    out: Mutex<Stdout>,
}

#[async_trait]
impl ChatSink for ConsoleChat {
    async fn send_chat(&self, text: &str) -> TransportResult<()> {
        let line = format!("[{}] {text}\n", self.name);
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Send {
                reason: e.to_string(),
            })?;
        out.flush().await.map_err(|e| TransportError::Send {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        match parse_input("<Alex> agent, jump", "Steve") {
            Some(TransportEvent::Chat(chat)) => {
                assert_eq!(chat.sender, "Alex");
                assert_eq!(chat.text, "agent, jump");
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse_input("agent, jump", "Steve") {
            Some(TransportEvent::Chat(chat)) => assert_eq!(chat.sender, "Steve"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_input("/join Alex", "Steve"),
            Some(TransportEvent::PlayerJoined(name)) if name == "Alex"
        ));
        assert!(matches!(
            parse_input("/quit", "Steve"),
            Some(TransportEvent::Disconnected(_))
        ));
        assert!(parse_input("/join", "Steve").is_none());
        assert!(parse_input("   ", "Steve").is_none());
    }
}
