//! Chat events and the listener that picks out agent-directed messages.
//!
//! The listener sits on the transport's receive path, so [`ChatListener::on_event`]
//! is synchronous and does nothing but string work.

use crate::id::TriggerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minecraft's per-message chat limit
pub const MAX_CHAT_LEN: usize = 256;

/// A chat line as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Player who sent the message
    pub sender: String,
    /// Raw message text
    pub text: String,
    /// When the transport received it
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    /// Create an event stamped with the current time
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A chat event classified as directed at the agent
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Unique trigger ID
    pub id: TriggerId,
    /// The originating event
    pub event: ChatEvent,
    /// Message text with the address stripped
    pub body: String,
}

impl Trigger {
    /// Wrap an event with an explicit body
    pub fn new(event: ChatEvent, body: impl Into<String>) -> Self {
        Self {
            id: TriggerId::new(),
            event,
            body: body.into(),
        }
    }

    /// The player who addressed the agent
    pub fn player(&self) -> &str {
        &self.event.sender
    }
}

/// How the agent recognises that it is being addressed
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// The agent's in-game name
    pub agent_name: String,
    /// Extra names the agent answers to
    pub aliases: Vec<String>,
    /// Command prefixes such as `!`
    pub prefixes: Vec<String>,
    /// Treat any mention of a name as addressing the agent
    pub mention_anywhere: bool,
    /// Longer messages are cut to this many characters
    pub max_message_len: usize,
}

impl ListenerConfig {
    /// Listen for the given agent name only
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            aliases: Vec::new(),
            prefixes: Vec::new(),
            mention_anywhere: false,
            max_message_len: MAX_CHAT_LEN,
        }
    }

    /// Add an alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Add a prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Enable mention-anywhere matching
    pub fn with_mention_anywhere(mut self) -> Self {
        self.mention_anywhere = true;
        self
    }
}

/// Filters chat events down to triggers
#[derive(Debug, Clone)]
pub struct ChatListener {
    agent_name: String,
    names: Vec<String>,
    prefixes: Vec<String>,
    mention_anywhere: bool,
    max_message_len: usize,
}

impl ChatListener {
    /// Build a listener from its configuration
    pub fn new(config: ListenerConfig) -> Self {
        let mut names: Vec<String> = std::iter::once(config.agent_name.clone())
            .chain(config.aliases)
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        // "agentbot1" must be tried before "agentbot"
        names.sort_by_key(|n| std::cmp::Reverse(n.chars().count()));
        names.dedup();

        let prefixes = config
            .prefixes
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            agent_name: config.agent_name,
            names,
            prefixes,
            mention_anywhere: config.mention_anywhere,
            max_message_len: config.max_message_len.max(1),
        }
    }

    /// Classify one chat event; `None` means it is not for the agent
    pub fn on_event(&self, event: &ChatEvent) -> Option<Trigger> {
        let sender = event.sender.trim();
        if sender.is_empty() || sender.eq_ignore_ascii_case(&self.agent_name) {
            return None;
        }

        let text = truncate_chars(event.text.trim(), self.max_message_len);
        let body = self.addressed_body(text)?;
        Some(Trigger::new(event.clone(), body))
    }

    fn addressed_body<'a>(&self, text: &'a str) -> Option<&'a str> {
        for name in &self.names {
            if let Some(rest) = strip_prefix_ignore_case(text, name) {
                match rest.chars().next() {
                    None => return Some(""),
                    Some(c) if c.is_whitespace() || c == ',' || c == ':' => {
                        return Some(strip_separators(rest));
                    }
                    _ => {}
                }
            }
        }

        for prefix in &self.prefixes {
            if let Some(rest) = strip_prefix_ignore_case(text, prefix) {
                return Some(rest.trim());
            }
        }

        if self.mention_anywhere {
            let lowered = text.to_lowercase();
            if self.names.iter().any(|name| lowered.contains(name.as_str())) {
                return Some(text);
            }
        }

        None
    }
}

/// Cut `text` to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut text_chars = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = text_chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    let split = text_chars.next().map(|(idx, _)| idx).unwrap_or(text.len());
    Some(&text[split..])
}

fn strip_separators(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> ChatListener {
        ChatListener::new(
            ListenerConfig::new("AgentBot1")
                .with_alias("agent")
                .with_prefix("!"),
        )
    }

    #[test]
    fn test_name_address_strips_separator() {
        let trigger = listener()
            .on_event(&ChatEvent::new("Steve", "agent, give me a diamond sword"))
            .unwrap();
        assert_eq!(trigger.body, "give me a diamond sword");
        assert_eq!(trigger.player(), "Steve");
        assert_eq!(trigger.event.text, "agent, give me a diamond sword");
    }

    #[test]
    fn test_case_insensitive_and_longest_name_first() {
        let trigger = listener()
            .on_event(&ChatEvent::new("Alex", "AGENTBOT1: jump"))
            .unwrap();
        assert_eq!(trigger.body, "jump");
    }

    #[test]
    fn test_prefix_address() {
        let trigger = listener().on_event(&ChatEvent::new("Alex", "!say hi")).unwrap();
        assert_eq!(trigger.body, "say hi");
    }

    #[test]
    fn test_unaddressed_messages_are_ignored() {
        let l = listener();
        for text in [
            "hello everyone",
            "agentsmith is here",
            "the agent is cool",
            "",
            "say agent, hi",
        ] {
            assert!(l.on_event(&ChatEvent::new("Steve", text)).is_none(), "{text}");
        }
    }

    #[test]
    fn test_own_messages_are_ignored() {
        assert!(listener()
            .on_event(&ChatEvent::new("agentbot1", "agent, say loop"))
            .is_none());
    }

    #[test]
    fn test_mention_anywhere() {
        let l = ChatListener::new(ListenerConfig::new("AgentBot1").with_mention_anywhere());
        let trigger = l
            .on_event(&ChatEvent::new("Steve", "has anyone seen agentbot1 today?"))
            .unwrap();
        assert_eq!(trigger.body, "has anyone seen agentbot1 today?");
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let mut config = ListenerConfig::new("bot");
        config.max_message_len = 10;
        let l = ChatListener::new(config);
        let trigger = l
            .on_event(&ChatEvent::new("Steve", "bot say aaaaaaaaaaaaaaaa"))
            .unwrap();
        assert_eq!(trigger.body, "say aa");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn test_triggers_get_distinct_ids() {
        let l = listener();
        let event = ChatEvent::new("Steve", "agent hi");
        let a = l.on_event(&event).unwrap();
        let b = l.on_event(&event).unwrap();
        assert_ne!(a.id, b.id);
    }
}
