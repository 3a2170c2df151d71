//! Assembling what the model sees for one trigger.

use crate::chat::Trigger;
use crate::llm::DecisionContext;
use crate::memory::{EpisodeKind, MemoryEntry, MemoryStore};
use serde_json::Value;

/// Which memories go into a prompt
#[derive(Debug, Clone)]
pub struct MemoryPolicy {
    /// Entries taken from each namespace
    pub recent_limit: usize,
    /// Namespace shared by all players, if any
    pub global_namespace: Option<String>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            recent_limit: 10,
            global_namespace: None,
        }
    }
}

/// Build the decision context for a trigger.
///
/// Memory failures are logged and the context is built without memories.
pub async fn assemble(
    agent_name: &str,
    trigger: &Trigger,
    memory: &dyn MemoryStore,
    policy: &MemoryPolicy,
    online_players: Vec<String>,
) -> DecisionContext {
    let player = trigger.player();
    let mut memories = recall(memory, player, policy.recent_limit).await;
    if let Some(global) = policy.global_namespace.as_deref().filter(|g| *g != player) {
        memories.extend(recall(memory, global, policy.recent_limit).await);
    }

    DecisionContext {
        agent_name: agent_name.to_string(),
        player: player.to_string(),
        message: trigger.body.clone(),
        memories,
        online_players,
    }
}

async fn recall(memory: &dyn MemoryStore, namespace: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    match memory.query_recent(namespace, limit).await {
        Ok(entries) => entries.iter().map(describe).collect(),
        Err(error) => {
            tracing::warn!(namespace, %error, "memory unavailable, deciding without it");
            Vec::new()
        }
    }
}

/// One-line rendering of a memory for the prompt
pub fn describe(entry: &MemoryEntry) -> String {
    match entry {
        MemoryEntry::Record(record) => {
            format!("{}: {} = {}", record.namespace, record.key, plain(&record.value))
        }
        MemoryEntry::Episode(episode) => match &episode.kind {
            EpisodeKind::Chat(chat) => format!("{} said: {}", chat.sender, chat.text),
            EpisodeKind::Action(result) if result.success => {
                format!("you did {} for {}: {}", result.command, result.player, result.effect)
            }
            EpisodeKind::Action(result) => format!(
                "{} for {} failed: {}",
                result.command,
                result.player,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        },
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatEvent;
    use crate::command::ActionResult;
    use crate::memory::{InMemoryStore, Origin};
    use crate::testing::UnavailableStore;
    use serde_json::json;

    fn trigger() -> Trigger {
        Trigger::new(ChatEvent::new("Steve", "agent, hi"), "hi")
    }

    #[tokio::test]
    async fn test_assemble_includes_player_and_global_memory() {
        let store = InMemoryStore::new();
        store
            .put("Steve", "favourite_block", json!("obsidian"), Origin::System)
            .await
            .unwrap();
        store
            .put("server", "rules", json!("no griefing"), Origin::System)
            .await
            .unwrap();
        store
            .append_episode("Steve", &ActionResult::success("jump", "Steve", "jumped"))
            .await
            .unwrap();

        let policy = MemoryPolicy {
            recent_limit: 5,
            global_namespace: Some("server".to_string()),
        };
        let context = assemble("AgentBot1", &trigger(), &store, &policy, vec!["Steve".into()]).await;

        assert_eq!(context.player, "Steve");
        assert_eq!(context.message, "hi");
        assert_eq!(context.memories.len(), 3);
        assert!(context.memories.contains(&"Steve: favourite_block = obsidian".to_string()));
        assert!(context.memories.contains(&"you did jump for Steve: jumped".to_string()));
        assert_eq!(context.memories.last().unwrap(), "server: rules = no griefing");
    }

    #[tokio::test]
    async fn test_unavailable_memory_degrades() {
        let context = assemble(
            "AgentBot1",
            &trigger(),
            &UnavailableStore,
            &MemoryPolicy::default(),
            Vec::new(),
        )
        .await;
        assert!(context.memories.is_empty());
        assert_eq!(context.message, "hi");
    }

    #[test]
    fn test_describe_failure() {
        let result = ActionResult::failure("teleport", "Steve", "confirmation_timeout", "");
        let entry = MemoryEntry::Episode(crate::memory::Episode::new(
            "Steve",
            1,
            EpisodeKind::Action(result),
        ));
        assert_eq!(describe(&entry), "teleport for Steve failed: confirmation_timeout");
    }
}
