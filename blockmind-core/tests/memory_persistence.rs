//! Memory surviving a restart of the whole agent.

use blockmind_core::agent::{AgentConfig, AgentLoop};
use blockmind_core::chat::{ChatEvent, Trigger};
use blockmind_core::command::{builtin, CommandRegistry};
use blockmind_core::decision::Decision;
use blockmind_core::memory::{JsonFileStore, MemoryEntry, MemoryStore};
use blockmind_core::testing::{RecordingChat, ScriptedDecider};
use serde_json::{json, Map};
use std::path::Path;
use std::sync::Arc;

fn agent(memory: Arc<JsonFileStore>, decisions: Vec<Decision>) -> (AgentLoop, Arc<ScriptedDecider>) {
    let registry =
        CommandRegistry::from_catalog(builtin::catalog(&[]), &builtin::names(), &[]).unwrap();
    let decider = Arc::new(ScriptedDecider::new(decisions));
    let agent = AgentLoop::new(
        AgentConfig::new("AgentBot1"),
        Arc::new(registry),
        decider.clone(),
        memory,
        Arc::new(RecordingChat::new()),
    );
    (agent, decider)
}

fn trigger(player: &str, body: &str) -> Trigger {
    Trigger::new(ChatEvent::new(player, format!("agent, {body}")), body)
}

async fn open(dir: &Path) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::open(dir).await.unwrap())
}

#[tokio::test]
async fn test_memories_carry_across_sessions() {
    let dir = tempfile::tempdir().unwrap();

    // First run: learn something, then shut down
    let memory = open(dir.path()).await;
    let mut remember = Map::new();
    remember.insert("key".to_string(), json!("favourite_block"));
    remember.insert("value".to_string(), json!("obsidian"));
    let (first, _) = agent(
        memory.clone(),
        vec![Decision::new("remember", remember, "player told me")],
    );
    let result = first
        .handle_trigger(trigger("Steve", "my favourite block is obsidian"))
        .await
        .unwrap();
    assert!(result.success);
    memory.close().await.unwrap();

    // Second run sees it in the prompt
    let memory = open(dir.path()).await;
    let (second, decider) = agent(memory.clone(), Vec::new());
    second
        .handle_trigger(trigger("Steve", "what block do I like?"))
        .await;

    let context = &decider.contexts().await[0];
    assert!(context
        .memories
        .contains(&"Steve: favourite_block = obsidian".to_string()));
    assert!(context
        .memories
        .iter()
        .any(|m| m.starts_with("you did remember for Steve")));

    // Both runs' episodes are on disk, newest first
    let recent = memory.query_recent("Steve", 10).await.unwrap();
    let episodes: Vec<u64> = recent
        .iter()
        .filter_map(|entry| match entry {
            MemoryEntry::Episode(episode) => Some(episode.seq),
            MemoryEntry::Record(_) => None,
        })
        .collect();
    assert_eq!(episodes, vec![2, 1]);
}

#[tokio::test]
async fn test_players_do_not_share_memory() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open(dir.path()).await;
    memory
        .put(
            "Steve",
            "home",
            json!("spawn"),
            blockmind_core::memory::Origin::System,
        )
        .await
        .unwrap();

    assert!(memory.get("Alex", "home").await.unwrap_err().is_not_found());
    assert!(memory.query_recent("Alex", 10).await.unwrap().is_empty());
}
