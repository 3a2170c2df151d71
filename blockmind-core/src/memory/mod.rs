//! Persistent memory: keyed records plus an ordered episodic log.
//!
//! Memory is split into namespaces, one per player plus an optional shared
//! one. Within a namespace, records are last-writer-wins key/value facts and
//! episodes are an append-only log ordered by `seq`.

mod file;
mod in_memory;

pub use file::{JsonFileStore, DEFAULT_TAIL_LEN};
pub use in_memory::InMemoryStore;

use crate::chat::ChatEvent;
use crate::command::ActionResult;
use crate::error::StorageResult;
use crate::id::{EpisodeId, TriggerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage for everything the agent remembers
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Read one record; a missing key is [`StorageError::NotFound`](crate::error::StorageError::NotFound)
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<MemoryRecord>;

    /// Write one record, replacing any previous value
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        origin: Origin,
    ) -> StorageResult<MemoryRecord>;

    /// Append the outcome of an action to the namespace's log
    async fn append_episode(&self, namespace: &str, result: &ActionResult)
        -> StorageResult<EpisodeId>;

    /// Append an observed chat line to the namespace's log
    async fn append_chat(&self, namespace: &str, event: &ChatEvent) -> StorageResult<EpisodeId>;

    /// Records and episodes, most recent first
    async fn query_recent(&self, namespace: &str, limit: usize) -> StorageResult<Vec<MemoryEntry>>;

    /// Finish in-flight writes and refuse further calls
    async fn close(&self) -> StorageResult<()>;
}

/// What caused a record to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "trigger_id", rename_all = "snake_case")]
pub enum Origin {
    /// Written while handling this trigger
    Trigger(TriggerId),
    /// Written by the agent itself
    System,
}

/// A key/value fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Owning namespace
    pub namespace: String,
    /// Key, unique within the namespace
    pub key: String,
    /// Stored value
    pub value: Value,
    /// Time of the last write
    pub last_updated: DateTime<Utc>,
    /// Who wrote it
    pub origin: Origin,
}

impl MemoryRecord {
    /// A record stamped with the current time
    pub fn new(namespace: &str, key: &str, value: Value, origin: Origin) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            last_updated: Utc::now(),
            origin,
        }
    }
}

/// Payload of an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EpisodeKind {
    /// An executed or rejected command
    Action(ActionResult),
    /// A chat line the agent saw
    Chat(ChatEvent),
}

/// One entry in the episodic log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique ID
    pub id: EpisodeId,
    /// Position in the namespace's log, starting at 1
    pub seq: u64,
    /// Owning namespace
    pub namespace: String,
    /// When it was appended
    pub recorded_at: DateTime<Utc>,
    /// Payload
    pub kind: EpisodeKind,
}

impl Episode {
    /// A new episode at position `seq`
    pub fn new(namespace: &str, seq: u64, kind: EpisodeKind) -> Self {
        Self {
            id: EpisodeId::new(),
            seq,
            namespace: namespace.to_string(),
            recorded_at: Utc::now(),
            kind,
        }
    }
}

/// Either kind of memory, as returned by [`MemoryStore::query_recent`]
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryEntry {
    /// A key/value fact
    Record(MemoryRecord),
    /// A log entry
    Episode(Episode),
}

impl MemoryEntry {
    /// When this entry was last written
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MemoryEntry::Record(r) => r.last_updated,
            MemoryEntry::Episode(e) => e.recorded_at,
        }
    }
}

/// Merge records and episodes newest first, keeping episodes in `seq` order.
pub(crate) fn merge_recent<'a>(
    records: impl IntoIterator<Item = &'a MemoryRecord>,
    episodes: &[Episode],
    limit: usize,
) -> Vec<MemoryEntry> {
    let mut records: Vec<&MemoryRecord> = records.into_iter().collect();
    records.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

    let mut records = records.into_iter().peekable();
    let mut episodes = episodes.iter().rev().peekable();
    let mut merged = Vec::with_capacity(limit);

    while merged.len() < limit {
        let take_episode = match (records.peek(), episodes.peek()) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some(r), Some(e)) => e.recorded_at >= r.last_updated,
        };
        let entry = if take_episode {
            episodes.next().map(|e| MemoryEntry::Episode(e.clone()))
        } else {
            records.next().map(|r| MemoryEntry::Record(r.clone()))
        };
        merged.extend(entry);
    }
    merged
}
