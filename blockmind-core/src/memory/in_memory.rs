use super::{merge_recent, Episode, EpisodeKind, MemoryEntry, MemoryRecord, MemoryStore, Origin};
use crate::chat::ChatEvent;
use crate::command::ActionResult;
use crate::error::{StorageError, StorageResult};
use crate::id::EpisodeId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Volatile store for tests and runs without a data directory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    closed: bool,
    records: HashMap<String, BTreeMap<String, MemoryRecord>>,
    episodes: HashMap<String, Vec<Episode>>,
}

impl Inner {
    fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn append(&mut self, namespace: &str, kind: EpisodeKind) -> StorageResult<EpisodeId> {
        self.check_open()?;
        let log = self.episodes.entry(namespace.to_string()).or_default();
        let episode = Episode::new(namespace, log.len() as u64 + 1, kind);
        let id = episode.id;
        log.push(episode);
        Ok(id)
    }
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every episode in a namespace, oldest first
    pub async fn episodes(&self, namespace: &str) -> Vec<Episode> {
        self.inner
            .read()
            .await
            .episodes
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<MemoryRecord> {
        let inner = self.inner.read().await;
        inner.check_open()?;
        inner
            .records
            .get(namespace)
            .and_then(|records| records.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        origin: Origin,
    ) -> StorageResult<MemoryRecord> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        let record = MemoryRecord::new(namespace, key, value, origin);
        inner
            .records
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(record)
    }

    async fn append_episode(
        &self,
        namespace: &str,
        result: &ActionResult,
    ) -> StorageResult<EpisodeId> {
        self.inner
            .write()
            .await
            .append(namespace, EpisodeKind::Action(result.clone()))
    }

    async fn append_chat(&self, namespace: &str, event: &ChatEvent) -> StorageResult<EpisodeId> {
        self.inner
            .write()
            .await
            .append(namespace, EpisodeKind::Chat(event.clone()))
    }

    async fn query_recent(&self, namespace: &str, limit: usize) -> StorageResult<Vec<MemoryEntry>> {
        let inner = self.inner.read().await;
        inner.check_open()?;
        let records = inner.records.get(namespace).into_iter().flat_map(|r| r.values());
        let episodes = inner.episodes.get(namespace).map(Vec::as_slice).unwrap_or(&[]);
        Ok(merge_recent(records, episodes, limit))
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.write().await.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryStore::new();
        store
            .put("Steve", "favourite_block", json!("obsidian"), Origin::System)
            .await
            .unwrap();
        let record = store.get("Steve", "favourite_block").await.unwrap();
        assert_eq!(record.value, json!("obsidian"));
        assert!(store.get("Alex", "favourite_block").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = InMemoryStore::new();
        store.put("n", "k", json!(1), Origin::System).await.unwrap();
        store.put("n", "k", json!(2), Origin::System).await.unwrap();
        assert_eq!(store.get("n", "k").await.unwrap().value, json!(2));
        assert_eq!(store.query_recent("n", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_episode_sequence_per_namespace() {
        let store = InMemoryStore::new();
        store.append_chat("Steve", &ChatEvent::new("Steve", "one")).await.unwrap();
        store.append_chat("Alex", &ChatEvent::new("Alex", "one")).await.unwrap();
        store.append_chat("Steve", &ChatEvent::new("Steve", "two")).await.unwrap();

        let seqs: Vec<u64> = store.episodes("Steve").await.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(store.episodes("Alex").await.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
        assert!(matches!(
            store.put("n", "k", json!(1), Origin::System).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.query_recent("n", 1).await, Err(StorageError::Closed)));
    }
}
