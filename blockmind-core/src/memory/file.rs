use super::{merge_recent, Episode, EpisodeKind, MemoryEntry, MemoryRecord, MemoryStore, Origin};
use crate::chat::ChatEvent;
use crate::command::ActionResult;
use crate::error::{StorageError, StorageResult};
use crate::id::EpisodeId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

const RECORDS_FILE: &str = "records.json";
const EPISODES_FILE: &str = "episodes.jsonl";

/// Episodes kept in memory per namespace unless configured otherwise
pub const DEFAULT_TAIL_LEN: usize = 256;

/// Durable store backed by JSON files.
///
/// Layout, one directory per namespace:
///
/// ```text
/// <root>/<namespace>/records.json    snapshot, replaced atomically
/// <root>/<namespace>/episodes.jsonl  append-only, one episode per line
/// ```
///
/// All access goes through one mutex, so there is a single writer. Only the
/// newest episodes of each namespace are cached; older ones are read back
/// from the log when a query asks for more.
///
/// The two files of a namespace load independently: a damaged snapshot
/// fails record reads and writes but never stops episodes being appended.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    tail_len: usize,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    closed: bool,
    namespaces: HashMap<String, Namespace>,
}

#[derive(Debug, Default)]
struct Namespace {
    records: Option<BTreeMap<String, MemoryRecord>>,
    log: Option<EpisodeLog>,
}

/// Position of the log plus its newest episodes
#[derive(Debug)]
struct EpisodeLog {
    next_seq: u64,
    count: u64,
    tail: VecDeque<Episode>,
}

impl EpisodeLog {
    fn new() -> Self {
        Self {
            next_seq: 1,
            count: 0,
            tail: VecDeque::new(),
        }
    }

    fn push(&mut self, episode: Episode, keep: usize) {
        self.next_seq = episode.seq + 1;
        self.count += 1;
        self.tail.push_back(episode);
        while self.tail.len() > keep {
            self.tail.pop_front();
        }
    }

    /// Whether the cached tail is the whole log
    fn is_complete(&self) -> bool {
        self.tail.len() as u64 == self.count
    }
}

impl Namespace {
    async fn load_records(&mut self, dir: &Path) -> StorageResult<&mut BTreeMap<String, MemoryRecord>> {
        let records = match self.records.take() {
            Some(records) => records,
            None => load_records(&dir.join(RECORDS_FILE)).await?,
        };
        Ok(self.records.insert(records))
    }

    async fn load_log(&mut self, dir: &Path, keep: usize) -> StorageResult<&mut EpisodeLog> {
        let log = match self.log.take() {
            Some(log) => log,
            None => read_log(&dir.join(EPISODES_FILE), keep).await?,
        };
        Ok(self.log.insert(log))
    }
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| StorageError::Unavailable {
            reason: format!("cannot create {}: {e}", root.display()),
        })?;
        tracing::info!(path = %root.display(), "opened memory store");
        Ok(Self {
            root,
            tail_len: DEFAULT_TAIL_LEN,
            state: Mutex::new(State::default()),
        })
    }

    /// Set how many episodes per namespace stay cached
    pub fn with_tail_len(mut self, tail_len: usize) -> Self {
        self.tail_len = tail_len.max(1);
        self
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(escape_namespace(namespace))
    }

    async fn append(&self, namespace: &str, kind: EpisodeKind) -> StorageResult<EpisodeId> {
        let mut state = self.state.lock().await;
        let dir = self.namespace_dir(namespace);
        let log = open_namespace(&mut state, namespace)?
            .load_log(&dir, self.tail_len)
            .await?;

        let episode = Episode::new(namespace, log.next_seq, kind);
        let mut line = serde_json::to_vec(&episode)?;
        line.push(b'\n');

        fs::create_dir_all(&dir).await?;
        let path = dir.join(EPISODES_FILE);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let before = file.metadata().await?.len();
        if let Err(error) = write_line(&mut file, &line).await {
            tracing::warn!(path = %path.display(), %error, "episode write failed, rolling back");
            if let Err(rollback) = file.set_len(before).await {
                tracing::error!(path = %path.display(), error = %rollback, "episode rollback failed");
            }
            return Err(error.into());
        }

        let id = episode.id;
        log.push(episode, self.tail_len);
        Ok(id)
    }
}

fn open_namespace<'s>(state: &'s mut State, namespace: &str) -> StorageResult<&'s mut Namespace> {
    if state.closed {
        return Err(StorageError::Closed);
    }
    Ok(state.namespaces.entry(namespace.to_string()).or_default())
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<MemoryRecord> {
        let mut state = self.state.lock().await;
        let dir = self.namespace_dir(namespace);
        let records = open_namespace(&mut state, namespace)?
            .load_records(&dir)
            .await?;
        records
            .get(key)
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
        let mut state = self.state.lock().await;
        let dir = self.namespace_dir(namespace);
        let records = open_namespace(&mut state, namespace)?
            .load_records(&dir)
            .await?;

        let record = MemoryRecord::new(namespace, key, value, origin);
        let mut updated = records.clone();
        updated.insert(key.to_string(), record.clone());

        // The cache only changes once the snapshot is on disk
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(format!("{RECORDS_FILE}.tmp"));
        let content = serde_json::to_vec_pretty(&updated)?;
        write_synced(&tmp, &content).await?;
        fs::rename(&tmp, dir.join(RECORDS_FILE)).await?;
        sync_dir(&dir).await?;

        *records = updated;
        tracing::debug!(namespace, key, "stored memory record");
        Ok(record)
    }

    async fn append_episode(
        &self,
        namespace: &str,
        result: &ActionResult,
    ) -> StorageResult<EpisodeId> {
        self.append(namespace, EpisodeKind::Action(result.clone())).await
    }

    async fn append_chat(&self, namespace: &str, event: &ChatEvent) -> StorageResult<EpisodeId> {
        self.append(namespace, EpisodeKind::Chat(event.clone())).await
    }

    async fn query_recent(&self, namespace: &str, limit: usize) -> StorageResult<Vec<MemoryEntry>> {
        let mut state = self.state.lock().await;
        let dir = self.namespace_dir(namespace);
        let ns = open_namespace(&mut state, namespace)?;

        // Episodes are still worth returning when the snapshot is damaged
        if let Err(error) = ns.load_records(&dir).await {
            match error {
                StorageError::Corrupt { .. } => {
                    tracing::warn!(namespace, %error, "skipping unreadable records");
                }
                other => return Err(other),
            }
        }
        ns.load_log(&dir, self.tail_len).await?;

        let empty = BTreeMap::new();
        let records = ns.records.as_ref().unwrap_or(&empty);
        let Some(log) = ns.log.as_mut() else {
            return Ok(merge_recent(records.values(), &[], limit));
        };
        if limit > log.tail.len() && !log.is_complete() {
            let mut older = read_log(&dir.join(EPISODES_FILE), limit).await?;
            return Ok(merge_recent(records.values(), older.tail.make_contiguous(), limit));
        }
        Ok(merge_recent(records.values(), log.tail.make_contiguous(), limit))
    }

    async fn close(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.namespaces.clear();
        tracing::info!(path = %self.root.display(), "closed memory store");
        Ok(())
    }
}

async fn write_line(file: &mut fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.sync_data().await
}

/// Write a whole file and flush it to disk
async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

/// Persist a rename inside `dir`
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn load_records(path: &Path) -> StorageResult<BTreeMap<String, MemoryRecord>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Stream the episode log keeping the newest `keep` episodes, rolling back a
/// torn final line left by a crash.
async fn read_log(path: &Path, keep: usize) -> StorageResult<EpisodeLog> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EpisodeLog::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut log = EpisodeLog::new();
    let mut line = Vec::new();
    let mut line_no = 0u64;
    let mut good_len = 0u64;
    // A line that failed to parse; fatal unless it turns out to be the last
    let mut torn: Option<(u64, String)> = None;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            break;
        }
        if let Some((bad_line, reason)) = torn.take() {
            return Err(StorageError::Corrupt {
                path: path.display().to_string(),
                reason: format!("line {bad_line}: {reason}"),
            });
        }
        line_no += 1;

        let complete = line.last() == Some(&b'\n');
        if complete && line.iter().all(u8::is_ascii_whitespace) {
            good_len += read as u64;
            continue;
        }
        match serde_json::from_slice::<Episode>(&line) {
            Ok(episode) if complete => {
                log.push(episode, keep);
                good_len += read as u64;
            }
            Ok(_) => torn = Some((line_no, "missing newline".to_string())),
            Err(e) => torn = Some((line_no, e.to_string())),
        }
    }

    if let Some((_, reason)) = torn {
        tracing::warn!(path = %path.display(), %reason, "discarding torn trailing episode");
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(good_len).await?;
        file.sync_all().await?;
    }
    Ok(log)
}

/// Map a namespace to a directory name made only of `[A-Za-z0-9_-]`
fn escape_namespace(namespace: &str) -> String {
    if namespace.is_empty() {
        return "%".to_string();
    }
    namespace
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}
