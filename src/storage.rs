use crate::{Address, LogEntry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// The durable fields of a replica: current term, who it voted for this term,
/// the replicated log, and how much of it is known committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistentState {
    #[serde(rename = "election_term")]
    pub current_term: u64,
    pub voted_for: Option<Address>,
    pub log: Vec<LogEntry>,
    pub commit_length: u64,
}

impl PersistentState {
    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }
}

/// Persists `PersistentState` to `storage/<ip>_<port>.json`, one file per
/// replica, writes serialized behind a single mutex. Every mutation goes
/// through [`StableStorage::with_state`], which holds the lock for the whole
/// read-modify-write and only releases it after the new state is on disk —
/// callers must never observe an effect of a mutation before this returns.
pub struct StableStorage {
    path: PathBuf,
    state: Mutex<PersistentState>,
}

impl StableStorage {
    /// Load `storage/<id>.json` if present, otherwise zero-initialize it.
    pub async fn open(dir: &str, address: &Address) -> Result<Self> {
        let path = PathBuf::from(dir).join(format!("{}.json", address.storage_id()));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating storage directory {}", parent.display()))?;
        }

        let state = match Self::try_load(&path).await {
            Some(state) => state,
            None => {
                let state = PersistentState::default();
                Self::persist(&path, &state).await?;
                state
            }
        };

        Ok(Self { path, state: Mutex::new(state) })
    }

    async fn try_load(path: &PathBuf) -> Option<PersistentState> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn persist(path: &PathBuf, state: &PersistentState) -> Result<()> {
        let bytes = serde_json::to_vec(state).context("serializing persistent state")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Run `f` against the current state with the lock held, persist the
    /// result, and only then return it. `f` must not perform network I/O.
    pub async fn with_state<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PersistentState) -> R,
    {
        let mut guard = self.state.lock().await;
        let result = f(&mut guard);
        Self::persist(&self.path, &guard).await?;
        Ok(result)
    }

    /// Read-only snapshot; does not touch disk.
    pub async fn snapshot(&self) -> PersistentState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogEntry;

    fn tmp_dir(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("raft_kv_store_test_{name}_{}", std::process::id()));
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn zero_initializes_when_missing() {
        let dir = tmp_dir("zero_init");
        let addr = Address::new("127.0.0.1", 9100);
        let storage = StableStorage::open(&dir, &addr).await.unwrap();
        let snap = storage.snapshot().await;
        assert_eq!(snap.current_term, 0);
        assert_eq!(snap.commit_length, 0);
        assert!(snap.log.is_empty());
        assert!(snap.voted_for.is_none());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn mutation_persists_before_with_state_returns() {
        let dir = tmp_dir("persist_before_return");
        let addr = Address::new("127.0.0.1", 9101);
        let storage = StableStorage::open(&dir, &addr).await.unwrap();

        storage
            .with_state(|s| {
                s.current_term = 7;
                s.voted_for = Some(Address::new("127.0.0.1", 9102));
                s.log.push(LogEntry { term: 7, command: "ping".into(), value: String::new() });
            })
            .await
            .unwrap();

        let path = PathBuf::from(&dir).join(format!("{}.json", addr.storage_id()));
        let bytes = tokio::fs::read(&path).await.unwrap();
        let on_disk: PersistentState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(on_disk.current_term, 7);
        assert_eq!(on_disk.log.len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn restart_reloads_previous_state() {
        let dir = tmp_dir("restart_reload");
        let addr = Address::new("127.0.0.1", 9103);
        {
            let storage = StableStorage::open(&dir, &addr).await.unwrap();
            storage.with_state(|s| s.current_term = 3).await.unwrap();
        }
        let reopened = StableStorage::open(&dir, &addr).await.unwrap();
        assert_eq!(reopened.snapshot().await.current_term, 3);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn wire_format_uses_election_term_field_name() {
        let state = PersistentState { current_term: 4, ..Default::default() };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"election_term\":4"));
    }
}
