//! Single-JSON-file State Store: every sandbox handle keyed by id, written
//! with a write-temp-then-rename so concurrent readers never see a partial
//! file. Concurrency model is "last writer wins" - no file locking - which
//! matches the Watchdog's own `_load_state()`/save cycle in
//! `quixand/core/watchdog.py`; callers that need read-modify-write safety
//! serialize through a single process (the Adapter) or accept the race.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::SandboxHandle;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(flatten)]
    pub sandboxes: HashMap<String, SandboxHandle>,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    /// Missing or corrupt state is treated as an empty store, never an
    /// error - a fresh host or a torn write from a crashed writer should
    /// not block every other operation.
    pub fn load(&self) -> StateFile {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return StateFile::default(),
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<SandboxHandle> {
        self.load().sandboxes.get(id).cloned()
    }

    pub fn put(&self, handle: SandboxHandle) -> Result<()> {
        let mut state = self.load();
        state.sandboxes.insert(handle.id.clone(), handle);
        self.write(&state)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.load();
        if state.sandboxes.remove(id).is_some() {
            self.write(&state)?;
        }
        Ok(())
    }

    pub fn touch(&self, id: &str, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let mut state = self.load();
        if let Some(handle) = state.sandboxes.get_mut(id) {
            handle.last_active_at = now;
            self.write(&state)?;
        }
        Ok(())
    }

    fn write(&self, state: &StateFile) -> Result<()> {
        atomic_write_json(&self.path, state)
    }
}

/// Serializes `value` and writes it atomically: a temp file in the same
/// directory (so the rename stays on one filesystem), fsync'd, then
/// renamed over the destination.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let body = serde_json::to_string_pretty(value)?;
    use std::io::Write;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| crate::error::QuixandError::FilesystemError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_handle(id: &str) -> SandboxHandle {
        SandboxHandle {
            id: id.to_string(),
            container_id: format!("c-{id}"),
            runtime: "docker".to_string(),
            workdir: "/workspace".to_string(),
            created_at: Utc::now(),
            last_active_at: Utc::now(),
            timeout_seconds: 300,
            metadata: serde_json::Value::Null,
            adapter: "local-docker".to_string(),
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().sandboxes.is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = StateStore::new(path);
        assert!(store.load().sandboxes.is_empty());
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.put(sample_handle("sbx-1")).unwrap();
        let fetched = store.get("sbx-1").unwrap();
        assert_eq!(fetched.container_id, "c-sbx-1");
    }

    #[test]
    fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.put(sample_handle("sbx-1")).unwrap();
        store.remove("sbx-1").unwrap();
        assert!(store.get("sbx-1").is_none());
    }

    #[test]
    fn write_is_atomic_no_partial_file_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(path.clone());
        for i in 0..20 {
            store.put(sample_handle(&format!("sbx-{i}"))).unwrap();
        }
        let state = store.load();
        assert_eq!(state.sandboxes.len(), 20);
    }
}
