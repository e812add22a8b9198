use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use super::WorkspaceSnapshot;

/// Persistence collaborator. Loads hand back raw JSON so migration runs
/// before the snapshot is parsed.
pub trait SnapshotStore {
    fn save(&mut self, snapshot: &WorkspaceSnapshot) -> anyhow::Result<()>;

    /// `None` when nothing has been saved yet.
    fn load(&self) -> anyhow::Result<Option<Value>>;
}

/// Pretty-printed JSON on disk, replaced atomically through a temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&mut self, snapshot: &WorkspaceSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(snapshot).context("failed to encode snapshot")?;
        let tmp = self.temp_path();
        fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move snapshot into {}", self.path.display()))?;
        debug!(path = %self.path.display(), panes = snapshot.pane_count(), "snapshot saved");
        Ok(())
    }

    fn load(&self) -> anyhow::Result<Option<Value>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let raw: Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid JSON", self.path.display()))?;
        Ok(Some(raw))
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    saved: Option<Value>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `raw`, as if an older build had saved it.
    pub fn with_raw(raw: Value) -> Self {
        Self {
            saved: Some(raw),
            saves: 0,
        }
    }

    pub fn raw(&self) -> Option<&Value> {
        self.saved.as_ref()
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&mut self, snapshot: &WorkspaceSnapshot) -> anyhow::Result<()> {
        self.saved = Some(serde_json::to_value(snapshot)?);
        self.saves += 1;
        Ok(())
    }

    fn load(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.saved.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileStore::new(dir.path().join("nested/snapshot.json"));
        assert!(store.load().expect("load").is_none());

        let snapshot = WorkspaceSnapshot::empty();
        store.save(&snapshot).expect("save");
        let raw = store.load().expect("load").expect("saved");
        assert_eq!(raw["version"], serde_json::json!(crate::snapshot::SNAPSHOT_VERSION));
        assert!(!dir.path().join("nested/snapshot.json.tmp").exists());
    }

    #[test]
    fn file_store_reports_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "{ not json").expect("write");
        assert!(JsonFileStore::new(path).load().is_err());
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryStore::new();
        store.save(&WorkspaceSnapshot::empty()).expect("save");
        store.save(&WorkspaceSnapshot::empty()).expect("save");
        assert_eq!(store.save_count(), 2);
        assert!(store.raw().is_some());
    }
}
