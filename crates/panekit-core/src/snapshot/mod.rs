//! Versioned, serializable projection of every workspace and pane.
//!
//! Snapshots are read as raw JSON, brought to [`SNAPSHOT_VERSION`] by a
//! [`StateMigrator`], and only then parsed and validated. Nothing live is
//! constructed from a snapshot that failed any of those steps.

pub mod migration;
pub mod store;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pane::PaneId;
use crate::workspace::WorkspaceId;

pub use migration::{MigrationChain, MigrationStep, StateMigrator};
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON for this version: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported version {current}")]
    FutureVersion { found: u64, current: u32 },
    #[error("no migration from snapshot version {from} towards {to}")]
    NoMigrationPath { from: u32, to: u32 },
    #[error("migrating snapshot from version {from} to {to} failed")]
    Migration {
        from: u32,
        to: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("workspace {0} appears more than once")]
    DuplicateWorkspace(WorkspaceId),
    #[error("pane {0} appears more than once")]
    DuplicatePane(PaneId),
    #[error("active workspace {0} is not in the snapshot")]
    UnknownActiveWorkspace(WorkspaceId),
    #[error("id {0} leaves no room for new ids after it")]
    IdOutOfRange(u64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub version: u32,
    /// Application-wide key/value state
    #[serde(default)]
    pub app_state: BTreeMap<String, Value>,
    pub workspaces: Vec<WorkspaceState>,
    #[serde(default)]
    pub active_workspace: Option<WorkspaceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub id: WorkspaceId,
    pub name: String,
    #[serde(default)]
    pub custom: BTreeMap<String, Value>,
    /// Tab order
    pub panes: Vec<PaneState>,
    #[serde(default)]
    pub focused_pane: Option<PaneId>,
    #[serde(default)]
    pub default_pane: Option<PaneId>,
    /// Most recent first
    #[serde(default)]
    pub focus_history: Vec<PaneId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneState {
    pub id: PaneId,
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_focusable")]
    pub focusable: bool,
    #[serde(default)]
    pub state: Value,
}

fn default_focusable() -> bool {
    true
}

impl WorkspaceSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            app_state: BTreeMap::new(),
            workspaces: Vec::new(),
            active_workspace: None,
        }
    }

    /// Version tag of a raw snapshot. Untagged snapshots predate versioning
    /// and count as version 0.
    pub fn version_of(raw: &Value) -> u64 {
        raw.get("version").and_then(Value::as_u64).unwrap_or(0)
    }

    /// Migrates `raw` to the current version, then parses and validates it.
    pub fn from_value(raw: Value, migrator: &dyn StateMigrator) -> Result<Self, SnapshotError> {
        let tag = Self::version_of(&raw);
        let found = u32::try_from(tag).map_err(|_| SnapshotError::FutureVersion {
            found: tag,
            current: migrator.current_version(),
        })?;
        let migrated = migrator.migrate(raw, found)?;
        let snapshot: WorkspaceSnapshot = serde_json::from_value(migrated)?;
        if snapshot.version != migrator.current_version() {
            return Err(SnapshotError::NoMigrationPath {
                from: snapshot.version,
                to: migrator.current_version(),
            });
        }
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_value(&self) -> Result<Value, SnapshotError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn pane_count(&self) -> usize {
        self.workspaces.iter().map(|ws| ws.panes.len()).sum()
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut workspace_ids = HashSet::new();
        let mut pane_ids = HashSet::new();
        for ws in &self.workspaces {
            if ws.id == WorkspaceId::MAX {
                return Err(SnapshotError::IdOutOfRange(ws.id));
            }
            if !workspace_ids.insert(ws.id) {
                return Err(SnapshotError::DuplicateWorkspace(ws.id));
            }
            for pane in &ws.panes {
                if pane.id == PaneId::MAX {
                    return Err(SnapshotError::IdOutOfRange(pane.id));
                }
                if !pane_ids.insert(pane.id) {
                    return Err(SnapshotError::DuplicatePane(pane.id));
                }
            }
        }
        match self.active_workspace {
            Some(active) if !workspace_ids.contains(&active) => {
                Err(SnapshotError::UnknownActiveWorkspace(active))
            }
            _ => Ok(()),
        }
    }

    /// One past the largest workspace and pane ids in use. `validate` keeps
    /// every id below the maximum, so the additions never saturate.
    pub(crate) fn next_ids(&self) -> (WorkspaceId, PaneId) {
        let ws = self
            .workspaces
            .iter()
            .map(|ws| ws.id.saturating_add(1))
            .max()
            .unwrap_or(1);
        let pane = self
            .workspaces
            .iter()
            .flat_map(|ws| ws.panes.iter().map(|p| p.id.saturating_add(1)))
            .max()
            .unwrap_or(1);
        (ws, pane)
    }
}

impl Default for WorkspaceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": 1,
            "app_state": { "theme": "dark" },
            "workspaces": [
                {
                    "id": 1,
                    "name": "main",
                    "panes": [
                        { "id": 1, "kind": "editor", "title": "a.rs", "state": { "cursor": 4 } },
                        { "id": 2, "kind": "browser", "title": "docs", "focusable": false }
                    ],
                    "focused_pane": 1
                }
            ],
            "active_workspace": 1
        })
    }

    #[test]
    fn parses_current_version_with_defaults() {
        let snapshot = WorkspaceSnapshot::from_value(sample(), &MigrationChain::standard())
            .expect("valid snapshot");
        assert_eq!(snapshot.pane_count(), 2);
        let ws = &snapshot.workspaces[0];
        assert!(ws.panes[0].focusable);
        assert!(!ws.panes[1].focusable);
        assert_eq!(ws.panes[1].state, Value::Null);
        assert!(ws.focus_history.is_empty());
        assert_eq!(snapshot.next_ids(), (2, 3));
    }

    #[test]
    fn rejects_duplicate_panes() {
        let mut raw = sample();
        raw["workspaces"][0]["panes"][1]["id"] = json!(1);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicatePane(1)));
    }

    #[test]
    fn rejects_unknown_active_workspace() {
        let mut raw = sample();
        raw["active_workspace"] = json!(7);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(err, SnapshotError::UnknownActiveWorkspace(7)));
    }

    #[test]
    fn rejects_future_version() {
        let mut raw = sample();
        raw["version"] = json!(SNAPSHOT_VERSION + 1);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(err, SnapshotError::FutureVersion { .. }));
    }

    #[test]
    fn oversized_version_tag_is_a_future_version() {
        let mut raw = sample();
        raw["version"] = json!(u64::from(u32::MAX) + 2);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::FutureVersion { found: 4_294_967_297, current: SNAPSHOT_VERSION }
        ));
    }

    #[test]
    fn rejects_ids_at_the_top_of_the_range() {
        let mut raw = sample();
        raw["workspaces"][0]["panes"][1]["id"] = json!(u64::MAX);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(err, SnapshotError::IdOutOfRange(u64::MAX)));

        let mut raw = sample();
        raw["workspaces"][0]["id"] = json!(u64::MAX);
        raw["active_workspace"] = json!(u64::MAX);
        let err = WorkspaceSnapshot::from_value(raw, &MigrationChain::standard()).unwrap_err();
        assert!(matches!(err, SnapshotError::IdOutOfRange(u64::MAX)));
    }

    #[test]
    fn untagged_snapshot_is_version_zero() {
        assert_eq!(WorkspaceSnapshot::version_of(&json!({ "workspaces": [] })), 0);
        assert_eq!(WorkspaceSnapshot::version_of(&sample()), 1);
    }
}
