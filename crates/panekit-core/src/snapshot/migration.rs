use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{SnapshotError, SNAPSHOT_VERSION};

pub type MigrationStep = Box<dyn Fn(Value) -> anyhow::Result<Value>>;

/// Brings raw snapshots up to the current schema before anything is built
/// from them.
pub trait StateMigrator {
    fn current_version(&self) -> u32;

    fn migrate(&self, raw: Value, from: u32) -> Result<Value, SnapshotError>;
}

/// Ordered chain of `(from, to)` transformers.
pub struct MigrationChain {
    current: u32,
    steps: BTreeMap<u32, (u32, MigrationStep)>,
}

impl MigrationChain {
    pub fn new(current: u32) -> Self {
        Self {
            current,
            steps: BTreeMap::new(),
        }
    }

    /// Chain for [`SNAPSHOT_VERSION`] with every known upgrade registered.
    pub fn standard() -> Self {
        let mut chain = Self::new(SNAPSHOT_VERSION);
        chain.register(0, 1, upgrade_unversioned);
        chain
    }

    /// Registers the transformer from `from` to `to`, replacing any earlier
    /// one for `from`. Steps that do not move forward are ignored.
    pub fn register<F>(&mut self, from: u32, to: u32, step: F)
    where
        F: Fn(Value) -> anyhow::Result<Value> + 'static,
    {
        if to <= from {
            debug!(from, to, "ignoring migration step that does not advance the version");
            return;
        }
        self.steps.insert(from, (to, Box::new(step)));
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl StateMigrator for MigrationChain {
    fn current_version(&self) -> u32 {
        self.current
    }

    fn migrate(&self, mut raw: Value, from: u32) -> Result<Value, SnapshotError> {
        if from > self.current {
            return Err(SnapshotError::FutureVersion {
                found: u64::from(from),
                current: self.current,
            });
        }
        let mut version = from;
        while version < self.current {
            let (to, step) = self.steps.get(&version).ok_or(SnapshotError::NoMigrationPath {
                from: version,
                to: self.current,
            })?;
            if *to > self.current {
                return Err(SnapshotError::NoMigrationPath {
                    from: version,
                    to: self.current,
                });
            }
            raw = step(raw).map_err(|source| SnapshotError::Migration {
                from: version,
                to: *to,
                source,
            })?;
            if let Some(obj) = raw.as_object_mut() {
                obj.insert("version".into(), Value::from(*to));
            }
            info!(from = version, to = *to, "snapshot migrated");
            version = *to;
        }
        Ok(raw)
    }
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<(u32, u32)> = self.steps.iter().map(|(from, (to, _))| (*from, *to)).collect();
        f.debug_struct("MigrationChain")
            .field("current", &self.current)
            .field("steps", &steps)
            .finish()
    }
}

/// Unversioned snapshots called the workspace name `title`, the pane kind
/// `type` and the focused pane `active_pane`.
fn upgrade_unversioned(mut raw: Value) -> anyhow::Result<Value> {
    let root = raw.as_object_mut().context("snapshot root is not an object")?;
    let workspaces = root
        .get_mut("workspaces")
        .and_then(Value::as_array_mut)
        .context("snapshot has no workspace list")?;
    for ws in workspaces {
        let ws = ws.as_object_mut().context("workspace entry is not an object")?;
        rename_key(ws, "title", "name");
        rename_key(ws, "active_pane", "focused_pane");
        if let Some(panes) = ws.get_mut("panes").and_then(Value::as_array_mut) {
            for pane in panes {
                let pane = pane.as_object_mut().context("pane entry is not an object")?;
                rename_key(pane, "type", "kind");
            }
        }
    }
    Ok(raw)
}

fn rename_key(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = obj.remove(from) {
        obj.entry(to).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upgrades_unversioned_layout() {
        let raw = json!({
            "workspaces": [
                { "id": 1, "title": "main", "active_pane": 3,
                  "panes": [{ "id": 3, "type": "editor", "state": {} }] }
            ]
        });
        let migrated = MigrationChain::standard().migrate(raw, 0).expect("migrates");
        assert_eq!(migrated["version"], json!(1));
        assert_eq!(migrated["workspaces"][0]["name"], json!("main"));
        assert_eq!(migrated["workspaces"][0]["focused_pane"], json!(3));
        assert_eq!(migrated["workspaces"][0]["panes"][0]["kind"], json!("editor"));
    }

    #[test]
    fn runs_steps_in_order() {
        let mut chain = MigrationChain::new(3);
        chain.register(1, 2, |mut v| {
            v["trail"] = json!("a");
            Ok(v)
        });
        chain.register(2, 3, |mut v| {
            let trail = format!("{}b", v["trail"].as_str().unwrap_or_default());
            v["trail"] = json!(trail);
            Ok(v)
        });
        let migrated = chain.migrate(json!({ "version": 1 }), 1).expect("migrates");
        assert_eq!(migrated, json!({ "version": 3, "trail": "ab" }));
    }

    #[test]
    fn missing_step_is_an_error() {
        let chain = MigrationChain::new(2);
        let err = chain.migrate(json!({}), 0).unwrap_err();
        assert!(matches!(err, SnapshotError::NoMigrationPath { from: 0, to: 2 }));
    }

    #[test]
    fn failing_step_reports_versions() {
        let mut chain = MigrationChain::new(1);
        chain.register(0, 1, |_| anyhow::bail!("corrupt"));
        let err = chain.migrate(json!({}), 0).unwrap_err();
        assert!(matches!(err, SnapshotError::Migration { from: 0, to: 1, .. }));
    }

    #[test]
    fn current_version_passes_through() {
        let raw = json!({ "version": 1, "workspaces": [] });
        assert_eq!(MigrationChain::standard().migrate(raw.clone(), 1).expect("no-op"), raw);
    }
}
