//! Scripted sessions for `panekit replay`.
//!
//! A script is a TOML file with a list of `[[step]]` tables, each tagged by
//! `op`. Workspaces and panes are named by labels chosen in the script;
//! panes restored from a snapshot can be referred to by numeric id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use panekit_core::shortcut::Key;
use panekit_core::snapshot::JsonFileStore;
use panekit_core::{
    Config, FocusServices, KeyCombo, KeyEvent, PaneContent, PaneFactory, PaneId, ShortcutResolver,
    WorkspaceId, WorkspaceManager,
};

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid script {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    AddWorkspace {
        label: String,
        #[serde(default)]
        name: Option<String>,
    },
    CloseWorkspace {
        workspace: String,
    },
    OpenPane {
        workspace: String,
        label: String,
        kind: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default = "default_focusable")]
        focusable: bool,
        #[serde(default)]
        state: Value,
    },
    Focus {
        pane: String,
    },
    FocusLater {
        pane: String,
    },
    SetFocusable {
        pane: String,
        focusable: bool,
    },
    Key {
        combo: String,
        #[serde(default)]
        repeat: bool,
    },
    Dispose {
        pane: String,
    },
    Switch {
        workspace: String,
    },
    Run,
    Save {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Load {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

fn default_focusable() -> bool {
    true
}

/// Stand-in content for every pane kind a script opens. Plain characters
/// typed into it are appended to its state under `typed`.
#[derive(Debug)]
pub struct ScriptPane {
    kind: String,
    state: Value,
}

impl ScriptPane {
    pub fn new(kind: impl Into<String>, state: Value) -> Self {
        Self {
            kind: kind.into(),
            state,
        }
    }
}

impl PaneContent for ScriptPane {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn save_state(&self) -> Value {
        self.state.clone()
    }

    fn handle_key(&mut self, event: &KeyEvent) -> bool {
        let Key::Char(c) = event.combo.key else {
            return false;
        };
        if !event.combo.modifiers.is_empty() {
            return false;
        }
        if self.state.is_null() {
            self.state = Value::Object(Default::default());
        }
        let Some(obj) = self.state.as_object_mut() else {
            return false;
        };
        let mut typed = obj
            .get("typed")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        typed.push(c);
        obj.insert("typed".into(), Value::String(typed));
        true
    }
}

pub struct Replay {
    manager: WorkspaceManager,
    workspaces: HashMap<String, WorkspaceId>,
    panes: HashMap<String, PaneId>,
    snapshot_path: PathBuf,
}

impl Replay {
    pub fn new(config: &Config, snapshot_path: PathBuf) -> Self {
        let mut factory = PaneFactory::new();
        factory.set_fallback(|kind, state| {
            Ok(Box::new(ScriptPane::new(kind, state.clone())) as Box<dyn PaneContent>)
        });
        let mut resolver = ShortcutResolver::new();
        let diagnostics = config.install_keybindings(&mut resolver);
        if !diagnostics.is_empty() {
            warn!(skipped = diagnostics.len(), "some keybindings were not installed");
        }
        let manager = WorkspaceManager::new(FocusServices::default())
            .with_factory(factory)
            .with_resolver(resolver)
            .with_history_depth(config.focus.history_depth);
        Self {
            manager,
            workspaces: HashMap::new(),
            panes: HashMap::new(),
            snapshot_path,
        }
    }

    pub fn manager(&self) -> &WorkspaceManager {
        &self.manager
    }

    /// Runs every step, draining deferred work after each one the way an
    /// event loop would between turns. Returns one report line per step.
    pub fn run(&mut self, script: &Script) -> Result<Vec<String>> {
        let mut report = Vec::with_capacity(script.steps.len());
        for (i, step) in script.steps.iter().enumerate() {
            let line = self
                .step(step)
                .with_context(|| format!("step {} ({step:?}) failed", i + 1))?;
            report.push(line);
        }
        Ok(report)
    }

    fn workspace(&self, label: &str) -> Result<WorkspaceId> {
        self.workspaces
            .get(label)
            .copied()
            .or_else(|| label.parse().ok())
            .ok_or_else(|| anyhow!("unknown workspace {label:?}"))
    }

    fn pane(&self, label: &str) -> Result<PaneId> {
        self.panes
            .get(label)
            .copied()
            .or_else(|| label.parse().ok())
            .ok_or_else(|| anyhow!("unknown pane {label:?}"))
    }

    fn step(&mut self, step: &Step) -> Result<String> {
        let line = match step {
            Step::AddWorkspace { label, name } => {
                let id = self.manager.add_workspace(name.clone().unwrap_or_else(|| label.clone()));
                self.workspaces.insert(label.clone(), id);
                format!("add-workspace {label} -> {id}")
            }
            Step::CloseWorkspace { workspace } => {
                let id = self.workspace(workspace)?;
                format!("close-workspace {workspace} -> {}", self.manager.close_workspace(id))
            }
            Step::OpenPane {
                workspace,
                label,
                kind,
                title,
                focusable,
                state,
            } => {
                let ws = self.workspace(workspace)?;
                let content = Box::new(ScriptPane::new(kind.as_str(), state.clone()));
                let title = title.clone().unwrap_or_else(|| label.clone());
                let id = self
                    .manager
                    .open_pane(ws, title, *focusable, content)
                    .with_context(|| format!("workspace {workspace:?} is gone"))?;
                self.panes.insert(label.clone(), id);
                format!("open-pane {label} -> {id}")
            }
            Step::Focus { pane } => {
                let id = self.pane(pane)?;
                format!("focus {pane} -> {:?}", self.manager.request_focus(id))
            }
            Step::FocusLater { pane } => {
                let id = self.pane(pane)?;
                format!("focus-later {pane} -> {:?}", self.manager.schedule_focus(id))
            }
            Step::SetFocusable { pane, focusable } => {
                let id = self.pane(pane)?;
                format!(
                    "set-focusable {pane} {focusable} -> {}",
                    self.manager.set_focusable(id, *focusable)
                )
            }
            Step::Key { combo, repeat } => {
                let parsed: KeyCombo = combo.parse()?;
                let event = if *repeat {
                    KeyEvent::repeat(parsed)
                } else {
                    KeyEvent::press(parsed)
                };
                format!("key {parsed} -> {:?}", self.manager.dispatch_key(&event))
            }
            Step::Dispose { pane } => {
                let id = self.pane(pane)?;
                format!("dispose {pane} -> {}", self.manager.dispose_pane(id))
            }
            Step::Switch { workspace } => {
                let id = self.workspace(workspace)?;
                format!("switch {workspace} -> {:?}", self.manager.switch_to(id))
            }
            Step::Run => format!("run -> {} task(s)", self.manager.run_pending()),
            Step::Save { path } => {
                let path = path.clone().unwrap_or_else(|| self.snapshot_path.clone());
                let mut store = JsonFileStore::new(&path);
                self.manager.persist(&mut store)?;
                format!("save -> {}", path.display())
            }
            Step::Load { path } => {
                let path = path.clone().unwrap_or_else(|| self.snapshot_path.clone());
                let store = JsonFileStore::new(&path);
                if !self.manager.load(&store)? {
                    bail!("no snapshot at {}", path.display());
                }
                format!("load <- {}", path.display())
            }
        };
        if !matches!(step, Step::Run) {
            self.manager.run_pending();
        }
        info!("{line}");
        Ok(line)
    }

    /// Closing summary: workspaces, panes and where focus ended up.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for ws in self.manager.workspaces() {
            let marker = if Some(ws.id()) == self.manager.active_workspace_id() { "*" } else { " " };
            lines.push(format!("{marker} workspace {} {:?}", ws.id(), ws.name));
            for pane in ws.panes().panes() {
                let focus = if self.manager.is_focused(pane.id()) { " [focused]" } else { "" };
                lines.push(format!(
                    "    pane {} {} {:?}{focus}",
                    pane.id(),
                    pane.kind(),
                    pane.title
                ));
            }
        }
        let stats = self.manager.services().scheduler.stats();
        lines.push(format!(
            "tasks: scheduled={} ran={} no-target={} skipped-dead={} cancelled={} coalesced={} retargeted={}",
            stats.scheduled,
            stats.ran,
            stats.no_target,
            stats.skipped_dead,
            stats.cancelled,
            stats.coalesced,
            stats.retargeted
        ));
        lines
    }
}
