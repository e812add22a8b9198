use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::DEFAULT_HISTORY_DEPTH;
use crate::shortcut::{Action, ContextTag, KeyCombo, ShortcutResolver};

/// Keybindings per context tag: `combo -> action name`.
pub type KeybindingTable = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub focus: FocusConfig,
    pub snapshot: SnapshotConfig,
    pub keybindings: KeybindingTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Entries kept per workspace focus history
    pub history_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Empty means `<data dir>/snapshot.json`
    pub path: String,
}

/// A keybinding entry that could not be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDiagnostic {
    pub context: String,
    pub combo: String,
    pub message: String,
}

impl fmt::Display for BindingDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[keybindings.{}] \"{}\": {}", self.context, self.combo, self.message)
    }
}

impl Config {
    /// Load config from default path (~/.config/panekit/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parses a config file. A `[keybindings.<context>]` table replaces that
    /// context's defaults; contexts it does not mention keep theirs.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for (context, combos) in default_keybindings() {
            config.keybindings.entry(context).or_insert(combos);
        }
        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        ProjectDirs::from("", "", "panekit")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| dirs_fallback().join("panekit"))
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        ProjectDirs::from("", "", "panekit")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| dirs_fallback().join("panekit"))
    }

    /// Resolve where snapshots are stored
    pub fn snapshot_path(&self) -> PathBuf {
        if !self.snapshot.path.is_empty() {
            return PathBuf::from(&self.snapshot.path);
        }
        Self::data_dir().join("snapshot.json")
    }

    /// Registers every configured binding. Entries that do not parse are
    /// skipped and reported instead of failing the whole table.
    pub fn install_keybindings(&self, resolver: &mut ShortcutResolver) -> Vec<BindingDiagnostic> {
        let mut diagnostics = Vec::new();
        let mut contexts: Vec<_> = self.keybindings.iter().collect();
        contexts.sort_by(|a, b| a.0.cmp(b.0));
        for (context, combos) in contexts {
            let mut combos: Vec<_> = combos.iter().collect();
            combos.sort();
            for (combo, action) in combos {
                let diagnostic = |message: String| BindingDiagnostic {
                    context: context.clone(),
                    combo: combo.clone(),
                    message,
                };
                if action.trim().is_empty() {
                    diagnostics.push(diagnostic("empty action".into()));
                    continue;
                }
                match combo.parse::<KeyCombo>() {
                    Ok(parsed) => {
                        resolver.register(ContextTag::from(context.as_str()), parsed, Action::from_name(action.trim()));
                    }
                    Err(err) => diagnostics.push(diagnostic(err.to_string())),
                }
            }
        }
        for diagnostic in &diagnostics {
            warn!("skipping keybinding {diagnostic}");
        }
        diagnostics
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            focus: FocusConfig::default(),
            snapshot: SnapshotConfig::default(),
            keybindings: default_keybindings(),
        }
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

fn default_keybindings() -> KeybindingTable {
    let mut global = HashMap::new();
    global.insert("ctrl+tab".into(), "next-workspace".into());
    global.insert("ctrl+shift+tab".into(), "prev-workspace".into());
    global.insert("ctrl+shift+w".into(), "close-pane".into());
    global.insert("ctrl+shift+p".into(), "command-palette".into());

    let mut workspace = HashMap::new();
    workspace.insert("tab".into(), "focus-next".into());
    workspace.insert("shift+tab".into(), "focus-prev".into());

    let mut m = HashMap::new();
    m.insert(ContextTag::GLOBAL.to_string(), global);
    m.insert(ContextTag::WORKSPACE.to_string(), workspace);
    m
}
