use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use super::PaneContent;

pub type PaneBuilder = Box<dyn Fn(&str, &Value) -> anyhow::Result<Box<dyn PaneContent>>>;

/// Content for a pane whose kind has no registered builder. It keeps the
/// saved blob verbatim so the pane survives the next save unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaquePane {
    kind: String,
    state: Value,
}

impl OpaquePane {
    pub fn new(kind: impl Into<String>, state: Value) -> Self {
        Self {
            kind: kind.into(),
            state,
        }
    }
}

impl PaneContent for OpaquePane {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn save_state(&self) -> Value {
        self.state.clone()
    }
}

/// Rebuilds pane contents from snapshot blobs, keyed by kind.
#[derive(Default)]
pub struct PaneFactory {
    builders: HashMap<String, PaneBuilder>,
    fallback: Option<PaneBuilder>,
}

impl PaneFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<Box<dyn PaneContent>> + 'static,
    {
        self.builders.insert(kind.into(), Box::new(builder));
    }

    /// Builder used for kinds without a registered one, in place of
    /// [`OpaquePane`].
    pub fn set_fallback<F>(&mut self, builder: F)
    where
        F: Fn(&str, &Value) -> anyhow::Result<Box<dyn PaneContent>> + 'static,
    {
        self.fallback = Some(Box::new(builder));
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Never fails: a missing or failing builder yields an [`OpaquePane`]
    /// holding the original blob.
    pub fn build(&self, kind: &str, state: &Value) -> Box<dyn PaneContent> {
        let builder = self.builders.get(kind).or(self.fallback.as_ref());
        match builder {
            Some(builder) => match builder(kind, state) {
                Ok(content) => content,
                Err(err) => {
                    warn!(kind, "pane builder failed, keeping state opaque: {err:#}");
                    Box::new(OpaquePane::new(kind, state.clone()))
                }
            },
            None => {
                warn!(kind, "no builder for pane kind, keeping state opaque");
                Box::new(OpaquePane::new(kind, state.clone()))
            }
        }
    }
}

impl std::fmt::Debug for PaneFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.builders.keys().collect();
        kinds.sort();
        f.debug_struct("PaneFactory")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
