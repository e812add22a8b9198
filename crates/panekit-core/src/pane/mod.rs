pub mod factory;
pub mod manager;

use serde_json::Value;

use crate::shortcut::{ContextTag, KeyEvent};

pub use factory::{OpaquePane, PaneBuilder, PaneFactory};
pub use manager::{FocusOutcome, PaneManager, Refusal};

/// Pane identifier. Allocated from a monotonic counter and never reused, so a
/// stale id can only ever fail a liveness check, never alias a newer pane.
pub type PaneId = u64;

/// The widget hosted inside a pane. Its behaviour is the embedder's business;
/// the focus core only needs these hooks.
pub trait PaneContent {
    /// Stable type name, used to rebuild the content from a snapshot.
    fn kind(&self) -> &str;

    /// State blob stored in snapshots.
    fn save_state(&self) -> Value {
        Value::Null
    }

    /// Shortcut contexts this content adds, innermost first.
    fn context_tags(&self) -> Vec<ContextTag> {
        Vec::new()
    }

    fn on_focus_changed(&mut self, _focused: bool) {}

    /// Returns true when the key was consumed.
    fn handle_key(&mut self, _event: &KeyEvent) -> bool {
        false
    }
}

/// Rendering collaborator that draws the focus indicator.
pub trait FocusIndicator {
    fn set_focus_indicator(&self, pane: PaneId, focused: bool);
}

/// Indicator for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndicator;

impl FocusIndicator for NullIndicator {
    fn set_focus_indicator(&self, pane: PaneId, focused: bool) {
        tracing::trace!(pane, focused, "focus indicator");
    }
}

pub struct Pane {
    id: PaneId,
    pub title: String,
    focusable: bool,
    focused: bool,
    content: Box<dyn PaneContent>,
}

impl Pane {
    pub(crate) fn new(id: PaneId, title: String, focusable: bool, content: Box<dyn PaneContent>) -> Self {
        Self {
            id,
            title,
            focusable,
            focused: false,
            content,
        }
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn kind(&self) -> &str {
        self.content.kind()
    }

    pub fn is_focusable(&self) -> bool {
        self.focusable
    }

    /// The pane's own view of whether it holds focus. Kept equal to the pane
    /// manager's state; query the manager when in doubt.
    pub fn has_focus(&self) -> bool {
        self.focused
    }

    pub fn content(&self) -> &dyn PaneContent {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> &mut dyn PaneContent {
        self.content.as_mut()
    }

    pub(crate) fn set_focusable(&mut self, focusable: bool) {
        self.focusable = focusable;
    }

    pub(crate) fn set_focused(&mut self, focused: bool) {
        if self.focused != focused {
            self.focused = focused;
            self.content.on_focus_changed(focused);
        }
    }
}

impl std::fmt::Debug for Pane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pane")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("title", &self.title)
            .field("focusable", &self.focusable)
            .field("focused", &self.focused)
            .finish()
    }
}
