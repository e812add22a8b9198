//! Context-sensitive shortcut resolution.
//!
//! A binding lives under one context tag. Resolution walks a context stack
//! from the innermost tag (for example the focused pane's text-input mode)
//! to the outermost (`global`) and returns the first binding found for the
//! key combination. Within one tag the last registration wins.

pub mod key;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use key::{Key, KeyCombo, KeyEvent, KeyParseError, Modifiers};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextTag(pub String);

impl ContextTag {
    pub const GLOBAL: &'static str = "global";
    pub const WORKSPACE: &'static str = "workspace";

    pub fn global() -> Self {
        Self::from(Self::GLOBAL)
    }

    pub fn workspace() -> Self {
        Self::from(Self::WORKSPACE)
    }

    /// Tag shared by every pane of the given kind, e.g. `pane:editor`.
    pub fn pane_kind(kind: &str) -> Self {
        Self(format!("pane:{kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextTag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContextTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ContextTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action bound to a shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Action {
    FocusNext,
    FocusPrev,
    NextWorkspace,
    PrevWorkspace,
    ClosePane,
    /// Handled by the embedding application
    Custom(String),
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::FocusNext => "focus-next",
            Action::FocusPrev => "focus-prev",
            Action::NextWorkspace => "next-workspace",
            Action::PrevWorkspace => "prev-workspace",
            Action::ClosePane => "close-pane",
            Action::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "focus-next" => Action::FocusNext,
            "focus-prev" => Action::FocusPrev,
            "next-workspace" => Action::NextWorkspace,
            "prev-workspace" => Action::PrevWorkspace,
            "close-pane" => Action::ClosePane,
            _ => Action::Custom(name.trim().to_string()),
        }
    }

    /// Whether the workspace manager performs this action itself.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Action::Custom(_))
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        Action::from_name(&value)
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.name().to_string()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single (context, combination, action) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutBinding<A = Action> {
    pub context: ContextTag,
    pub combo: KeyCombo,
    pub action: A,
}

#[derive(Debug, Clone)]
pub struct ShortcutResolver<A = Action> {
    bindings: HashMap<ContextTag, HashMap<KeyCombo, A>>,
}

impl<A> Default for ShortcutResolver<A> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }
}

impl<A: Clone> ShortcutResolver<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `combo` under `context`, returning the binding it replaced.
    pub fn register(&mut self, context: impl Into<ContextTag>, combo: KeyCombo, action: A) -> Option<A> {
        let context = context.into();
        let replaced = self
            .bindings
            .entry(context.clone())
            .or_default()
            .insert(combo, action);
        if replaced.is_some() {
            debug!(%context, %combo, "shortcut binding replaced");
        }
        replaced
    }

    pub fn unregister(&mut self, context: &ContextTag, combo: &KeyCombo) -> Option<A> {
        let per_context = self.bindings.get_mut(context)?;
        let removed = per_context.remove(combo);
        if per_context.is_empty() {
            self.bindings.remove(context);
        }
        removed
    }

    /// Returns the binding of the innermost context that binds `combo`.
    pub fn resolve(&self, stack: &[ContextTag], combo: &KeyCombo) -> Option<&A> {
        stack
            .iter()
            .find_map(|context| self.bindings.get(context)?.get(combo))
    }

    /// Like [`resolve`](Self::resolve), also reporting the matching context.
    pub fn resolve_with_context<'a>(
        &'a self,
        stack: &'a [ContextTag],
        combo: &KeyCombo,
    ) -> Option<(&'a ContextTag, &'a A)> {
        stack.iter().find_map(|context| {
            self.bindings
                .get(context)?
                .get(combo)
                .map(|action| (context, action))
        })
    }

    /// Repeat events resolve exactly like presses, against the current stack.
    pub fn resolve_event(&self, stack: &[ContextTag], event: &KeyEvent) -> Option<&A> {
        self.resolve(stack, &event.combo)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(HashMap::len).sum()
    }

    /// All bindings ordered by context, then combination.
    pub fn bindings(&self) -> Vec<ShortcutBinding<A>> {
        let ordered: BTreeMap<(&ContextTag, &KeyCombo), &A> = self
            .bindings
            .iter()
            .flat_map(|(context, combos)| combos.iter().map(move |(combo, a)| ((context, combo), a)))
            .collect();
        ordered
            .into_iter()
            .map(|((context, combo), action)| ShortcutBinding {
                context: context.clone(),
                combo: *combo,
                action: action.clone(),
            })
            .collect()
    }
}
