use serde::Serialize;

use crate::pane::PaneId;
use crate::workspace::WorkspaceId;

/// Bus topics. Every [`Event`] belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    FocusChanged,
    PaneOpened,
    PaneDisposed,
    WorkspaceActivated,
    WorkspaceDeactivated,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::FocusChanged,
        Topic::PaneOpened,
        Topic::PaneDisposed,
        Topic::WorkspaceActivated,
        Topic::WorkspaceDeactivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::FocusChanged => "focus-changed",
            Topic::PaneOpened => "pane-opened",
            Topic::PaneDisposed => "pane-disposed",
            Topic::WorkspaceActivated => "workspace-activated",
            Topic::WorkspaceDeactivated => "workspace-deactivated",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and focus notifications published on the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum Event {
    /// Input focus moved inside a workspace
    FocusChanged {
        workspace: WorkspaceId,
        previous: Option<PaneId>,
        current: PaneId,
    },
    /// A pane was added to a workspace
    PaneOpened {
        workspace: WorkspaceId,
        pane: PaneId,
    },
    /// A pane was destroyed by its workspace
    PaneDisposed {
        workspace: WorkspaceId,
        pane: PaneId,
    },
    WorkspaceActivated { workspace: WorkspaceId },
    WorkspaceDeactivated { workspace: WorkspaceId },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::FocusChanged { .. } => Topic::FocusChanged,
            Event::PaneOpened { .. } => Topic::PaneOpened,
            Event::PaneDisposed { .. } => Topic::PaneDisposed,
            Event::WorkspaceActivated { .. } => Topic::WorkspaceActivated,
            Event::WorkspaceDeactivated { .. } => Topic::WorkspaceDeactivated,
        }
    }

    pub fn workspace(&self) -> WorkspaceId {
        match self {
            Event::FocusChanged { workspace, .. }
            | Event::PaneOpened { workspace, .. }
            | Event::PaneDisposed { workspace, .. }
            | Event::WorkspaceActivated { workspace }
            | Event::WorkspaceDeactivated { workspace } => *workspace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_use_kebab_case_names() {
        assert_eq!(Topic::FocusChanged.as_str(), "focus-changed");
        assert_eq!(Topic::WorkspaceDeactivated.to_string(), "workspace-deactivated");
    }

    #[test]
    fn event_serializes_with_topic_tag() {
        let event = Event::FocusChanged {
            workspace: 1,
            previous: None,
            current: 7,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["topic"], "focus-changed");
        assert_eq!(value["current"], 7);
        assert!(value["previous"].is_null());
        assert_eq!(event.topic(), Topic::FocusChanged);
    }
}
