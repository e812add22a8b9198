pub mod bus;
pub mod config;
pub mod event;
pub mod history;
pub mod pane;
pub mod scheduler;
pub mod services;
pub mod shortcut;
pub mod snapshot;
pub mod workspace;

pub use bus::{EventBus, Owner, ScopedSubscription, SubscriptionHandle, SubscriptionScope};
pub use config::Config;
pub use event::{Event, Topic};
pub use history::FocusHistory;
pub use pane::{
    FocusIndicator, FocusOutcome, NullIndicator, OpaquePane, PaneContent, PaneFactory, PaneId,
    PaneManager, Refusal,
};
pub use scheduler::{Priority, Scheduler, SchedulerStats, TaskOutcome};
pub use services::FocusServices;
pub use shortcut::{Action, ContextTag, KeyCombo, KeyEvent, ShortcutResolver};
pub use snapshot::{SnapshotError, SnapshotStore, WorkspaceSnapshot};
pub use workspace::{KeyDispatch, SwitchOutcome, Workspace, WorkspaceId, WorkspaceManager};
