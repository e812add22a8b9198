use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bus::{Owner, SubscriptionScope};
use crate::event::{Event, Topic};
use crate::history::DEFAULT_HISTORY_DEPTH;
use crate::pane::{FocusOutcome, PaneContent, PaneFactory, PaneId, PaneManager, Refusal};
use crate::scheduler::{TaskId, TaskOutcome};
use crate::services::FocusServices;
use crate::shortcut::{Action, ContextTag, KeyEvent, ShortcutResolver};
use crate::snapshot::{
    MigrationChain, PaneState, SnapshotError, SnapshotStore, StateMigrator, WorkspaceSnapshot,
    WorkspaceState,
};

pub type WorkspaceId = u64;

#[derive(Debug)]
pub struct Workspace {
    id: WorkspaceId,
    pub name: String,
    custom: BTreeMap<String, Value>,
    panes: PaneManager,
}

impl Workspace {
    fn new(id: WorkspaceId, name: String, panes: PaneManager) -> Self {
        Self {
            id,
            name,
            custom: BTreeMap::new(),
            panes,
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn panes(&self) -> &PaneManager {
        &self.panes
    }

    pub fn custom(&self) -> &BTreeMap<String, Value> {
        &self.custom
    }

    pub fn pane_ids(&self) -> Vec<PaneId> {
        self.panes.pane_ids().to_vec()
    }

    fn to_state(&self) -> WorkspaceState {
        let panes = self
            .panes
            .panes()
            .map(|pane| PaneState {
                id: pane.id(),
                kind: pane.kind().to_string(),
                title: pane.title.clone(),
                focusable: pane.is_focusable(),
                state: pane.content().save_state(),
            })
            .collect();
        WorkspaceState {
            id: self.id,
            name: self.name.clone(),
            custom: self.custom.clone(),
            panes,
            focused_pane: self.panes.active_pane(),
            default_pane: self.panes.default_pane(),
            focus_history: self
                .panes
                .history()
                .panes()
                .into_iter()
                .filter(|id| self.panes.is_live(*id))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched {
        previous: Option<WorkspaceId>,
        current: WorkspaceId,
        focused: Option<PaneId>,
    },
    AlreadyActive(WorkspaceId),
    Refused(Refusal),
}

/// What [`WorkspaceManager::dispatch_key`] did with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDispatch {
    /// A built-in action bound to the key was performed
    Performed(Action),
    /// A bound action the caller has to perform
    Action(Action),
    /// No binding; the focused pane consumed the key
    Forwarded(PaneId),
    Unhandled,
}

/// Owns every workspace, the active-workspace switch and snapshots.
pub struct WorkspaceManager {
    workspaces: Vec<Workspace>,
    active: Option<WorkspaceId>,
    next_workspace_id: WorkspaceId,
    next_pane_id: PaneId,
    services: FocusServices,
    factory: PaneFactory,
    migrator: Box<dyn StateMigrator>,
    resolver: ShortcutResolver,
    app_state: BTreeMap<String, Value>,
    history_depth: usize,
    dirty: Rc<Cell<bool>>,
    _lifecycle: SubscriptionScope,
}

impl WorkspaceManager {
    pub fn new(services: FocusServices) -> Self {
        let dirty = Rc::new(Cell::new(false));
        let mut lifecycle = SubscriptionScope::new();
        for topic in Topic::ALL {
            let dirty = Rc::clone(&dirty);
            lifecycle.push(services.bus.subscribe_scoped(
                topic,
                Owner::Service("workspace-manager"),
                move |_| {
                    dirty.set(true);
                    Ok(())
                },
            ));
        }
        Self {
            workspaces: Vec::new(),
            active: None,
            next_workspace_id: 1,
            next_pane_id: 1,
            services,
            factory: PaneFactory::new(),
            migrator: Box::new(MigrationChain::standard()),
            resolver: ShortcutResolver::new(),
            app_state: BTreeMap::new(),
            history_depth: DEFAULT_HISTORY_DEPTH,
            dirty,
            _lifecycle: lifecycle,
        }
    }

    pub fn with_factory(mut self, factory: PaneFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_migrator(mut self, migrator: impl StateMigrator + 'static) -> Self {
        self.migrator = Box::new(migrator);
        self
    }

    pub fn with_resolver(mut self, resolver: ShortcutResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Applies to workspaces created afterwards.
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth;
        self
    }

    pub fn services(&self) -> &FocusServices {
        &self.services
    }

    pub fn factory_mut(&mut self) -> &mut PaneFactory {
        &mut self.factory
    }

    pub fn resolver(&self) -> &ShortcutResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut ShortcutResolver {
        &mut self.resolver
    }

    // -- workspaces --------------------------------------------------------

    /// Creates an empty workspace. The first one becomes active.
    pub fn add_workspace(&mut self, name: impl Into<String>) -> WorkspaceId {
        let id = self.next_workspace_id;
        self.next_workspace_id += 1;
        let panes = PaneManager::new(id, self.services.clone(), self.history_depth);
        let name = name.into();
        info!(workspace = id, %name, "workspace added");
        self.workspaces.push(Workspace::new(id, name, panes));
        self.dirty.set(true);
        if self.active.is_none() {
            self.switch_to(id);
        }
        id
    }

    /// Closes a workspace and disposes its panes. The last workspace is never
    /// closed; closing the active one switches to a neighbour first.
    pub fn close_workspace(&mut self, id: WorkspaceId) -> bool {
        if self.workspaces.len() <= 1 {
            return false;
        }
        let Some(pos) = self.position(id) else {
            return false;
        };
        if self.active == Some(id) {
            let neighbour = if pos + 1 < self.workspaces.len() { pos + 1 } else { pos - 1 };
            let target = self.workspaces[neighbour].id;
            self.switch_to(target);
        }
        let mut ws = self.workspaces.remove(pos);
        let disposed = ws.panes.dispose_all();
        info!(workspace = id, panes = disposed.len(), "workspace closed");
        self.dirty.set(true);
        true
    }

    pub fn rename_workspace(&mut self, id: WorkspaceId, name: impl Into<String>) -> bool {
        let Some(ws) = self.workspace_mut(id) else {
            return false;
        };
        ws.name = name.into();
        self.dirty.set(true);
        true
    }

    /// Sets custom key/value data on a workspace, returning the old value.
    pub fn set_custom(&mut self, id: WorkspaceId, key: impl Into<String>, value: Value) -> Option<Value> {
        let ws = self.workspace_mut(id)?;
        let old = ws.custom.insert(key.into(), value);
        self.dirty.set(true);
        old
    }

    pub fn remove_custom(&mut self, id: WorkspaceId, key: &str) -> Option<Value> {
        let old = self.workspace_mut(id)?.custom.remove(key);
        if old.is_some() {
            self.dirty.set(true);
        }
        old
    }

    pub fn app_state(&self) -> &BTreeMap<String, Value> {
        &self.app_state
    }

    pub fn set_app_state(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.dirty.set(true);
        self.app_state.insert(key.into(), value)
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|ws| ws.id == id)
    }

    fn workspace_mut(&mut self, id: WorkspaceId) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|ws| ws.id == id)
    }

    fn position(&self, id: WorkspaceId) -> Option<usize> {
        self.workspaces.iter().position(|ws| ws.id == id)
    }

    pub fn active_workspace(&self) -> Option<&Workspace> {
        self.active.and_then(|id| self.workspace(id))
    }

    pub fn active_workspace_id(&self) -> Option<WorkspaceId> {
        self.active
    }

    fn active_mut(&mut self) -> Option<&mut Workspace> {
        let id = self.active?;
        self.workspace_mut(id)
    }

    /// Deactivates the current workspace, then activates `target` and focuses
    /// its remembered, history or default pane.
    pub fn switch_to(&mut self, target: WorkspaceId) -> SwitchOutcome {
        if self.position(target).is_none() {
            return SwitchOutcome::Refused(Refusal::UnknownWorkspace(target));
        }
        if self.active == Some(target) {
            return SwitchOutcome::AlreadyActive(target);
        }
        let previous = self.active;
        if let Some(ws) = self.active_mut() {
            let cancelled = ws.panes.deactivate();
            debug!(workspace = ws.id, cancelled, "workspace deactivated");
        }
        if let Some(previous) = previous {
            self.services
                .bus
                .publish(&Event::WorkspaceDeactivated { workspace: previous });
        }

        self.active = Some(target);
        let focused = match self.workspace_mut(target) {
            Some(ws) => ws.panes.activate().focused(),
            None => None,
        };
        info!(workspace = target, ?previous, ?focused, "workspace activated");
        self.services
            .bus
            .publish(&Event::WorkspaceActivated { workspace: target });
        SwitchOutcome::Switched {
            previous,
            current: target,
            focused,
        }
    }

    pub fn next_workspace(&mut self) -> SwitchOutcome {
        self.cycle_workspace(true)
    }

    pub fn prev_workspace(&mut self) -> SwitchOutcome {
        self.cycle_workspace(false)
    }

    fn cycle_workspace(&mut self, forward: bool) -> SwitchOutcome {
        let len = self.workspaces.len();
        let Some(pos) = self.active.and_then(|id| self.position(id)) else {
            return match self.workspaces.first().map(Workspace::id) {
                Some(first) => self.switch_to(first),
                None => SwitchOutcome::Refused(Refusal::NoCandidate),
            };
        };
        let next = if forward { (pos + 1) % len } else { (pos + len - 1) % len };
        self.switch_to(self.workspaces[next].id)
    }

    // -- panes -------------------------------------------------------------

    /// Allocate a new pane ID. Ids are never reused, even across restores.
    fn next_pane_id(&mut self) -> PaneId {
        let id = self.next_pane_id;
        self.next_pane_id += 1;
        id
    }

    /// Opens a pane at the end of the workspace's tab order. If the
    /// workspace is active and nothing has focus, the pane takes focus once
    /// layout settles.
    pub fn open_pane(
        &mut self,
        workspace: WorkspaceId,
        title: impl Into<String>,
        focusable: bool,
        content: Box<dyn PaneContent>,
    ) -> Option<PaneId> {
        self.position(workspace)?;
        let id = self.next_pane_id();
        let ws = self.workspace_mut(workspace)?;
        ws.panes.insert_pane(id, title, focusable, content);
        if focusable && ws.panes.is_activated() && ws.panes.focused_pane().is_none() {
            ws.panes.schedule_restore_focus(Some(id));
        }
        Some(id)
    }

    pub fn workspace_of(&self, pane: PaneId) -> Option<WorkspaceId> {
        self.workspaces
            .iter()
            .find(|ws| ws.panes.is_live(pane))
            .map(|ws| ws.id)
    }

    fn owner_mut(&mut self, pane: PaneId) -> Option<&mut PaneManager> {
        self.workspaces
            .iter_mut()
            .find(|ws| ws.panes.is_live(pane))
            .map(|ws| &mut ws.panes)
    }

    pub fn is_live(&self, pane: PaneId) -> bool {
        self.workspace_of(pane).is_some()
    }

    pub fn dispose_pane(&mut self, pane: PaneId) -> bool {
        self.owner_mut(pane).is_some_and(|pm| pm.dispose_pane(pane))
    }

    pub fn request_focus(&mut self, pane: PaneId) -> FocusOutcome {
        match self.owner_mut(pane) {
            Some(pm) => pm.request_focus(pane),
            None => FocusOutcome::Refused(Refusal::NotLive(pane)),
        }
    }

    pub fn schedule_focus(&mut self, pane: PaneId) -> Option<TaskId> {
        self.owner_mut(pane)?.schedule_focus(pane)
    }

    pub fn set_focusable(&mut self, pane: PaneId, focusable: bool) -> bool {
        self.owner_mut(pane).is_some_and(|pm| pm.set_focusable(pane, focusable))
    }

    pub fn set_default_pane(&mut self, workspace: WorkspaceId, pane: Option<PaneId>) -> bool {
        self.workspace_mut(workspace)
            .is_some_and(|ws| ws.panes.set_default_pane(pane))
    }

    pub fn focus_next(&mut self) -> FocusOutcome {
        match self.active_mut() {
            Some(ws) => ws.panes.focus_next(),
            None => FocusOutcome::Refused(Refusal::NoCandidate),
        }
    }

    pub fn focus_prev(&mut self) -> FocusOutcome {
        match self.active_mut() {
            Some(ws) => ws.panes.focus_prev(),
            None => FocusOutcome::Refused(Refusal::NoCandidate),
        }
    }

    pub fn focused_pane(&self) -> Option<PaneId> {
        self.active_workspace()?.panes.focused_pane()
    }

    pub fn is_focused(&self, pane: PaneId) -> bool {
        self.focused_pane() == Some(pane)
    }

    /// Runs every deferred task queued so far, in priority order.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.services.scheduler.pop_next() {
            match self.workspace_mut(task.workspace) {
                Some(ws) => {
                    ws.panes.execute(&task);
                }
                None => {
                    debug!(task = task.id, workspace = task.workspace, "workspace gone, task skipped");
                    self.services.scheduler.record(TaskOutcome::SkippedDead);
                }
            }
            ran += 1;
        }
        ran
    }

    // -- input -------------------------------------------------------------

    pub fn context_stack(&self) -> Vec<ContextTag> {
        match self.active_workspace() {
            Some(ws) => ws.panes.context_stack(),
            None => vec![ContextTag::global()],
        }
    }

    /// Routes a key: a binding in the current context stack wins, otherwise
    /// the focused pane gets the key.
    pub fn dispatch_key(&mut self, event: &KeyEvent) -> KeyDispatch {
        let stack = self.context_stack();
        if let Some(action) = self.resolver.resolve_event(&stack, event).cloned() {
            debug!(combo = %event.combo, action = action.name(), repeat = event.repeat, "shortcut resolved");
            return match action {
                Action::FocusNext => {
                    self.focus_next();
                    KeyDispatch::Performed(action)
                }
                Action::FocusPrev => {
                    self.focus_prev();
                    KeyDispatch::Performed(action)
                }
                Action::NextWorkspace => {
                    self.next_workspace();
                    KeyDispatch::Performed(action)
                }
                Action::PrevWorkspace => {
                    self.prev_workspace();
                    KeyDispatch::Performed(action)
                }
                Action::ClosePane => {
                    if let Some(pane) = self.focused_pane() {
                        self.dispose_pane(pane);
                    }
                    KeyDispatch::Performed(action)
                }
                Action::Custom(_) => KeyDispatch::Action(action),
            };
        }
        match self.active_mut().and_then(|ws| ws.panes.forward_key(event)) {
            Some((pane, true)) => KeyDispatch::Forwarded(pane),
            _ => KeyDispatch::Unhandled,
        }
    }

    // -- snapshots ---------------------------------------------------------

    /// Every live pane of every workspace, whatever its kind.
    pub fn save_snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            version: self.migrator.current_version(),
            app_state: self.app_state.clone(),
            workspaces: self.workspaces.iter().map(Workspace::to_state).collect(),
            active_workspace: self.active,
        }
    }

    /// Replaces all state with `raw` after migrating it. On error the current
    /// state is left untouched.
    pub fn restore_value(&mut self, raw: Value) -> Result<(), SnapshotError> {
        let snapshot = WorkspaceSnapshot::from_value(raw, self.migrator.as_ref())?;
        self.apply(snapshot);
        Ok(())
    }

    pub fn restore_snapshot(&mut self, snapshot: WorkspaceSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version == self.migrator.current_version() {
            snapshot.validate()?;
            self.apply(snapshot);
            Ok(())
        } else {
            self.restore_value(snapshot.to_value()?)
        }
    }

    fn apply(&mut self, snapshot: WorkspaceSnapshot) {
        let mut rebuilt = Vec::with_capacity(snapshot.workspaces.len());
        for state in &snapshot.workspaces {
            let mut panes = PaneManager::new(state.id, self.services.clone(), self.history_depth);
            for pane in &state.panes {
                let content = self.factory.build(&pane.kind, &pane.state);
                panes.insert_silent(pane.id, pane.title.clone(), pane.focusable, content);
            }
            if !panes.set_default_pane(state.default_pane) {
                warn!(workspace = state.id, pane = ?state.default_pane, "default pane not in snapshot");
            }
            panes.restore_history(&state.focus_history);
            panes.remember_focus(state.focused_pane);
            let mut ws = Workspace::new(state.id, state.name.clone(), panes);
            ws.custom = state.custom.clone();
            rebuilt.push(ws);
        }

        if let Some(ws) = self.active_mut() {
            let id = ws.id;
            ws.panes.deactivate();
            self.services.bus.publish(&Event::WorkspaceDeactivated { workspace: id });
        }
        self.active = None;
        for mut ws in self.workspaces.drain(..) {
            ws.panes.dispose_all();
        }

        let (next_ws, next_pane) = snapshot.next_ids();
        self.next_workspace_id = self.next_workspace_id.max(next_ws);
        self.next_pane_id = self.next_pane_id.max(next_pane);
        self.workspaces = rebuilt;
        self.app_state = snapshot.app_state;

        let target = snapshot
            .active_workspace
            .or_else(|| self.workspaces.first().map(|ws| ws.id));
        if let Some(target) = target {
            self.switch_to(target);
        }
        info!(
            workspaces = self.workspaces.len(),
            panes = snapshot.workspaces.iter().map(|ws| ws.panes.len()).sum::<usize>(),
            "snapshot restored"
        );
        self.dirty.set(false);
    }

    /// Saves through `store` and clears the dirty flag.
    pub fn persist(&mut self, store: &mut dyn SnapshotStore) -> Result<(), SnapshotError> {
        store.save(&self.save_snapshot())?;
        self.dirty.set(false);
        Ok(())
    }

    /// Restores from `store`. Returns false when it holds nothing yet.
    pub fn load(&mut self, store: &dyn SnapshotStore) -> Result<bool, SnapshotError> {
        match store.load()? {
            Some(raw) => {
                self.restore_value(raw)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// True when anything observable changed since the last persist or restore.
    pub fn needs_persist(&self) -> bool {
        self.dirty.get()
    }
}

impl Default for WorkspaceManager {
    fn default() -> Self {
        Self::new(FocusServices::default())
    }
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("workspaces", &self.workspaces)
            .field("active", &self.active)
            .field("next_pane_id", &self.next_pane_id)
            .field("dirty", &self.dirty.get())
            .finish_non_exhaustive()
    }
}
