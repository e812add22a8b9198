//! Per-workspace pane ownership and the authoritative focus state.
//!
//! Every focus change, whether requested directly, by Tab navigation, by a
//! restore or by activation, goes through `apply_focus`, which updates the
//! pane flags, the focus indicator, focus history and the bus together.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{Pane, PaneContent, PaneId};
use crate::bus::Owner;
use crate::event::Event;
use crate::history::FocusHistory;
use crate::scheduler::{DeferredTask, FocusTask, TaskId, TaskOutcome};
use crate::services::FocusServices;
use crate::shortcut::{ContextTag, KeyEvent};
use crate::workspace::WorkspaceId;

/// Why a focus operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NotLive(PaneId),
    NotFocusable(PaneId),
    WorkspaceInactive(WorkspaceId),
    UnknownWorkspace(WorkspaceId),
    /// No live, focus-capable pane to move to
    NoCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    Changed {
        previous: Option<PaneId>,
        current: PaneId,
    },
    /// The pane already had focus
    Unchanged(PaneId),
    Refused(Refusal),
}

impl FocusOutcome {
    pub fn is_refused(&self) -> bool {
        matches!(self, FocusOutcome::Refused(_))
    }

    /// The pane holding focus after the operation, if it succeeded.
    pub fn focused(&self) -> Option<PaneId> {
        match self {
            FocusOutcome::Changed { current, .. } => Some(*current),
            FocusOutcome::Unchanged(pane) => Some(*pane),
            FocusOutcome::Refused(_) => None,
        }
    }
}

pub struct PaneManager {
    workspace: WorkspaceId,
    panes: BTreeMap<PaneId, Pane>,
    /// Tab order
    order: Vec<PaneId>,
    active_pane: Option<PaneId>,
    default_pane: Option<PaneId>,
    history: FocusHistory,
    activated: bool,
    services: FocusServices,
}

impl PaneManager {
    pub fn new(workspace: WorkspaceId, services: FocusServices, history_depth: usize) -> Self {
        Self {
            workspace,
            panes: BTreeMap::new(),
            order: Vec::new(),
            active_pane: None,
            default_pane: None,
            history: FocusHistory::new(history_depth),
            activated: false,
            services,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace
    }

    /// Adds a pane at the end of the tab order. Returns false if `id` is taken.
    pub fn insert_pane(
        &mut self,
        id: PaneId,
        title: impl Into<String>,
        focusable: bool,
        content: Box<dyn PaneContent>,
    ) -> bool {
        if !self.insert_silent(id, title.into(), focusable, content) {
            return false;
        }
        debug!(workspace = self.workspace, pane = id, "pane opened");
        self.services.bus.publish(&Event::PaneOpened {
            workspace: self.workspace,
            pane: id,
        });
        true
    }

    /// Inserts without announcing it, for panes rebuilt from a snapshot.
    pub(crate) fn insert_silent(
        &mut self,
        id: PaneId,
        title: String,
        focusable: bool,
        content: Box<dyn PaneContent>,
    ) -> bool {
        if self.panes.contains_key(&id) {
            warn!(workspace = self.workspace, pane = id, "pane id already in use");
            return false;
        }
        self.panes.insert(id, Pane::new(id, title, focusable, content));
        self.order.push(id);
        true
    }

    pub fn is_live(&self, id: PaneId) -> bool {
        self.panes.contains_key(&id)
    }

    fn is_candidate(&self, id: PaneId) -> bool {
        self.panes.get(&id).is_some_and(Pane::is_focusable)
    }

    pub fn pane(&self, id: PaneId) -> Option<&Pane> {
        self.panes.get(&id)
    }

    pub fn pane_mut(&mut self, id: PaneId) -> Option<&mut Pane> {
        self.panes.get_mut(&id)
    }

    /// Panes in tab order.
    pub fn panes(&self) -> impl Iterator<Item = &Pane> {
        self.order.iter().filter_map(|id| self.panes.get(id))
    }

    pub fn pane_ids(&self) -> &[PaneId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// The authoritative active pane. While the workspace is inactive this is
    /// the pane to return to on activation.
    pub fn active_pane(&self) -> Option<PaneId> {
        self.active_pane
    }

    /// The pane holding input focus right now.
    pub fn focused_pane(&self) -> Option<PaneId> {
        if self.activated {
            self.active_pane
        } else {
            None
        }
    }

    pub fn is_focused(&self, id: PaneId) -> bool {
        self.focused_pane() == Some(id)
    }

    pub fn history(&self) -> &FocusHistory {
        &self.history
    }

    pub fn default_pane(&self) -> Option<PaneId> {
        self.default_pane
    }

    pub fn set_default_pane(&mut self, id: Option<PaneId>) -> bool {
        if let Some(id) = id {
            if !self.is_live(id) {
                return false;
            }
        }
        self.default_pane = id;
        true
    }

    /// Last resort focus target: the designated default pane, else the lowest
    /// live focus-capable pane id.
    pub fn fallback_pane(&self) -> Option<PaneId> {
        self.default_pane
            .filter(|id| self.is_candidate(*id))
            .or_else(|| {
                self.panes
                    .values()
                    .find(|p| p.is_focusable())
                    .map(Pane::id)
            })
    }

    pub fn request_focus(&mut self, id: PaneId) -> FocusOutcome {
        if !self.activated {
            return FocusOutcome::Refused(Refusal::WorkspaceInactive(self.workspace));
        }
        match self.panes.get(&id) {
            None => FocusOutcome::Refused(Refusal::NotLive(id)),
            Some(pane) if !pane.is_focusable() => FocusOutcome::Refused(Refusal::NotFocusable(id)),
            Some(_) => self.apply_focus(id),
        }
    }

    /// Tab: next focus-capable pane in tab order, wrapping.
    pub fn focus_next(&mut self) -> FocusOutcome {
        self.cycle(true)
    }

    /// Shift-Tab: previous focus-capable pane in tab order, wrapping.
    pub fn focus_prev(&mut self) -> FocusOutcome {
        self.cycle(false)
    }

    fn cycle(&mut self, forward: bool) -> FocusOutcome {
        if !self.activated {
            return FocusOutcome::Refused(Refusal::WorkspaceInactive(self.workspace));
        }
        let len = self.order.len();
        if len == 0 {
            return FocusOutcome::Refused(Refusal::NoCandidate);
        }
        let start = self
            .active_pane
            .and_then(|active| self.order.iter().position(|&id| id == active));
        let target = (1..=len)
            .map(|step| match (start, forward) {
                (Some(pos), true) => (pos + step) % len,
                (Some(pos), false) => (pos + len - step % len) % len,
                (None, true) => step - 1,
                (None, false) => len - step,
            })
            .map(|idx| self.order[idx])
            .find(|&id| self.is_candidate(id));
        match target {
            Some(id) => self.apply_focus(id),
            None => FocusOutcome::Refused(Refusal::NoCandidate),
        }
    }

    /// Moves focus back to a sensible pane, checking liveness now rather
    /// than when the restore was requested. Tries `preferred`, then focus
    /// history, then the fallback pane.
    ///
    /// A focus-capable active pane wins over all of them: whatever focused it
    /// happened after the restore was requested.
    pub fn restore_focus(&mut self, preferred: Option<PaneId>) -> FocusOutcome {
        if !self.activated {
            return FocusOutcome::Refused(Refusal::WorkspaceInactive(self.workspace));
        }
        if let Some(active) = self.active_pane.filter(|id| self.is_candidate(*id)) {
            debug!(workspace = self.workspace, active, "focus already settled, restore is a no-op");
            return FocusOutcome::Unchanged(active);
        }
        if let Some(pane) = preferred {
            if self.is_candidate(pane) {
                return self.apply_focus(pane);
            }
            debug!(workspace = self.workspace, pane, "preferred restore target is gone");
        }

        let panes = &self.panes;
        let from_history = self.history.pop_next_target(
            |id| panes.contains_key(&id),
            |id| panes.get(&id).is_some_and(Pane::is_focusable),
        );
        if let Some(target) = from_history {
            return self.apply_focus(target);
        }
        match self.fallback_pane() {
            Some(target) => self.apply_focus(target),
            None => {
                self.clear_active();
                FocusOutcome::Refused(Refusal::NoCandidate)
            }
        }
    }

    pub fn schedule_restore_focus(&self, preferred: Option<PaneId>) -> Option<TaskId> {
        self.services.scheduler.schedule_restore(self.workspace, preferred)
    }

    /// Queues focus for `pane` after layout settles.
    pub fn schedule_focus(&self, pane: PaneId) -> Option<TaskId> {
        if !self.is_live(pane) {
            return None;
        }
        Some(self.services.scheduler.schedule_focus(self.workspace, pane))
    }

    /// Runs a deferred task, re-validating everything it refers to first.
    pub fn execute(&mut self, task: &DeferredTask) -> TaskOutcome {
        let outcome = if task.workspace != self.workspace || !self.activated {
            debug!(task = task.id, workspace = task.workspace, "deferred task target inactive, skipped");
            TaskOutcome::SkippedDead
        } else {
            match task.task {
                FocusTask::RestoreFocus { preferred } => match self.restore_focus(preferred) {
                    FocusOutcome::Refused(reason) => {
                        debug!(task = task.id, ?reason, "deferred restore found nothing to focus");
                        TaskOutcome::NoTarget
                    }
                    _ => TaskOutcome::Ran,
                },
                FocusTask::Focus { pane } if !self.is_live(pane) => {
                    debug!(task = task.id, pane, "deferred focus target is gone, skipped");
                    TaskOutcome::SkippedDead
                }
                FocusTask::Focus { pane } => match self.request_focus(pane) {
                    FocusOutcome::Refused(reason) => {
                        debug!(task = task.id, ?reason, "deferred focus refused");
                        TaskOutcome::NoTarget
                    }
                    _ => TaskOutcome::Ran,
                },
            }
        };
        self.services.scheduler.record(outcome);
        outcome
    }

    /// Drains this workspace's deferred tasks.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.services.scheduler.pop_next_for(self.workspace) {
            self.execute(&task);
            ran += 1;
        }
        ran
    }

    /// Destroys a pane. Pending tasks and subscriptions owned by the pane are
    /// dropped first; if it had focus, a restore is scheduled for a later turn.
    pub fn dispose_pane(&mut self, id: PaneId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.services.scheduler.cancel_pane(id);
        self.history.remove(id);
        self.services.bus.unsubscribe_owner(&Owner::Pane(id));

        let pane = self.panes.remove(&id);
        self.order.retain(|&p| p != id);
        if self.default_pane == Some(id) {
            self.default_pane = None;
        }
        if self.active_pane == Some(id) {
            self.active_pane = None;
            if self.activated {
                self.services.indicator.set_focus_indicator(id, false);
                self.schedule_restore_focus(None);
            }
        }
        debug!(workspace = self.workspace, pane = id, "pane disposed");
        self.services.bus.publish(&Event::PaneDisposed {
            workspace: self.workspace,
            pane: id,
        });
        drop(pane);
        self.reconcile_focus_flags();
        true
    }

    /// Disposes every pane and drops workspace-owned subscriptions.
    pub fn dispose_all(&mut self) -> Vec<PaneId> {
        self.services.scheduler.cancel_workspace(self.workspace);
        let ids = self.order.clone();
        for id in &ids {
            self.dispose_pane(*id);
        }
        // Restores scheduled by the loop above are moot.
        self.services.scheduler.cancel_workspace(self.workspace);
        self.services.bus.unsubscribe_owner(&Owner::Workspace(self.workspace));
        self.history.clear();
        ids
    }

    /// Turns focus capability on or off. Disabling the active pane drops focus
    /// and schedules a restore.
    pub fn set_focusable(&mut self, id: PaneId, focusable: bool) -> bool {
        let Some(pane) = self.panes.get_mut(&id) else {
            return false;
        };
        pane.set_focusable(focusable);
        if !focusable && self.active_pane == Some(id) {
            self.clear_active();
            if self.activated {
                self.schedule_restore_focus(None);
            }
        }
        true
    }

    /// Makes this the input-owning workspace and focuses its remembered pane,
    /// or the best fallback.
    pub fn activate(&mut self) -> FocusOutcome {
        if self.activated {
            return match self.active_pane {
                Some(active) => FocusOutcome::Unchanged(active),
                None => self.restore_focus(None),
            };
        }
        self.activated = true;
        let remembered = self.active_pane.take();
        let target = match remembered.filter(|id| self.is_candidate(*id)) {
            Some(id) => Some(id),
            None => {
                let panes = &self.panes;
                self.history
                    .pop_next_target(
                        |id| panes.contains_key(&id),
                        |id| panes.get(&id).is_some_and(Pane::is_focusable),
                    )
                    .or_else(|| self.fallback_pane())
            }
        };
        match target {
            Some(id) => self.apply_focus(id),
            None => FocusOutcome::Refused(Refusal::NoCandidate),
        }
    }

    /// Gives up input focus. Deferred focus work for this workspace is
    /// cancelled; the active pane is remembered for the next activation.
    pub fn deactivate(&mut self) -> usize {
        if !self.activated {
            return 0;
        }
        let cancelled = self.services.scheduler.cancel_workspace(self.workspace);
        if let Some(active) = self.active_pane {
            if let Some(pane) = self.panes.get_mut(&active) {
                pane.set_focused(false);
            }
            self.services.indicator.set_focus_indicator(active, false);
        }
        self.activated = false;
        self.reconcile_focus_flags();
        cancelled
    }

    /// Shortcut contexts for the current focus, innermost first.
    pub fn context_stack(&self) -> Vec<ContextTag> {
        let mut stack = Vec::new();
        if let Some(pane) = self.focused_pane().and_then(|id| self.panes.get(&id)) {
            stack.extend(pane.content().context_tags());
            stack.push(ContextTag::pane_kind(pane.kind()));
        }
        stack.push(ContextTag::workspace());
        stack.push(ContextTag::global());
        stack
    }

    /// Hands a key to the focused pane. Returns the pane and whether it
    /// consumed the key.
    pub fn forward_key(&mut self, event: &KeyEvent) -> Option<(PaneId, bool)> {
        let id = self.focused_pane()?;
        let pane = self.panes.get_mut(&id)?;
        Some((id, pane.content_mut().handle_key(event)))
    }

    /// Re-asserts the authoritative focus state onto any pane whose own flag
    /// disagrees. Returns the number of corrections.
    pub fn reconcile_focus_flags(&mut self) -> usize {
        if let Some(active) = self.active_pane {
            if !self.panes.contains_key(&active) {
                warn!(workspace = self.workspace, pane = active, "active pane is not live, clearing");
                self.active_pane = None;
            }
        }
        let expected = self.focused_pane();
        let mut corrected = 0;
        for (id, pane) in self.panes.iter_mut() {
            let should = expected == Some(*id);
            if pane.has_focus() != should {
                warn!(
                    workspace = self.workspace,
                    pane = *id,
                    reported = pane.has_focus(),
                    "pane focus flag disagreed with pane manager, correcting"
                );
                pane.set_focused(should);
                self.services.indicator.set_focus_indicator(*id, should);
                corrected += 1;
            }
        }
        corrected
    }

    /// Rebuilds history from ids ordered most recent first.
    pub(crate) fn restore_history(&mut self, panes: &[PaneId]) {
        self.history.clear();
        for id in panes.iter().rev().filter(|id| self.panes.contains_key(id)) {
            self.history.record_losing_focus(*id);
        }
    }

    /// Sets the pane to focus on the next activation.
    pub(crate) fn remember_focus(&mut self, id: Option<PaneId>) {
        if !self.activated {
            self.active_pane = id.filter(|id| self.panes.contains_key(id));
        }
    }

    fn clear_active(&mut self) {
        if let Some(active) = self.active_pane.take() {
            if let Some(pane) = self.panes.get_mut(&active) {
                pane.set_focused(false);
            }
            if self.activated {
                self.services.indicator.set_focus_indicator(active, false);
            }
        }
    }

    fn apply_focus(&mut self, target: PaneId) -> FocusOutcome {
        let previous = self.active_pane;
        if previous == Some(target) {
            self.reconcile_focus_flags();
            return FocusOutcome::Unchanged(target);
        }
        if let Some(prev) = previous {
            if let Some(pane) = self.panes.get_mut(&prev) {
                pane.set_focused(false);
                self.services.indicator.set_focus_indicator(prev, false);
            }
            self.history.record_losing_focus(prev);
        }
        self.active_pane = Some(target);
        if let Some(pane) = self.panes.get_mut(&target) {
            pane.set_focused(true);
        }
        self.services.indicator.set_focus_indicator(target, true);
        debug!(workspace = self.workspace, ?previous, current = target, "focus changed");
        self.services.bus.publish(&Event::FocusChanged {
            workspace: self.workspace,
            previous,
            current: target,
        });
        self.reconcile_focus_flags();
        FocusOutcome::Changed {
            previous,
            current: target,
        }
    }
}

impl std::fmt::Debug for PaneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaneManager")
            .field("workspace", &self.workspace)
            .field("order", &self.order)
            .field("active_pane", &self.active_pane)
            .field("activated", &self.activated)
            .field("history", &self.history.panes())
            .finish()
    }
}
