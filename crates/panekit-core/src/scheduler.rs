//! Deferred focus work for later turns of the event loop.
//!
//! Tasks are plain data keyed by the workspace (and optionally the pane) they
//! refer to. They never hold the entities themselves: whoever runs a task
//! re-checks liveness first. Disposing a pane or workspace cancels its tasks
//! outright, except that a restore preferring a disposed pane is kept with
//! the preference dropped. The stats keep every outcome apart.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::pane::PaneId;
use crate::workspace::WorkspaceId;

/// Priority classes, drained in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Runs before the next input event is dispatched
    BeforeInput,
    /// Runs once the current layout pass has settled
    AfterLayout,
    Idle,
}

/// The one class every focus-related task uses, so a restore can never
/// overtake or trail a pending keystroke depending on who queued it.
pub const FOCUS_PRIORITY: Priority = Priority::AfterLayout;

pub type TaskId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusTask {
    /// Restore focus after the active pane went away; `preferred` is tried first.
    RestoreFocus { preferred: Option<PaneId> },
    /// Give focus to a pane once layout has settled
    Focus { pane: PaneId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTask {
    pub id: TaskId,
    pub priority: Priority,
    pub workspace: WorkspaceId,
    pub task: FocusTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Ran,
    /// Ran, but there was nothing it could focus
    NoTarget,
    /// The task's target was gone when it ran
    SkippedDead,
    /// Removed by disposal before it ran
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub ran: u64,
    pub no_target: u64,
    pub skipped_dead: u64,
    pub cancelled: u64,
    /// Restores whose preferred pane was disposed before they ran
    pub retargeted: u64,
    /// Restore requests refused because one was already pending
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct SchedulerInner {
    next_id: TaskId,
    queues: BTreeMap<Priority, VecDeque<DeferredTask>>,
    stats: SchedulerStats,
}

impl SchedulerInner {
    fn cancel_where(&mut self, reason: &str, pred: impl Fn(&DeferredTask) -> bool) -> usize {
        let mut cancelled = 0;
        for queue in self.queues.values_mut() {
            queue.retain(|task| {
                if pred(task) {
                    debug!(task = task.id, workspace = task.workspace, reason, "deferred task cancelled");
                    cancelled += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.stats.cancelled += cancelled as u64;
        cancelled
    }
}

/// Shared, cloneable task queue for the UI loop.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, priority: Priority, workspace: WorkspaceId, task: FocusTask) -> TaskId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        trace!(task = id, workspace, ?priority, ?task, "deferred task scheduled");
        inner.stats.scheduled += 1;
        inner
            .queues
            .entry(priority)
            .or_default()
            .push_back(DeferredTask {
                id,
                priority,
                workspace,
                task,
            });
        id
    }

    /// Schedules a focus restore for `workspace` unless one is already
    /// pending there. At most one restore per workspace is in flight.
    pub fn schedule_restore(&self, workspace: WorkspaceId, preferred: Option<PaneId>) -> Option<TaskId> {
        if self.restore_pending(workspace) {
            let mut inner = self.inner.borrow_mut();
            inner.stats.coalesced += 1;
            debug!(workspace, ?preferred, "focus restore already pending");
            return None;
        }
        Some(self.schedule(FOCUS_PRIORITY, workspace, FocusTask::RestoreFocus { preferred }))
    }

    pub fn schedule_focus(&self, workspace: WorkspaceId, pane: PaneId) -> TaskId {
        self.schedule(FOCUS_PRIORITY, workspace, FocusTask::Focus { pane })
    }

    pub fn restore_pending(&self, workspace: WorkspaceId) -> bool {
        self.inner.borrow().queues.values().flatten().any(|t| {
            t.workspace == workspace && matches!(t.task, FocusTask::RestoreFocus { .. })
        })
    }

    /// Next task in priority order, FIFO within a class.
    pub fn pop_next(&self) -> Option<DeferredTask> {
        let mut inner = self.inner.borrow_mut();
        inner.queues.values_mut().find_map(VecDeque::pop_front)
    }

    /// Next task of at most `max` priority.
    pub fn pop_next_up_to(&self, max: Priority) -> Option<DeferredTask> {
        let mut inner = self.inner.borrow_mut();
        inner
            .queues
            .range_mut(..=max)
            .find_map(|(_, queue)| queue.pop_front())
    }

    pub fn pop_next_for(&self, workspace: WorkspaceId) -> Option<DeferredTask> {
        let mut inner = self.inner.borrow_mut();
        inner.queues.values_mut().find_map(|queue| {
            let pos = queue.iter().position(|t| t.workspace == workspace)?;
            queue.remove(pos)
        })
    }

    /// Cancels focus tasks for `pane`. A pending restore that preferred it
    /// stays queued without a preference, since the workspace still needs
    /// focus restored.
    pub fn cancel_pane(&self, pane: PaneId) -> usize {
        let mut inner = self.inner.borrow_mut();
        let mut retargeted = 0;
        for task in inner.queues.values_mut().flatten() {
            if let FocusTask::RestoreFocus { preferred } = &mut task.task {
                if *preferred == Some(pane) {
                    debug!(task = task.id, workspace = task.workspace, pane, "restore target disposed, falling back");
                    *preferred = None;
                    retargeted += 1;
                }
            }
        }
        inner.stats.retargeted += retargeted;
        inner.cancel_where("pane disposed", |t| {
            matches!(t.task, FocusTask::Focus { pane: p } if p == pane)
        })
    }

    pub fn cancel_workspace(&self, workspace: WorkspaceId) -> usize {
        self.inner
            .borrow_mut()
            .cancel_where("workspace deactivated", |t| t.workspace == workspace)
    }

    pub fn record(&self, outcome: TaskOutcome) {
        let mut inner = self.inner.borrow_mut();
        match outcome {
            TaskOutcome::Ran => inner.stats.ran += 1,
            TaskOutcome::NoTarget => inner.stats.no_target += 1,
            TaskOutcome::SkippedDead => inner.stats.skipped_dead += 1,
            TaskOutcome::Cancelled => inner.stats.cancelled += 1,
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().queues.values().map(VecDeque::len).sum()
    }

    pub fn pending_for(&self, workspace: WorkspaceId) -> usize {
        self.inner
            .borrow()
            .queues
            .values()
            .flatten()
            .filter(|t| t.workspace == workspace)
            .count()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.borrow().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_by_priority_then_fifo() {
        let scheduler = Scheduler::new();
        let idle = scheduler.schedule(Priority::Idle, 1, FocusTask::Focus { pane: 1 });
        let first = scheduler.schedule(Priority::AfterLayout, 1, FocusTask::Focus { pane: 2 });
        let urgent = scheduler.schedule(Priority::BeforeInput, 1, FocusTask::Focus { pane: 3 });
        let second = scheduler.schedule(Priority::AfterLayout, 1, FocusTask::Focus { pane: 4 });

        let order: Vec<TaskId> = std::iter::from_fn(|| scheduler.pop_next()).map(|t| t.id).collect();
        assert_eq!(order, vec![urgent, first, second, idle]);
    }

    #[test]
    fn pop_up_to_leaves_lower_classes() {
        let scheduler = Scheduler::new();
        scheduler.schedule(Priority::Idle, 1, FocusTask::Focus { pane: 1 });
        scheduler.schedule_focus(1, 2);
        assert!(scheduler.pop_next_up_to(Priority::AfterLayout).is_some());
        assert!(scheduler.pop_next_up_to(Priority::AfterLayout).is_none());
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn only_one_restore_in_flight_per_workspace() {
        let scheduler = Scheduler::new();
        assert!(scheduler.schedule_restore(1, None).is_some());
        assert!(scheduler.schedule_restore(1, Some(4)).is_none());
        assert!(scheduler.schedule_restore(2, None).is_some());
        assert_eq!(scheduler.stats().coalesced, 1);

        scheduler.pop_next_for(1);
        assert!(scheduler.schedule_restore(1, None).is_some());
    }

    #[test]
    fn cancel_by_pane_and_workspace() {
        let scheduler = Scheduler::new();
        scheduler.schedule_restore(1, Some(5));
        scheduler.schedule_focus(2, 5);
        scheduler.schedule_focus(2, 6);
        scheduler.schedule_focus(3, 7);

        assert_eq!(scheduler.cancel_pane(5), 1);
        assert_eq!(scheduler.cancel_workspace(2), 1);
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.stats().cancelled, 2);
        assert_eq!(scheduler.stats().retargeted, 1);

        let restore = scheduler.pop_next_for(1).expect("restore kept");
        assert_eq!(restore.task, FocusTask::RestoreFocus { preferred: None });
    }

    #[test]
    fn focus_tasks_share_one_priority_class() {
        let scheduler = Scheduler::new();
        scheduler.schedule_restore(1, None);
        scheduler.schedule_focus(1, 2);
        let classes: Vec<Priority> = std::iter::from_fn(|| scheduler.pop_next()).map(|t| t.priority).collect();
        assert_eq!(classes, vec![FOCUS_PRIORITY, FOCUS_PRIORITY]);
    }
}
