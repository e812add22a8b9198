use std::collections::VecDeque;

use tracing::trace;

use crate::pane::PaneId;

/// Depth used when the configuration does not say otherwise.
pub const DEFAULT_HISTORY_DEPTH: usize = 32;

/// A pane that lost focus, and when.
///
/// Only the identity is stored; whether the pane still exists must be asked
/// of its pane manager every time the entry is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusHistoryEntry {
    pub pane: PaneId,
    /// Monotonic counter value at the time focus was lost
    pub order: u64,
}

/// Most-recent-first stack of panes that previously held focus.
#[derive(Debug, Clone)]
pub struct FocusHistory {
    entries: VecDeque<FocusHistoryEntry>,
    depth: usize,
    next_order: u64,
}

impl FocusHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            depth: depth.max(1),
            next_order: 0,
        }
    }

    /// Moves `pane` to the front, evicting the oldest entry past the depth bound.
    pub fn record_losing_focus(&mut self, pane: PaneId) {
        self.entries.retain(|e| e.pane != pane);
        self.entries.push_front(FocusHistoryEntry {
            pane,
            order: self.next_order,
        });
        self.next_order += 1;
        while self.entries.len() > self.depth {
            if let Some(evicted) = self.entries.pop_back() {
                trace!(pane = evicted.pane, "focus history entry evicted");
            }
        }
    }

    /// Returns the most recent live pane, leaving it in place.
    ///
    /// Entries found dead on the way are dropped for good.
    pub fn pop_next_live_target(&mut self, is_live: impl Fn(PaneId) -> bool) -> Option<PaneId> {
        self.pop_next_target(is_live, |_| true)
    }

    /// Like [`pop_next_live_target`](Self::pop_next_live_target), but live
    /// panes rejected by `accept` are skipped and kept.
    pub fn pop_next_target(
        &mut self,
        is_live: impl Fn(PaneId) -> bool,
        accept: impl Fn(PaneId) -> bool,
    ) -> Option<PaneId> {
        let mut i = 0;
        while i < self.entries.len() {
            let pane = self.entries[i].pane;
            if !is_live(pane) {
                trace!(pane, "dead focus history entry purged");
                self.entries.remove(i);
                continue;
            }
            if accept(pane) {
                return Some(pane);
            }
            i += 1;
        }
        None
    }

    pub fn remove(&mut self, pane: PaneId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.pane != pane);
        before != self.entries.len()
    }

    pub fn contains(&self, pane: PaneId) -> bool {
        self.entries.iter().any(|e| e.pane == pane)
    }

    /// Pane ids, most recent first.
    pub fn panes(&self) -> Vec<PaneId> {
        self.entries.iter().map(|e| e.pane).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FocusHistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for FocusHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}
