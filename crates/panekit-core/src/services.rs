use std::rc::Rc;

use crate::bus::EventBus;
use crate::pane::{FocusIndicator, NullIndicator};
use crate::scheduler::Scheduler;

/// Collaborators shared by every pane and workspace manager.
///
/// Built once at startup and handed to each component; clones share the same
/// bus, scheduler and indicator.
#[derive(Clone)]
pub struct FocusServices {
    pub bus: EventBus,
    pub scheduler: Scheduler,
    pub indicator: Rc<dyn FocusIndicator>,
}

impl FocusServices {
    pub fn new(indicator: Rc<dyn FocusIndicator>) -> Self {
        Self {
            bus: EventBus::new(),
            scheduler: Scheduler::new(),
            indicator,
        }
    }
}

impl Default for FocusServices {
    fn default() -> Self {
        Self::new(Rc::new(NullIndicator))
    }
}

impl std::fmt::Debug for FocusServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusServices")
            .field("bus", &self.bus)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
