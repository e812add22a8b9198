//! Synchronous publish/subscribe channel between panes, focus and workspace
//! management.
//!
//! Delivery uses snapshot semantics: a publish reaches the handlers that were
//! registered when it started, in registration order. Handlers added while a
//! publish is running wait for the next one; handlers removed while it runs
//! are skipped if they have not been invoked yet.
//!
//! Subscriptions are tied to an [`Owner`]. Code that owns subscriptions should
//! hold them in a [`ScopedSubscription`] or [`SubscriptionScope`] so dropping
//! the owner unregisters them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::event::{Event, Topic};
use crate::pane::PaneId;
use crate::workspace::WorkspaceId;

pub type HandlerResult = anyhow::Result<()>;

type Handler = Rc<RefCell<dyn FnMut(&Event) -> HandlerResult>>;

/// Identity of whoever registered a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Pane(PaneId),
    Workspace(WorkspaceId),
    Service(&'static str),
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Pane(id) => write!(f, "pane:{id}"),
            Owner::Workspace(id) => write!(f, "workspace:{id}"),
            Owner::Service(name) => write!(f, "service:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Result of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscription {
    id: u64,
    owner: Owner,
    // Cleared on unsubscribe so an in-flight publish skips the handler.
    live: Rc<Cell<bool>>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    topics: HashMap<Topic, Vec<Subscription>>,
}

impl BusInner {
    fn remove(&mut self, handle: SubscriptionHandle) -> bool {
        let Some(subs) = self.topics.get_mut(&handle.topic) else {
            return false;
        };
        let Some(pos) = subs.iter().position(|s| s.id == handle.id) else {
            return false;
        };
        let sub = subs.remove(pos);
        sub.live.set(false);
        true
    }
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, owner: Owner, handler: F) -> SubscriptionHandle
    where
        F: FnMut(&Event) -> HandlerResult + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        trace!(%topic, %owner, id, "subscribe");
        inner.topics.entry(topic).or_default().push(Subscription {
            id,
            owner,
            live: Rc::new(Cell::new(true)),
            handler: Rc::new(RefCell::new(handler)),
        });
        SubscriptionHandle { id, topic }
    }

    /// Like [`subscribe`](Self::subscribe), but the returned guard
    /// unsubscribes when dropped.
    pub fn subscribe_scoped<F>(&self, topic: Topic, owner: Owner, handler: F) -> ScopedSubscription
    where
        F: FnMut(&Event) -> HandlerResult + 'static,
    {
        let handle = self.subscribe(topic, owner, handler);
        ScopedSubscription {
            bus: Rc::downgrade(&self.inner),
            handle: Some(handle),
        }
    }

    /// Removes a subscription. Returns false when it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.borrow_mut().remove(handle)
    }

    /// Removes every subscription registered by `owner`.
    pub fn unsubscribe_owner(&self, owner: &Owner) -> usize {
        let mut inner = self.inner.borrow_mut();
        let mut removed = 0;
        for subs in inner.topics.values_mut() {
            subs.retain(|s| {
                if &s.owner == owner {
                    s.live.set(false);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        if removed > 0 {
            trace!(%owner, removed, "owner subscriptions dropped");
        }
        removed
    }

    pub fn publish(&self, event: &Event) -> PublishReport {
        let topic = event.topic();
        let snapshot: Vec<(u64, Rc<Cell<bool>>, Handler)> = {
            let inner = self.inner.borrow();
            match inner.topics.get(&topic) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.id, Rc::clone(&s.live), Rc::clone(&s.handler)))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut report = PublishReport::default();
        for (id, live, handler) in snapshot {
            if !live.get() {
                continue;
            }
            let Ok(mut handler) = handler.try_borrow_mut() else {
                warn!(%topic, id, "handler is already running, skipping re-entrant delivery");
                report.failed += 1;
                continue;
            };
            match (&mut *handler)(event) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(%topic, id, "event handler failed: {err:#}");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .borrow()
            .topics
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn owner_subscription_count(&self, owner: &Owner) -> usize {
        self.inner
            .borrow()
            .topics
            .values()
            .flatten()
            .filter(|s| &s.owner == owner)
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        let counts: HashMap<Topic, usize> = inner
            .topics
            .iter()
            .map(|(topic, subs)| (*topic, subs.len()))
            .collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

/// Subscription guard that unsubscribes on drop.
///
/// Holds the bus weakly, so a guard outliving its bus is harmless.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct ScopedSubscription {
    bus: Weak<RefCell<BusInner>>,
    handle: Option<SubscriptionHandle>,
}

impl ScopedSubscription {
    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.handle
    }

    /// Keeps the subscription registered after the guard is dropped.
    pub fn detach(mut self) -> Option<SubscriptionHandle> {
        self.handle.take()
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(bus) = self.bus.upgrade() {
            bus.borrow_mut().remove(handle);
        }
    }
}

impl std::fmt::Debug for ScopedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSubscription")
            .field("handle", &self.handle)
            .finish()
    }
}

/// A set of scoped subscriptions released together, typically stored as a
/// field of the subscribing owner.
#[derive(Debug, Default)]
pub struct SubscriptionScope {
    subscriptions: Vec<ScopedSubscription>,
}

impl SubscriptionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: ScopedSubscription) {
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Unsubscribes everything now rather than at drop.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus_event(current: PaneId) -> Event {
        Event::FocusChanged {
            workspace: 1,
            previous: None,
            current,
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&'static str) -> Box<dyn FnMut(&Event) -> HandlerResult>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |name: &'static str| {
            let sink = Rc::clone(&sink);
            Box::new(move |_: &Event| {
                sink.borrow_mut().push(name.to_string());
                Ok(())
            }) as Box<dyn FnMut(&Event) -> HandlerResult>
        };
        (log, make)
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(Topic::FocusChanged, Owner::Service("a"), make("a"));
        bus.subscribe(Topic::FocusChanged, Owner::Service("b"), make("b"));
        bus.subscribe(Topic::PaneOpened, Owner::Service("c"), make("c"));

        let report = bus.publish(&focus_event(1));
        assert_eq!(report.delivered, 2);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(Topic::FocusChanged, Owner::Service("bad"), |_| {
            anyhow::bail!("boom")
        });
        bus.subscribe(Topic::FocusChanged, Owner::Service("good"), make("good"));

        let report = bus.publish(&focus_event(1));
        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert_eq!(*log.borrow(), vec!["good"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let handle = bus.subscribe(Topic::FocusChanged, Owner::Service("a"), make("a"));
        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        bus.publish(&focus_event(1));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn handler_added_during_publish_waits_for_next_publish() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let late = Rc::new(RefCell::new(Some(make("late"))));
        let bus_inner = bus.clone();
        bus.subscribe(Topic::FocusChanged, Owner::Service("adder"), move |_| {
            if let Some(handler) = late.borrow_mut().take() {
                bus_inner.subscribe(Topic::FocusChanged, Owner::Service("late"), handler);
            }
            Ok(())
        });

        bus.publish(&focus_event(1));
        assert!(log.borrow().is_empty());
        bus.publish(&focus_event(2));
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    #[test]
    fn handler_removed_during_publish_is_skipped() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let victim: Rc<Cell<Option<SubscriptionHandle>>> = Rc::new(Cell::new(None));
        let victim_ref = Rc::clone(&victim);
        let bus_inner = bus.clone();
        bus.subscribe(Topic::FocusChanged, Owner::Service("remover"), move |_| {
            if let Some(handle) = victim_ref.get() {
                bus_inner.unsubscribe(handle);
            }
            Ok(())
        });
        victim.set(Some(bus.subscribe(
            Topic::FocusChanged,
            Owner::Service("victim"),
            make("victim"),
        )));

        let report = bus.publish(&focus_event(1));
        assert_eq!(report.delivered, 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn scoped_subscription_unsubscribes_on_drop() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        {
            let _scoped = bus.subscribe_scoped(Topic::FocusChanged, Owner::Pane(3), make("pane"));
            bus.publish(&focus_event(1));
        }
        bus.publish(&focus_event(2));
        assert_eq!(*log.borrow(), vec!["pane"]);
        assert_eq!(bus.subscriber_count(Topic::FocusChanged), 0);
    }

    #[test]
    fn scope_releases_all_subscriptions() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let mut scope = SubscriptionScope::new();
        scope.push(bus.subscribe_scoped(Topic::FocusChanged, Owner::Workspace(1), make("a")));
        scope.push(bus.subscribe_scoped(Topic::PaneOpened, Owner::Workspace(1), make("b")));
        assert_eq!(bus.owner_subscription_count(&Owner::Workspace(1)), 2);

        drop(scope);
        bus.publish(&focus_event(1));
        assert!(log.borrow().is_empty());
        assert_eq!(bus.owner_subscription_count(&Owner::Workspace(1)), 0);
    }

    #[test]
    fn unsubscribe_owner_removes_across_topics() {
        let bus = EventBus::new();
        let (_log, make) = recorder();
        bus.subscribe(Topic::FocusChanged, Owner::Pane(9), make("a"));
        bus.subscribe(Topic::PaneDisposed, Owner::Pane(9), make("b"));
        bus.subscribe(Topic::PaneDisposed, Owner::Pane(10), make("c"));

        assert_eq!(bus.unsubscribe_owner(&Owner::Pane(9)), 2);
        assert_eq!(bus.subscriber_count(Topic::PaneDisposed), 1);
    }

    #[test]
    fn scoped_guard_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let scoped = bus.subscribe_scoped(Topic::FocusChanged, Owner::Service("x"), |_| Ok(()));
        drop(bus);
        drop(scoped);
    }
}
