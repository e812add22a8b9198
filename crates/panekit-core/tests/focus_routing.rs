use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use panekit_core::{
    Event, FocusHistory, FocusIndicator, FocusOutcome, FocusServices, Owner, PaneContent, PaneId,
    Refusal, Topic, WorkspaceManager,
};

#[derive(Default)]
struct Lamp {
    lit: RefCell<HashSet<PaneId>>,
}

impl FocusIndicator for Lamp {
    fn set_focus_indicator(&self, pane: PaneId, focused: bool) {
        let mut lit = self.lit.borrow_mut();
        if focused {
            lit.insert(pane);
        } else {
            lit.remove(&pane);
        }
    }
}

struct Widget(&'static str);

impl PaneContent for Widget {
    fn kind(&self) -> &str {
        self.0
    }
}

fn manager() -> (WorkspaceManager, Rc<Lamp>) {
    let lamp = Rc::new(Lamp::default());
    let manager = WorkspaceManager::new(FocusServices::new(lamp.clone()));
    (manager, lamp)
}

fn assert_single_focus(manager: &WorkspaceManager) {
    for ws in manager.workspaces() {
        let flagged: Vec<PaneId> = ws
            .panes()
            .panes()
            .filter(|p| p.has_focus())
            .map(|p| p.id())
            .collect();
        assert!(flagged.len() <= 1, "workspace {} flags {flagged:?}", ws.id());
        assert_eq!(flagged.first().copied(), ws.panes().focused_pane());
    }
}

#[test]
fn one_focused_pane_across_switches_and_disposal() {
    let (mut mgr, lamp) = manager();
    let one = mgr.add_workspace("one");
    let two = mgr.add_workspace("two");
    let a = mgr.open_pane(one, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(one, "b", true, Box::new(Widget("terminal"))).expect("pane");
    let c = mgr.open_pane(two, "c", true, Box::new(Widget("browser"))).expect("pane");
    mgr.run_pending();
    assert_single_focus(&mgr);

    mgr.request_focus(b);
    mgr.switch_to(two);
    assert_single_focus(&mgr);
    assert_eq!(*lamp.lit.borrow(), HashSet::from([c]));

    mgr.switch_to(one);
    assert!(mgr.is_focused(b));
    mgr.dispose_pane(b);
    assert_single_focus(&mgr);
    mgr.run_pending();
    assert!(mgr.is_focused(a));
    assert_eq!(*lamp.lit.borrow(), HashSet::from([a]));
}

#[test]
fn history_skips_and_purges_dead_entries() {
    let (a, b, c) = (1, 2, 3);
    let mut history = FocusHistory::new(8);
    history.record_losing_focus(c);
    history.record_losing_focus(b);
    history.record_losing_focus(a);
    assert_eq!(history.panes(), vec![a, b, c]);

    let live = |dead: &'static [PaneId]| move |p: PaneId| !dead.contains(&p);
    assert_eq!(history.pop_next_live_target(live(&[2])), Some(a));
    assert!(history.contains(b));

    assert_eq!(history.pop_next_live_target(live(&[1, 2])), Some(c));
    assert_eq!(history.panes(), vec![c]);
}

#[test]
fn history_is_bounded_and_moves_repeats_to_front() {
    let mut history = FocusHistory::new(3);
    for pane in [1, 2, 3, 4, 2] {
        history.record_losing_focus(pane);
    }
    assert_eq!(history.panes(), vec![2, 4, 3]);
}

#[test]
fn restore_for_disposed_pane_never_resurrects_it() {
    let (mut mgr, _) = manager();
    let ws = mgr.add_workspace("one");
    let keep = mgr.open_pane(ws, "keep", true, Box::new(Widget("editor"))).expect("pane");
    let doomed = mgr.open_pane(ws, "doomed", true, Box::new(Widget("popup"))).expect("pane");
    mgr.run_pending();

    mgr.schedule_focus(doomed).expect("scheduled");
    mgr.dispose_pane(doomed);
    mgr.run_pending();

    assert!(!mgr.is_live(doomed));
    assert!(mgr.is_focused(keep));
    let stats = mgr.services().scheduler.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.skipped_dead, 0);
}

#[test]
fn tasks_for_closed_workspace_are_skipped() {
    let (mut mgr, _) = manager();
    let one = mgr.add_workspace("one");
    let two = mgr.add_workspace("two");
    let pane = mgr.open_pane(two, "p", true, Box::new(Widget("editor"))).expect("pane");
    mgr.services().scheduler.schedule_focus(two, pane);
    mgr.close_workspace(two);
    mgr.run_pending();
    assert_eq!(mgr.active_workspace_id(), Some(one));
    assert_eq!(mgr.services().scheduler.pending(), 0);
}

#[test]
fn switching_cancels_pending_focus_work() {
    let (mut mgr, _) = manager();
    let one = mgr.add_workspace("one");
    let two = mgr.add_workspace("two");
    let a = mgr.open_pane(one, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(one, "b", true, Box::new(Widget("editor"))).expect("pane");
    mgr.run_pending();

    mgr.schedule_focus(b).expect("scheduled");
    mgr.switch_to(two);
    mgr.run_pending();
    mgr.switch_to(one);
    assert!(mgr.is_focused(a));
}

#[test]
fn tab_and_direct_focus_leave_identical_history() {
    let (mut tabbed, _) = manager();
    let (mut direct, _) = manager();
    for mgr in [&mut tabbed, &mut direct] {
        let ws = mgr.add_workspace("one");
        for kind in ["editor", "terminal", "browser"] {
            mgr.open_pane(ws, kind, true, Box::new(Widget(kind)));
        }
        mgr.run_pending();
    }
    let ids: Vec<PaneId> = direct.workspaces()[0].pane_ids();

    tabbed.focus_next();
    tabbed.focus_next();
    tabbed.focus_prev();
    direct.request_focus(ids[1]);
    direct.request_focus(ids[2]);
    direct.request_focus(ids[1]);

    let history = |m: &WorkspaceManager| m.workspaces()[0].panes().history().panes();
    assert_eq!(history(&tabbed), history(&direct));
    assert_eq!(tabbed.focused_pane(), direct.focused_pane());
}

#[test]
fn refusals_are_values() {
    let (mut mgr, _) = manager();
    let ws = mgr.add_workspace("one");
    let label = mgr.open_pane(ws, "label", false, Box::new(Widget("label"))).expect("pane");
    mgr.run_pending();
    assert_eq!(mgr.request_focus(label), FocusOutcome::Refused(Refusal::NotFocusable(label)));
    assert_eq!(mgr.focus_next(), FocusOutcome::Refused(Refusal::NoCandidate));
    assert_eq!(mgr.focused_pane(), None);
}

#[test]
fn focus_events_follow_the_transitions() {
    let (mut mgr, _) = manager();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _watch = mgr.services().bus.subscribe_scoped(
        Topic::FocusChanged,
        Owner::Service("test"),
        move |event| {
            if let Event::FocusChanged { previous, current, .. } = event {
                sink.borrow_mut().push((*previous, *current));
            }
            Ok(())
        },
    );
    let ws = mgr.add_workspace("one");
    let a = mgr.open_pane(ws, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(ws, "b", true, Box::new(Widget("editor"))).expect("pane");
    mgr.run_pending();
    mgr.focus_next();
    mgr.request_focus(b);

    assert_eq!(*seen.borrow(), vec![(None, a), (Some(a), b)]);
}

#[test]
fn dropped_and_unsubscribed_handlers_stay_silent() {
    let (mut mgr, _) = manager();
    let calls = Rc::new(RefCell::new(0));
    let bus = mgr.services().bus.clone();

    let counter = Rc::clone(&calls);
    let handle = bus.subscribe(Topic::PaneOpened, Owner::Service("counter"), move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });
    let counter = Rc::clone(&calls);
    let scoped = bus.subscribe_scoped(Topic::PaneOpened, Owner::Service("scoped"), move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });
    bus.unsubscribe(handle);
    assert!(!bus.unsubscribe(handle));
    drop(scoped);

    let ws = mgr.add_workspace("one");
    mgr.open_pane(ws, "a", true, Box::new(Widget("editor")));
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn failing_handler_does_not_block_others() {
    let (mut mgr, _) = manager();
    let bus = mgr.services().bus.clone();
    let reached = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&reached);
    let _bad = bus.subscribe_scoped(Topic::PaneOpened, Owner::Service("bad"), |_| {
        anyhow::bail!("handler exploded")
    });
    let _good = bus.subscribe_scoped(Topic::PaneOpened, Owner::Service("good"), move |_| {
        *flag.borrow_mut() = true;
        Ok(())
    });
    let ws = mgr.add_workspace("one");
    mgr.open_pane(ws, "a", true, Box::new(Widget("editor")));
    assert!(*reached.borrow());
}

#[test]
fn stale_restore_is_counted_as_skipped() {
    let (mut mgr, _) = manager();
    let one = mgr.add_workspace("one");
    let two = mgr.add_workspace("two");
    mgr.open_pane(two, "p", true, Box::new(Widget("editor")));
    let task = mgr
        .services()
        .scheduler
        .schedule_restore(two, None)
        .expect("scheduled");
    assert!(task > 0);
    mgr.run_pending();
    assert_eq!(mgr.active_workspace_id(), Some(one));
    assert_eq!(mgr.services().scheduler.stats().skipped_dead, 1);
}

#[test]
fn explicit_focus_between_disposal_and_restore_wins() {
    let (mut mgr, lamp) = manager();
    let ws = mgr.add_workspace("one");
    let a = mgr.open_pane(ws, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(ws, "b", true, Box::new(Widget("editor"))).expect("pane");
    let c = mgr.open_pane(ws, "c", true, Box::new(Widget("editor"))).expect("pane");
    mgr.run_pending();
    mgr.request_focus(b);
    mgr.request_focus(c);

    mgr.dispose_pane(c);
    assert_eq!(mgr.request_focus(a), FocusOutcome::Changed { previous: None, current: a });
    mgr.run_pending();

    assert!(mgr.is_focused(a));
    assert_eq!(*lamp.lit.borrow(), HashSet::from([a]));
    assert_single_focus(&mgr);
}

#[test]
fn tab_between_disposal_and_restore_wins() {
    let (mut mgr, _) = manager();
    let ws = mgr.add_workspace("one");
    let a = mgr.open_pane(ws, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(ws, "b", true, Box::new(Widget("editor"))).expect("pane");
    let c = mgr.open_pane(ws, "c", true, Box::new(Widget("editor"))).expect("pane");
    mgr.run_pending();
    mgr.request_focus(c);
    mgr.request_focus(a);

    mgr.dispose_pane(a);
    assert_eq!(mgr.focus_next().focused(), Some(b));
    mgr.run_pending();

    assert!(mgr.is_focused(b));
    assert_single_focus(&mgr);
}

#[test]
fn focus_chosen_before_first_restore_is_kept() {
    let (mut mgr, _) = manager();
    let ws = mgr.add_workspace("one");
    mgr.open_pane(ws, "a", true, Box::new(Widget("editor")));
    let b = mgr.open_pane(ws, "b", true, Box::new(Widget("editor"))).expect("pane");
    mgr.request_focus(b);
    mgr.run_pending();
    assert!(mgr.is_focused(b));
}

#[test]
fn restore_survives_disposal_of_its_preferred_pane() {
    let (mut mgr, _) = manager();
    let ws = mgr.add_workspace("one");
    let a = mgr.open_pane(ws, "a", true, Box::new(Widget("editor"))).expect("pane");
    let b = mgr.open_pane(ws, "b", true, Box::new(Widget("editor"))).expect("pane");

    mgr.dispose_pane(a);
    mgr.run_pending();

    assert!(mgr.is_focused(b));
    let stats = mgr.services().scheduler.stats();
    assert_eq!(stats.retargeted, 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.cancelled, 0);
}
