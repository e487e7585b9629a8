//! Effect ordering, dependency tracking and the nested update guard.

use std::cell::RefCell;
use std::rc::Rc;

use fibre_harness::TestRoot;
use fibre_reconciler::{
    Cleanup, ComponentType, Deps, ReconcileError, ReconcilerConfig, RootOptions, RootTag,
    component, text,
};

type Log = Rc<RefCell<Vec<String>>>;

fn push(log: &Log, entry: String) {
    log.borrow_mut().push(entry);
}

/// A component that logs its layout and passive effects and cleanups.
fn logging(name: &'static str, log: &Log, child: Option<ComponentType>) -> ComponentType {
    let log = Rc::clone(log);
    component(name, move |cx| {
        let l = Rc::clone(&log);
        cx.layout_effect(Deps::once(), move || {
            push(&l, format!("layout {name}"));
            let cleanup: Cleanup = Box::new(move || push(&l, format!("layout cleanup {name}")));
            Ok(Some(cleanup))
        });
        let l = Rc::clone(&log);
        cx.effect(Deps::once(), move || {
            push(&l, format!("passive {name}"));
            let cleanup: Cleanup = Box::new(move || push(&l, format!("passive cleanup {name}")));
            Ok(Some(cleanup))
        });
        Ok(match &child {
            Some(child) => child.element().build(),
            None => text(name),
        })
    })
}

#[test]
fn mount_runs_layout_then_passive_children_first() {
    let log: Log = Rc::default();
    let child = logging("child", &log, None);
    let parent = logging("parent", &log, Some(child));
    let mut t = TestRoot::new();
    t.render(parent.element()).unwrap();
    t.flush_all().unwrap();

    assert_eq!(
        *log.borrow(),
        [
            "layout child",
            "layout parent",
            "passive child",
            "passive parent"
        ]
    );
    assert_eq!(t.serialize(), "child");
}

#[test]
fn unmount_runs_cleanups_parents_first() {
    let log: Log = Rc::default();
    let child = logging("child", &log, None);
    let parent = logging("parent", &log, Some(child));
    let mut t = TestRoot::new();
    t.render(parent.element()).unwrap();
    t.flush_all().unwrap();
    log.borrow_mut().clear();

    t.unmount().unwrap();
    t.flush_all().unwrap();

    assert_eq!(
        *log.borrow(),
        [
            "layout cleanup parent",
            "layout cleanup child",
            "passive cleanup parent",
            "passive cleanup child"
        ]
    );
    assert_eq!(t.serialize(), "");
}

#[test]
fn effects_rerun_only_when_deps_change() {
    let log: Log = Rc::default();
    let sink = Rc::clone(&log);
    let watcher = component("Watcher", move |cx| {
        let value = cx.props().int("value").unwrap_or_default();
        let l = Rc::clone(&sink);
        cx.effect(Deps::of(&value), move || {
            push(&l, format!("run {value}"));
            let cleanup: Cleanup = Box::new(move || push(&l, format!("cleanup {value}")));
            Ok(Some(cleanup))
        });
        Ok(text(value.to_string()))
    });
    let mut t = TestRoot::new();
    for value in [1, 1, 2] {
        t.render(watcher.element().attr("value", value)).unwrap();
        t.flush_all().unwrap();
    }
    assert_eq!(*log.borrow(), ["run 1", "cleanup 1", "run 2"]);
    assert_eq!(t.serialize(), "2");
}

#[test]
fn sync_commits_flush_passive_effects_before_returning() {
    let log: Log = Rc::default();
    let leaf = logging("leaf", &log, None);
    let mut t = TestRoot::new();
    t.render_sync(leaf.element()).unwrap();
    assert_eq!(*log.borrow(), ["layout leaf", "passive leaf"]);
    assert!(!t.reconciler().has_pending_passive_effects());
}

#[test]
fn endless_layout_updates_hit_the_nested_update_limit() {
    let config = ReconcilerConfig {
        nested_update_limit: 5,
        ..ReconcilerConfig::default()
    };
    let options = RootOptions {
        tag: RootTag::Legacy,
        strict: false,
    };
    let mut t = TestRoot::with_options(options, config);
    let looping = component("Looping", |cx| {
        let handle = cx.handle();
        cx.layout_effect(Deps::always(), move || {
            handle.force_update();
            Ok(None)
        });
        Ok(text("again"))
    });

    let err = t.render(looping.element()).unwrap_err();
    assert!(
        matches!(err, ReconcileError::NestedUpdateLimit { limit: 5 }),
        "{err}"
    );
}
