//! Mounting, updating and removing host nodes.
//!
//! Every test drives a single root over the in-memory host and checks the
//! resulting markup and, where the exact host calls matter, the mutation log.

use std::cell::Cell;
use std::rc::Rc;

use fibre_harness::{HostOp, TestRoot};
use fibre_reconciler::{Deps, Element, Flags, component, host};

fn list(keys: &[&str]) -> Element {
    host("ul")
        .children(keys.iter().map(|k| host("li").key(*k).child(*k)))
        .build()
}

/// Effect flags left anywhere in the committed tree.
fn leftover_flags(t: &TestRoot) -> Vec<Flags> {
    let r = t.reconciler();
    let mut stack = vec![r.root(t.root_id()).unwrap().current()];
    let mut left = Vec::new();
    while let Some(id) = stack.pop() {
        let fiber = r.fiber(id).unwrap();
        if !(fiber.flags() | fiber.subtree_flags()).is_empty() {
            left.push(fiber.flags() | fiber.subtree_flags());
        }
        stack.extend(fiber.child());
        stack.extend(fiber.sibling());
    }
    left
}

fn mounted(element: impl Into<Element>) -> TestRoot {
    let mut t = TestRoot::new();
    t.render(element).unwrap();
    t.flush_all().unwrap();
    t.take_ops();
    t
}

#[test]
fn concurrent_render_waits_for_a_flush() {
    let mut t = TestRoot::new();
    t.render(host("div").child("hello")).unwrap();
    assert_eq!(t.serialize(), "");
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div>hello</div>");
}

#[test]
fn first_commit_clears_the_container() {
    let mut t = TestRoot::new();
    t.render(host("div")).unwrap();
    t.flush_all().unwrap();
    let container = t.container();
    assert!(t.ops().contains(&HostOp::ClearContainer { container }));
}

#[test]
fn update_diffs_attributes_and_text() {
    let mut t = mounted(host("div").attr("id", "a").child("hi"));
    let div = t.host().children(t.container())[0];
    let text = t.host().children(div)[0];

    t.render(host("div").attr("id", "b").child("bye")).unwrap();
    t.flush_all().unwrap();

    let mutations = t.take_mutations();
    assert!(mutations.contains(&HostOp::Update {
        node: div,
        changes: vec![("id".to_string(), Some("b".to_string()))],
    }));
    assert!(mutations.contains(&HostOp::UpdateText {
        node: text,
        text: "bye".to_string(),
    }));
    assert_eq!(t.serialize(), "<div id=\"b\">bye</div>");
}

#[test]
fn unchanged_rerender_commits_no_mutations() {
    let mut t = mounted(list(&["a", "b", "c"]));
    t.render(list(&["a", "b", "c"])).unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.take_mutations(), Vec::new());
}

#[test]
fn deletions_happen_before_insertions() {
    let mut t = mounted(list(&["a", "b"]));
    let ul = t.host().children(t.container())[0];
    let b = t.host().children(ul)[1];

    t.render(list(&["a", "c"])).unwrap();
    t.flush_all().unwrap();

    let mutations = t.take_mutations();
    assert_eq!(mutations.len(), 2, "{mutations:?}");
    assert_eq!(mutations[0], HostOp::Remove { parent: ul, child: b });
    assert!(matches!(mutations[1], HostOp::Append { parent, .. } if parent == ul));
    assert_eq!(t.serialize(), "<ul><li>a</li><li>c</li></ul>");
}

#[test]
fn keyed_reorder_reuses_nodes() {
    let mut t = mounted(list(&["a", "b", "c"]));
    let ul = t.host().children(t.container())[0];
    let before = t.host().children(ul).to_vec();

    t.render(list(&["c", "a", "b"])).unwrap();
    t.flush_all().unwrap();

    let ops = t.take_ops();
    assert!(!ops.iter().any(|op| matches!(
        op,
        HostOp::Create { .. } | HostOp::CreateText { .. } | HostOp::Remove { .. }
    )));
    assert_eq!(t.host().children(ul), &[before[2], before[0], before[1]]);
    assert_eq!(t.serialize(), "<ul><li>c</li><li>a</li><li>b</li></ul>");
}

#[test]
fn insertion_goes_before_the_next_stable_sibling() {
    let mut t = mounted(list(&["a", "c"]));
    let ul = t.host().children(t.container())[0];
    let c = t.host().children(ul)[1];

    t.render(list(&["a", "b", "c"])).unwrap();
    t.flush_all().unwrap();

    let mutations = t.take_mutations();
    assert_eq!(mutations.len(), 1, "{mutations:?}");
    assert!(matches!(
        mutations[0],
        HostOp::InsertBefore { parent, before, .. } if parent == ul && before == c
    ));
    assert_eq!(t.serialize(), "<ul><li>a</li><li>b</li><li>c</li></ul>");
}

#[test]
fn text_content_is_reset_before_children_are_placed() {
    let mut t = mounted(host("p").attr("text", "hi"));
    assert_eq!(t.serialize(), "<p>hi</p>");
    let p = t.host().children(t.container())[0];

    t.render(host("p").child("x")).unwrap();
    t.flush_all().unwrap();

    let ops = t.take_ops();
    let resets = ops
        .iter()
        .filter(|op| **op == HostOp::ResetText { node: p })
        .count();
    assert_eq!(resets, 1);
    assert_eq!(t.serialize(), "<p>x</p>");
}

#[test]
fn legacy_root_renders_before_returning() {
    let mut t = TestRoot::legacy();
    t.render(host("div").child("now")).unwrap();
    assert_eq!(t.serialize(), "<div>now</div>");
}

#[test]
fn render_sync_commits_immediately() {
    let mut t = TestRoot::new();
    t.render_sync(host("span").child("sync")).unwrap();
    assert_eq!(t.serialize(), "<span>sync</span>");
}

#[test]
fn unmount_removes_and_detaches_everything() {
    let mut t = mounted(host("div").child(host("span")));
    let div = t.host().children(t.container())[0];
    let span = t.host().children(div)[0];

    t.unmount().unwrap();
    t.flush_all().unwrap();

    assert_eq!(t.serialize(), "");
    assert!(t.host().is_detached(div));
    assert!(t.host().is_detached(span));
}

#[test]
fn state_update_rerenders_the_component() {
    let handle = Rc::new(Cell::new(None));
    let slot = Rc::clone(&handle);
    let counter = component("Counter", move |cx| {
        slot.set(Some(cx.handle()));
        let count = cx.state::<u32>().map_or(0, |n| *n);
        Ok(host("p").child(count.to_string()).build())
    });
    let mut t = mounted(counter.element());
    assert_eq!(t.serialize(), "<p>0</p>");

    let h = handle.take().unwrap();
    h.set(5u32);
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<p>5</p>");

    h.update(|n: &u32| n + 1);
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<p>6</p>");
}

#[test]
fn force_update_rerenders_with_unchanged_state() {
    let handle = Rc::new(Cell::new(None));
    let renders = Rc::new(Cell::new(0));
    let outside = Rc::new(Cell::new(1u32));
    let reader = {
        let slot = Rc::clone(&handle);
        let renders = Rc::clone(&renders);
        let source = Rc::clone(&outside);
        component("Reader", move |cx| {
            slot.set(Some(cx.handle()));
            renders.set(renders.get() + 1);
            Ok(host("p").child(source.get().to_string()).build())
        })
    };
    let mut t = mounted(reader.element());
    assert_eq!(t.serialize(), "<p>1</p>");
    let h = handle.take().unwrap();
    let mounted_renders = renders.get();

    // No state of this type, so the reducer keeps the old state.
    outside.set(2);
    assert!(h.update(|n: &u64| n + 1).is_some());
    t.flush_all().unwrap();
    assert_eq!(renders.get(), mounted_renders);
    assert_eq!(t.serialize(), "<p>1</p>");
    assert!(t.take_mutations().is_empty());

    assert!(h.force_update().is_some());
    t.flush_all().unwrap();
    assert_eq!(renders.get(), mounted_renders + 1);
    assert_eq!(t.serialize(), "<p>2</p>");
    assert!(leftover_flags(&t).is_empty());
    t.reconciler().validate_tree(t.root_id()).unwrap();
}

#[test]
fn committed_tree_stays_valid_and_bounded() {
    let mut t = TestRoot::new();
    for round in 0..5 {
        let items = ["x", "y", "z"].map(|k| host("li").key(k).child(format!("{k}{round}")));
        t.render(host("ul").children(items)).unwrap();
        t.flush_all().unwrap();
        t.reconciler().validate_tree(t.root_id()).unwrap();
    }
    // Root, list, three items and their text: eight fibers, two twins each.
    assert!(t.reconciler().fiber_count() <= 16, "{}", t.reconciler().fiber_count());
    assert_eq!(
        t.serialize(),
        "<ul><li>x4</li><li>y4</li><li>z4</li></ul>"
    );
}

#[test]
fn committing_again_without_updates_is_a_noop() {
    let runs = Rc::new(Cell::new(0));
    let labelled = {
        let runs = Rc::clone(&runs);
        component("Labelled", move |cx| {
            let runs = Rc::clone(&runs);
            cx.layout_effect(Deps::always(), move || {
                runs.set(runs.get() + 1);
                Ok(None)
            });
            let label = cx.props().str("label").unwrap_or_default().to_string();
            Ok(host("p").attr("id", label.as_str()).child(label).build())
        })
    };
    let mut t = mounted(host("div").child(labelled.element().attr("label", "a")));
    t.render(host("div").child(labelled.element().attr("label", "b")))
        .unwrap();
    t.flush_all().unwrap();
    let markup = t.serialize();
    let runs_after_update = runs.get();
    assert!(leftover_flags(&t).is_empty(), "{:?}", leftover_flags(&t));
    t.take_ops();

    let root = t.root_id();
    assert!(!t.reconciler_mut().commit_finished_work(root).unwrap());
    assert!(t.take_mutations().is_empty());
    assert_eq!(runs.get(), runs_after_update);
    assert_eq!(t.serialize(), markup);
    assert!(leftover_flags(&t).is_empty());
    t.reconciler().validate_tree(root).unwrap();
}
