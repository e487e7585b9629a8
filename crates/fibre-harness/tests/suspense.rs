//! Suspense boundaries: fallbacks, hidden content and retries.

use std::cell::Cell;
use std::rc::Rc;

use fibre_harness::{HostOp, TestRoot};
use fibre_reconciler::{
    ComponentType, Element, RenderError, Resource, component, host, suspense, text,
};

fn reader() -> ComponentType {
    component("Reader", |cx| {
        let Some(resource) = cx.props().data::<Resource<String>>("res") else {
            return Err(RenderError::new("reader needs a resource").into());
        };
        let value = resource.read()?;
        Ok(host("p").child(value.as_str()).build())
    })
}

fn app(reader: &ComponentType, resource: &Resource<String>) -> Element {
    let content = reader
        .element()
        .data("res", Rc::new(resource.clone()))
        .build();
    host("div")
        .child(suspense(text("loading"), [content]))
        .build()
}

#[test]
fn mount_shows_fallback_until_data_arrives() {
    let reader = reader();
    let data = Resource::pending();
    let mut t = TestRoot::new();

    t.render(app(&reader, &data)).unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div>loading</div>");

    data.resolve("data".to_string());
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p>data</p></div>");
    assert_eq!(t.serialize_visible(), "<div><p>data</p></div>");
}

#[test]
fn update_that_suspends_hides_visible_content() {
    let reader = reader();
    let mut t = TestRoot::new();
    t.render(app(&reader, &Resource::ready("A".to_string())))
        .unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p>A</p></div>");
    let div = t.host().children(t.container())[0];
    let p = t.host().children(div)[0];
    t.take_ops();

    let next = Resource::pending();
    t.render(app(&reader, &next)).unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p hidden>A</p>loading</div>");
    assert_eq!(t.serialize_visible(), "<div>loading</div>");
    let ops = t.take_ops();
    assert!(ops.contains(&HostOp::Hide { node: p }));
    assert!(!ops.iter().any(|op| matches!(op, HostOp::Remove { .. })));

    next.resolve("B".to_string());
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p>B</p></div>");
    assert!(t.take_ops().contains(&HostOp::Unhide { node: p }));
    // The same host node came back.
    assert_eq!(t.host().children(div)[0], p);
}

#[test]
fn transition_that_suspends_keeps_current_content() {
    let reader = reader();
    let mut t = TestRoot::new();
    t.render(app(&reader, &Resource::ready("A".to_string())))
        .unwrap();
    t.flush_all().unwrap();
    t.take_ops();

    let next = Resource::pending();
    let root = t.root_id();
    let element = app(&reader, &next);
    t.reconciler_mut()
        .start_transition(|r| r.render(root, element))
        .unwrap()
        .unwrap();
    t.flush_all().unwrap();

    assert_eq!(t.serialize(), "<div><p>A</p></div>");
    assert_eq!(t.take_mutations(), Vec::new());

    next.resolve("B".to_string());
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p>B</p></div>");
    assert!(!t.take_ops().iter().any(|op| matches!(op, HostOp::Hide { .. })));
}

#[test]
fn ready_resources_never_show_the_fallback() {
    let reader = reader();
    let mut t = TestRoot::new();
    t.render(app(&reader, &Resource::ready("now".to_string())))
        .unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<div><p>now</p></div>");
    assert!(!t.ops().iter().any(|op| matches!(
        op,
        HostOp::CreateText { text, .. } if text == "loading"
    )));
}

#[test]
fn data_arriving_before_the_fallback_commits_never_shows_it() {
    let reads = Rc::new(Cell::new(0));
    let reader = {
        let reads = Rc::clone(&reads);
        component("Reader", move |cx| {
            reads.set(reads.get() + 1);
            let Some(resource) = cx.props().data::<Resource<String>>("res") else {
                return Err(RenderError::new("reader needs a resource").into());
            };
            let value = resource.read()?;
            Ok(host("p").child(value.as_str()).build())
        })
    };
    let data = Resource::pending();
    let mut t = TestRoot::new();
    t.render(app(&reader, &data)).unwrap();

    // One fiber per slice until the reader has suspended.
    for _ in 0..20 {
        if reads.get() > 0 {
            break;
        }
        assert!(t.flush_units(1).unwrap());
    }
    assert_eq!(reads.get(), 1);
    assert_eq!(t.serialize(), "");

    data.resolve("data".to_string());
    t.flush_all().unwrap();

    assert_eq!(t.serialize(), "<div><p>data</p></div>");
    assert!(reads.get() >= 2);
    assert!(!t.ops().iter().any(|op| matches!(
        op,
        HostOp::CreateText { text, .. } if text == "loading"
    )));
}
