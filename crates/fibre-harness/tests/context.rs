//! Context propagation through components that bail out.

use std::cell::Cell;
use std::rc::Rc;

use fibre_harness::TestRoot;
use fibre_reconciler::{Context, component, host};

#[test]
fn provider_change_reaches_readers_below_a_bailout() {
    let theme = Context::new("light".to_string());
    let middle_renders = Rc::new(Cell::new(0));
    let reader_renders = Rc::new(Cell::new(0));

    let reader = {
        let theme = theme.clone();
        let renders = Rc::clone(&reader_renders);
        component("Reader", move |cx| {
            renders.set(renders.get() + 1);
            let value = cx.read_context(&theme);
            Ok(host("span").child(value.as_str()).build())
        })
    };
    let middle = {
        let renders = Rc::clone(&middle_renders);
        component("Middle", move |_| {
            renders.set(renders.get() + 1);
            Ok(reader.element().build())
        })
    };
    // The same element on every render, so the middle component bails out.
    let middle_el = middle.element().build();

    let mut t = TestRoot::new();
    t.render(theme.provider(Rc::new("dark".to_string()), [middle_el.clone()]))
        .unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<span>dark</span>");

    t.render(theme.provider(Rc::new("blue".to_string()), [middle_el.clone()]))
        .unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<span>blue</span>");
    assert_eq!(middle_renders.get(), 1);
    assert_eq!(reader_renders.get(), 2);
}

#[test]
fn readers_without_a_provider_see_the_default() {
    let locale = Context::new("en".to_string());
    let reader = {
        let locale = locale.clone();
        component("Reader", move |cx| {
            let value = cx.read_context(&locale);
            Ok(host("span").child(value.as_str()).build())
        })
    };
    let mut t = TestRoot::new();
    t.render(reader.element()).unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<span>en</span>");
}

#[test]
fn same_provider_value_does_not_rerender_readers() {
    let theme = Context::new(0u32);
    let reader_renders = Rc::new(Cell::new(0));
    let reader = {
        let theme = theme.clone();
        let renders = Rc::clone(&reader_renders);
        component("Reader", move |cx| {
            renders.set(renders.get() + 1);
            Ok(host("b").child(cx.read_context(&theme).to_string()).build())
        })
    };
    let reader_el = reader.element().build();
    let value = Rc::new(7u32);

    let mut t = TestRoot::new();
    for _ in 0..3 {
        t.render(theme.provider(Rc::clone(&value), [reader_el.clone()]))
            .unwrap();
        t.flush_all().unwrap();
    }
    assert_eq!(t.serialize(), "<b>7</b>");
    assert_eq!(reader_renders.get(), 1);
}
