//! Render and host errors: boundaries, synchronous retry, uncaught errors.

use std::cell::RefCell;
use std::rc::Rc;

use fibre_harness::TestRoot;
use fibre_reconciler::{
    CapturedError, Component, ComponentType, ReconcileError, ReconcilerConfig, Render,
    RenderContext, RenderError, StateValue, component, fragment, host,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Boundary {
    caught: Log,
}

impl Component for Boundary {
    fn render(&self, cx: &mut RenderContext<'_>) -> Render {
        match cx.state::<String>() {
            Some(message) => Ok(host("p").child(format!("caught: {message}")).build()),
            None => Ok(fragment(cx.props().children().to_vec())),
        }
    }

    fn is_error_boundary(&self) -> bool {
        true
    }

    fn derive_state_from_error(&self, error: &CapturedError) -> Option<StateValue> {
        Some(Rc::new(error.error.message().to_string()))
    }

    fn did_catch(&self, error: &CapturedError) {
        self.caught.borrow_mut().push(error.error.message().to_string());
    }
}

fn thrower() -> ComponentType {
    component("Thrower", |_| Err(RenderError::new("boom").into()))
}

#[test]
fn boundary_renders_its_error_state() {
    let caught: Log = Rc::default();
    let boundary = ComponentType::new(Boundary {
        caught: Rc::clone(&caught),
    });
    let mut t = TestRoot::new();
    t.render(
        host("div").child(
            boundary
                .element()
                .child(host("span").child("fine"))
                .child(thrower().element()),
        ),
    )
    .unwrap();
    t.flush_all().unwrap();

    assert_eq!(t.serialize(), "<div><p>caught: boom</p></div>");
    let caught = caught.borrow();
    assert!(!caught.is_empty());
    assert!(caught.iter().all(|m| m == "boom"));
    assert!(t.take_uncaught_errors().is_empty());
}

#[test]
fn boundary_stays_out_of_the_way_without_errors() {
    let caught: Log = Rc::default();
    let boundary = ComponentType::new(Boundary {
        caught: Rc::clone(&caught),
    });
    let mut t = TestRoot::new();
    t.render(boundary.element().child(host("span").child("fine")))
        .unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<span>fine</span>");
    assert!(caught.borrow().is_empty());
}

#[test]
fn uncaught_error_clears_the_root() {
    let reported: Log = Rc::default();
    let sink = Rc::clone(&reported);
    let config = ReconcilerConfig {
        on_uncaught_error: Some(Rc::new(move |e: &CapturedError| {
            sink.borrow_mut().push(e.error.message().to_string());
        })),
        ..ReconcilerConfig::default()
    };
    let mut t = TestRoot::with_config(config);
    t.render(host("p").child("ok")).unwrap();
    t.flush_all().unwrap();
    assert_eq!(t.serialize(), "<p>ok</p>");

    t.render(host("div").child(thrower().element())).unwrap();
    let err = t.flush_all().unwrap_err();
    assert!(matches!(err, ReconcileError::Task(_)), "{err}");

    assert_eq!(t.serialize(), "");
    let uncaught = t.take_uncaught_errors();
    assert!(!uncaught.is_empty());
    assert_eq!(uncaught[0].error.message(), "boom");
    assert!(uncaught[0].component_stack.contains("in Thrower"));
    assert_eq!(reported.borrow().first().map(String::as_str), Some("boom"));
}

#[test]
fn host_failure_is_recovered_by_the_synchronous_retry() {
    let recovered: Log = Rc::default();
    let sink = Rc::clone(&recovered);
    let config = ReconcilerConfig {
        on_recoverable_error: Some(Rc::new(move |e: &CapturedError| {
            sink.borrow_mut().push(e.error.message().to_string());
        })),
        ..ReconcilerConfig::default()
    };
    let mut t = TestRoot::with_config(config);
    t.host_mut().fail_next("create_instance");
    t.render(host("div").child(host("span"))).unwrap();
    t.flush_all().unwrap();

    assert_eq!(t.serialize(), "<div><span/></div>");
    assert_eq!(
        recovered.borrow().as_slice(),
        ["host operation `create_instance` failed".to_string()]
    );
    assert!(t.take_uncaught_errors().is_empty());
}

#[test]
fn legacy_roots_do_not_retry() {
    let mut t = TestRoot::legacy();
    let err = t.render(thrower().element()).unwrap_err();
    assert!(matches!(err, ReconcileError::Uncaught(_)), "{err}");
    assert_eq!(t.take_uncaught_errors().len(), 1);
}

#[test]
#[tracing_test::traced_test]
fn uncaught_errors_are_logged() {
    let mut t = TestRoot::legacy();
    let _ = t.render(thrower().element());
    assert!(logs_contain("uncaught error; root cleared"));
}
