#![forbid(unsafe_code)]

//! Suspension and error capture.
//!
//! When a fiber interrupts its render, [`throw_exception`] marks it
//! incomplete and finds the ancestor that will handle the interrupt: the
//! nearest suspense boundary for a pending wakeable, the nearest error
//! boundary (or the root) for an error. That ancestor is flagged
//! `SHOULD_CAPTURE`; [`unwind_work`] turns the flag into `DID_CAPTURE` on
//! the way up, and the work loop begins the ancestor again so it renders
//! its fallback or error state.
//!
//! [`throw_exception`]: Reconciler::throw_exception
//! [`unwind_work`]: Reconciler::unwind_work

use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::channel::Message;
use crate::component::Component;
use crate::element::{Element, ElementType, Props};
use crate::error::{CapturedError, Interrupt, RenderError};
use crate::fiber::{FiberId, Flags, Mode, WorkTag};
use crate::host::HostConfig;
use crate::lane::{Lane, Lanes};
use crate::reconciler::Reconciler;
use crate::resource::Wakeable;
use crate::update_queue::{
    Payload, Reducer, StateValue, Update, UpdateCallback, UpdateQueue, UpdateTag, empty_state,
};

/// Names of the fibers from `fiber` up to the root, innermost first.
pub(crate) fn component_stack<H: HostConfig>(reconciler: &Reconciler<H>, fiber: FiberId) -> String {
    let mut lines = Vec::new();
    let mut node = Some(fiber);
    while let Some(id) = node {
        let Some(f) = reconciler.fibers.get(id) else {
            break;
        };
        if matches!(
            f.tag,
            WorkTag::Component | WorkTag::HostComponent | WorkTag::Suspense
        ) {
            lines.push(format!("in {}", f.name()));
        }
        node = f.ret;
    }
    lines.join("\n")
}

impl<H: HostConfig> Reconciler<H> {
    /// Route an interrupt raised while working on `source`.
    pub(crate) fn throw_exception(&mut self, source: FiberId, value: Interrupt) {
        self.node_mut(source).flags |= Flags::INCOMPLETE;
        let error = match value {
            Interrupt::Suspend(wakeable) => match self.throw_suspension(source, wakeable) {
                Some(error) => error,
                None => return,
            },
            Interrupt::Error(error) => error,
        };
        let captured = CapturedError::new(error, component_stack(self, source));
        self.render_did_error(captured.clone());
        self.capture_render_error(source, captured);
    }

    /// Hand a pending wakeable to the nearest boundary. Returns an error
    /// when a synchronous render suspends outside any boundary.
    fn throw_suspension(&mut self, source: FiberId, wakeable: Wakeable) -> Option<RenderError> {
        let lanes = self.render.lanes;
        if let Some(boundary) = self.nearest_suspense_boundary(source) {
            let concurrent = self.node(boundary).mode.contains(Mode::CONCURRENT);
            {
                let f = self.node_mut(boundary);
                f.flags |= Flags::SHOULD_CAPTURE;
                f.lanes |= lanes;
                if !f.retries.iter().any(|w| w.id() == wakeable.id()) {
                    f.retries.push(Rc::clone(&wakeable));
                }
            }
            if concurrent {
                self.attach_ping_listener(&wakeable, lanes);
            }
            debug!(?boundary, wakeable = wakeable.id(), "suspended");
            return None;
        }

        if !lanes.contains(Lanes::SYNC) {
            // No boundary: leave the current tree on screen until the data
            // arrives.
            self.attach_ping_listener(&wakeable, lanes);
            self.render_did_suspend_delay_if_possible();
            debug!(wakeable = wakeable.id(), "suspended outside any boundary");
            return None;
        }
        Some(RenderError::new(
            "a component suspended during a synchronous render with no suspense boundary above it",
        ))
    }

    /// Nearest suspense ancestor that is not already showing its fallback.
    fn nearest_suspense_boundary(&self, source: FiberId) -> Option<FiberId> {
        let mut node = self.node(source).ret;
        while let Some(id) = node {
            let f = self.node(id);
            if f.tag == WorkTag::Suspense && !f.memoized_state.is_suspense_fallback() {
                return Some(id);
            }
            node = f.ret;
        }
        None
    }

    /// Ping the root when `wakeable` settles. One listener per wakeable and
    /// lane set.
    fn attach_ping_listener(&mut self, wakeable: &Wakeable, lanes: Lanes) {
        let Some(root) = self.render.root else {
            return;
        };
        let id = wakeable.id();
        {
            let waiting = self.root_mut(root).ping_cache.entry(id).or_default();
            if waiting.contains(lanes) {
                return;
            }
            *waiting |= lanes;
        }
        let channel = Rc::downgrade(&self.channel);
        wakeable.subscribe(Box::new(move || {
            if let Some(channel) = channel.upgrade() {
                channel.push(Message::Ping {
                    root,
                    wakeable: id,
                    lanes,
                });
            }
        }));
    }

    /// Queue a capture update on the nearest error boundary, or the root.
    fn capture_render_error(&mut self, source: FiberId, captured: CapturedError) {
        let lane = self.render.lanes.pick_arbitrary_lane();
        let mut node = self.node(source).ret;
        while let Some(id) = node {
            let f = self.node(id);
            match &f.element_type {
                ElementType::Root => {
                    let update = self.root_error_update(captured.clone(), lane);
                    self.enqueue_capture(id, update, lane);
                    return;
                }
                ElementType::Component(ty)
                    if ty.get().is_error_boundary() && !f.flags.contains(Flags::DID_CAPTURE) =>
                {
                    let update = self.boundary_error_update(Rc::clone(ty.get()), captured.clone(), lane);
                    warn!(boundary = %ty.name(), error = %captured.error, "error captured");
                    self.enqueue_capture(id, update, lane);
                    return;
                }
                _ => {}
            }
            node = f.ret;
        }
    }

    fn enqueue_capture(&mut self, fiber: FiberId, update: Update, lane: Lane) {
        let f = self.node_mut(fiber);
        f.flags |= Flags::SHOULD_CAPTURE;
        f.lanes |= lane;
        f.update_queue
            .get_or_insert_with(|| UpdateQueue::new(empty_state()))
            .enqueue_captured(update);
    }

    /// Update that clears the root and reports `captured` once committed.
    pub(crate) fn root_error_update(&self, captured: CapturedError, lane: Lane) -> Update {
        let sink = Rc::clone(&self.uncaught);
        let hook = self.config.on_uncaught_error.clone();
        let callback: UpdateCallback = Rc::new(move || {
            error!(error = %captured.error, stack = %captured.component_stack, "uncaught error; root cleared");
            if let Some(hook) = &hook {
                hook(&captured);
            }
            sink.borrow_mut().push(captured.clone());
        });
        let empty: StateValue = Rc::new(Element::Empty);
        Update::new(lane, self.now(), UpdateTag::Capture, Payload::Value(empty)).with_callback(callback)
    }

    /// Update that moves a boundary into its error state and calls
    /// `did_catch` once committed.
    pub(crate) fn boundary_error_update(
        &self,
        component: Rc<dyn Component>,
        captured: CapturedError,
        lane: Lane,
    ) -> Update {
        let derive = Rc::clone(&component);
        let error = captured.clone();
        let reducer: Reducer = Rc::new(move |prev: &StateValue, _props: &Props| {
            derive
                .derive_state_from_error(&error)
                .unwrap_or_else(|| Rc::clone(prev))
        });
        let callback: UpdateCallback = Rc::new(move || component.did_catch(&captured));
        Update::new(lane, self.now(), UpdateTag::Capture, Payload::Reducer(reducer))
            .with_callback(callback)
    }

    /// Step up from an incomplete fiber. Returns the fiber to begin again
    /// when it captured the interrupt.
    pub(crate) fn unwind_work(&mut self, fiber: FiberId) -> Option<FiberId> {
        let (tag, flags) = {
            let f = self.node(fiber);
            (f.tag, f.flags)
        };
        let captures = match tag {
            WorkTag::Component | WorkTag::Suspense => flags.contains(Flags::SHOULD_CAPTURE),
            WorkTag::HostRoot => {
                flags.contains(Flags::SHOULD_CAPTURE) && !flags.contains(Flags::DID_CAPTURE)
            }
            WorkTag::ContextProvider => {
                if let ElementType::Provider(context) = self.node(fiber).element_type {
                    self.contexts.pop(context);
                }
                false
            }
            _ => false,
        };
        if !captures {
            return None;
        }
        self.node_mut(fiber).flags = (flags - Flags::SHOULD_CAPTURE) | Flags::DID_CAPTURE;
        Some(fiber)
    }
}
