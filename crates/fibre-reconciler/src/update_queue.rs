#![forbid(unsafe_code)]

//! Per-fiber update queues.
//!
//! A queue keeps a *base state* and the list of *base updates* that have
//! not been folded into it yet. New updates land in a shared pending list
//! (shared between the two generations of a fiber) and are moved onto the
//! base list of both generations when a render starts processing them, so
//! an interrupted render never loses them.
//!
//! Processing walks the base list in insertion order. Updates whose lane is
//! not being rendered are skipped; the first skip pins the base state and
//! every later update, processed or not, is kept for the next pass so the
//! final state always equals applying all updates in order.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::element::Props;
use crate::lane::{Lane, Lanes};

/// Opaque component or root state.
pub type StateValue = Rc<dyn Any>;

/// Computes the next state from the previous state and current props.
pub type Reducer = Rc<dyn Fn(&StateValue, &Props) -> StateValue>;

/// Runs in the layout pass once the update is committed.
pub type UpdateCallback = Rc<dyn Fn()>;

/// How an update changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTag {
    /// Apply the payload to the previous state.
    Update,
    /// Replace state with the payload.
    Replace,
    /// Keep state, but force the fiber to re-render.
    Force,
    /// Error-boundary capture: marks the fiber as having captured.
    Capture,
}

/// State change carried by an update.
#[derive(Clone)]
pub enum Payload {
    None,
    Value(StateValue),
    Reducer(Reducer),
}

/// One queued state change.
#[derive(Clone)]
pub struct Update {
    pub(crate) lane: Lane,
    pub(crate) event_time: f64,
    pub(crate) tag: UpdateTag,
    pub(crate) payload: Payload,
    pub(crate) callback: Option<UpdateCallback>,
}

impl Update {
    pub fn new(lane: Lane, event_time: f64, tag: UpdateTag, payload: Payload) -> Self {
        Self {
            lane,
            event_time,
            tag,
            payload,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn tag(&self) -> UpdateTag {
        self.tag
    }

    fn apply(&self, prev: &StateValue, props: &Props) -> StateValue {
        match (&self.payload, self.tag) {
            (_, UpdateTag::Force) | (Payload::None, _) => Rc::clone(prev),
            (Payload::Value(value), _) => Rc::clone(value),
            (Payload::Reducer(reduce), UpdateTag::Replace) => reduce(&empty_state(), props),
            (Payload::Reducer(reduce), _) => reduce(prev, props),
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("lane", &self.lane.label())
            .field("tag", &self.tag)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Placeholder state for fibers that never set any.
pub(crate) fn empty_state() -> StateValue {
    Rc::new(())
}

/// Updates visible to both generations of a fiber.
#[derive(Default)]
pub(crate) struct SharedQueue {
    /// Ready to be processed by the next render.
    pub(crate) pending: VecDeque<Update>,
    /// Arrived while a render was in progress; moved to `pending` when the
    /// next render starts.
    pub(crate) interleaved: VecDeque<Update>,
    /// Transition lanes of queued updates, for entanglement.
    pub(crate) lanes: Lanes,
}

impl SharedQueue {
    /// Move interleaved updates behind pending ones.
    pub(crate) fn finish_interleaved(&mut self) {
        let interleaved = std::mem::take(&mut self.interleaved);
        self.pending.extend(interleaved);
    }
}

pub(crate) type SharedQueueRef = Rc<RefCell<SharedQueue>>;

/// Outcome of [`UpdateQueue::process`].
pub(crate) struct Processed {
    pub(crate) state: StateValue,
    /// Lanes of updates that were skipped.
    pub(crate) remaining: Lanes,
    pub(crate) did_capture: bool,
    /// A force update was applied; the fiber renders even with unchanged state.
    pub(crate) has_force_update: bool,
    pub(crate) has_callbacks: bool,
}

/// The queue owned by one fiber generation.
#[derive(Clone)]
pub(crate) struct UpdateQueue {
    pub(crate) base_state: StateValue,
    pub(crate) base_updates: Vec<Update>,
    pub(crate) shared: SharedQueueRef,
    pub(crate) callbacks: Vec<UpdateCallback>,
}

impl UpdateQueue {
    pub(crate) fn new(state: StateValue) -> Self {
        Self {
            base_state: state,
            base_updates: Vec::new(),
            shared: Rc::new(RefCell::new(SharedQueue::default())),
            callbacks: Vec::new(),
        }
    }

    /// Copy for a new work-in-progress generation; callbacks start empty.
    pub(crate) fn clone_for_work(&self) -> Self {
        Self {
            base_state: Rc::clone(&self.base_state),
            base_updates: self.base_updates.clone(),
            shared: Rc::clone(&self.shared),
            callbacks: Vec::new(),
        }
    }

    /// Drain the shared pending list.
    pub(crate) fn take_pending(&self) -> Vec<Update> {
        self.shared.borrow_mut().pending.drain(..).collect()
    }

    /// Add an update visible only to this generation (error capture).
    pub(crate) fn enqueue_captured(&mut self, update: Update) {
        self.base_updates.push(update);
    }

    /// Fold base updates whose lanes are in `render_lanes` into state.
    pub(crate) fn process(&mut self, props: &Props, render_lanes: Lanes) -> Processed {
        let mut state = Rc::clone(&self.base_state);
        let mut new_base_state: Option<StateValue> = None;
        let mut new_base_updates = Vec::new();
        let mut remaining = Lanes::empty();
        let mut did_capture = false;
        let mut has_force_update = false;
        let mut has_callbacks = false;

        for update in std::mem::take(&mut self.base_updates) {
            if !render_lanes.contains(update.lane) {
                if new_base_updates.is_empty() {
                    new_base_state = Some(Rc::clone(&state));
                }
                remaining |= update.lane;
                new_base_updates.push(update);
                continue;
            }

            if !new_base_updates.is_empty() {
                // Already applied; keep it for rebasing but never skip it again.
                let mut rebased = update.clone();
                rebased.lane = Lanes::empty();
                new_base_updates.push(rebased);
            }

            match update.tag {
                UpdateTag::Capture => did_capture = true,
                UpdateTag::Force => has_force_update = true,
                UpdateTag::Update | UpdateTag::Replace => {}
            }
            state = update.apply(&state, props);

            if let Some(callback) = &update.callback {
                if !update.lane.is_empty() {
                    self.callbacks.push(Rc::clone(callback));
                    has_callbacks = true;
                }
            }
        }

        self.base_state = new_base_state.unwrap_or_else(|| Rc::clone(&state));
        self.base_updates = new_base_updates;

        let interleaved_lanes = self
            .shared
            .borrow()
            .interleaved
            .iter()
            .fold(Lanes::empty(), |acc, u| acc | u.lane);

        Processed {
            state,
            remaining: remaining | interleaved_lanes,
            did_capture,
            has_force_update,
            has_callbacks,
        }
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<UpdateCallback> {
        std::mem::take(&mut self.callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(s: &'static str, lane: Lane) -> Update {
        let reduce: Reducer = Rc::new(move |prev: &StateValue, _props: &Props| {
            let prev = prev.downcast_ref::<String>().cloned().unwrap_or_default();
            Rc::new(format!("{prev}{s}")) as StateValue
        });
        Update::new(lane, 0.0, UpdateTag::Update, Payload::Reducer(reduce))
    }

    fn text(state: &StateValue) -> String {
        state.downcast_ref::<String>().cloned().unwrap_or_default()
    }

    fn queue_with(updates: Vec<Update>) -> UpdateQueue {
        let mut queue = UpdateQueue::new(Rc::new(String::new()));
        queue.base_updates = updates;
        queue
    }

    #[test]
    fn skipped_updates_rebase_to_same_final_state() {
        let mut queue = queue_with(vec![
            append("A", Lanes::SYNC),
            append("B", Lanes::DEFAULT),
            append("C", Lanes::SYNC),
            append("D", Lanes::DEFAULT),
        ]);

        let first = queue.process(&Props::empty(), Lanes::SYNC);
        assert_eq!(text(&first.state), "AC");
        assert_eq!(first.remaining, Lanes::DEFAULT);
        assert_eq!(text(&queue.base_state), "A");
        assert_eq!(queue.base_updates.len(), 3);

        let second = queue.process(&Props::empty(), Lanes::DEFAULT);
        assert_eq!(text(&second.state), "ABCD");
        assert!(second.remaining.is_empty());
        assert!(queue.base_updates.is_empty());
    }

    #[test]
    fn replace_and_force_tags() {
        let mut queue = queue_with(vec![
            append("x", Lanes::DEFAULT),
            Update::new(
                Lanes::DEFAULT,
                0.0,
                UpdateTag::Replace,
                Payload::Value(Rc::new("fresh".to_string())),
            ),
            Update::new(Lanes::DEFAULT, 0.0, UpdateTag::Force, Payload::None),
        ]);
        let processed = queue.process(&Props::empty(), Lanes::DEFAULT);
        assert_eq!(text(&processed.state), "fresh");
        assert!(processed.has_force_update);
        assert!(!processed.did_capture);
    }

    #[test]
    fn capture_tag_is_reported() {
        let mut queue = queue_with(vec![Update::new(
            Lanes::SYNC,
            0.0,
            UpdateTag::Capture,
            Payload::Value(Rc::new("error".to_string())),
        )]);
        let processed = queue.process(&Props::empty(), Lanes::SYNC);
        assert!(processed.did_capture);
        assert_eq!(text(&processed.state), "error");
    }

    #[test]
    fn callbacks_collect_once() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let seen = Rc::clone(&calls);
        let update = append("a", Lanes::DEFAULT).with_callback(Rc::new(move || seen.set(seen.get() + 1)));
        let mut queue = queue_with(vec![append("s", Lanes::SYNC), update]);
        let first = queue.process(&Props::empty(), Lanes::SYNC);
        assert!(!first.has_callbacks);
        let second = queue.process(&Props::empty(), Lanes::DEFAULT);
        assert!(second.has_callbacks);
        for callback in queue.take_callbacks() {
            callback();
        }
        assert_eq!(calls.get(), 1);
        assert!(queue.take_callbacks().is_empty());
    }

    #[test]
    fn interleaved_updates_report_lanes_until_finished() {
        let mut queue = UpdateQueue::new(Rc::new(String::new()));
        queue
            .shared
            .borrow_mut()
            .interleaved
            .push_back(append("late", Lanes::TRANSITION_1));
        let processed = queue.process(&Props::empty(), Lanes::DEFAULT);
        assert_eq!(processed.remaining, Lanes::TRANSITION_1);
        assert!(queue.take_pending().is_empty());

        queue.shared.borrow_mut().finish_interleaved();
        let pending = queue.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].lane(), Lanes::TRANSITION_1);
    }

    #[test]
    fn work_clone_shares_pending_list() {
        let queue = UpdateQueue::new(Rc::new(String::new()));
        let clone = queue.clone_for_work();
        queue
            .shared
            .borrow_mut()
            .pending
            .push_back(append("a", Lanes::DEFAULT));
        assert_eq!(clone.take_pending().len(), 1);
        assert!(queue.take_pending().is_empty());
    }
}
