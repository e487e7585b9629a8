#![forbid(unsafe_code)]

//! The update channel: how state changes reach the reconciler.
//!
//! Updates are dispatched from places that cannot borrow the reconciler:
//! event handlers, effect callbacks, resource listeners. They are stamped
//! with a lane and an event time at dispatch and parked in an inbox. The
//! reconciler drains the inbox at its safe points (the start of every task
//! it runs, the end of every commit, and the end of every batching scope).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use fibre_scheduler::Clock;

use crate::fiber::{FiberId, Mode};
use crate::lane::{EventPriority, Lane, LaneAllocator, Lanes};
use crate::root::RootId;
use crate::update_queue::{Payload, StateValue, Update, UpdateCallback, UpdateTag};

/// Work delivered through the inbox.
pub(crate) enum Message {
    /// A state update for a fiber.
    Update { fiber: FiberId, update: Update },
    /// A wakeable a suspended render waited on has settled.
    Ping {
        root: RootId,
        wakeable: u64,
        lanes: Lanes,
    },
    /// A wakeable a boundary showing its fallback waited on has settled.
    Retry { boundary: FiberId, wakeable: u64 },
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Update { fiber, update } => f
                .debug_struct("Update")
                .field("fiber", fiber)
                .field("update", update)
                .finish(),
            Message::Ping {
                root,
                wakeable,
                lanes,
            } => f
                .debug_struct("Ping")
                .field("root", root)
                .field("wakeable", wakeable)
                .field("lanes", &lanes.label())
                .finish(),
            Message::Retry { boundary, wakeable } => f
                .debug_struct("Retry")
                .field("boundary", boundary)
                .field("wakeable", wakeable)
                .finish(),
        }
    }
}

/// Shared dispatch state: update priority, transition scope, inbox.
pub struct UpdateChannel {
    clock: Rc<dyn Clock>,
    inbox: RefCell<VecDeque<Message>>,
    update_priority: Cell<Option<EventPriority>>,
    transition_depth: Cell<u32>,
    transition_lane: Cell<Lanes>,
    allocator: Cell<LaneAllocator>,
    waker: RefCell<Option<Rc<dyn Fn()>>>,
}

impl UpdateChannel {
    pub(crate) fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            clock,
            inbox: RefCell::new(VecDeque::new()),
            update_priority: Cell::new(None),
            transition_depth: Cell::new(0),
            transition_lane: Cell::new(Lanes::empty()),
            allocator: Cell::new(LaneAllocator::default()),
            waker: RefCell::new(None),
        })
    }

    /// Lane for an update dispatched now on a fiber of `mode`.
    ///
    /// Non-concurrent fibers always get `SYNC`. Inside a transition scope
    /// every update shares one freshly claimed transition lane. Otherwise
    /// the current update priority decides, defaulting to `DEFAULT`.
    pub fn request_update_lane(&self, mode: Mode) -> Lane {
        if !mode.contains(Mode::CONCURRENT) {
            return Lanes::SYNC;
        }
        if self.transition_depth.get() > 0 {
            let cached = self.transition_lane.get();
            if !cached.is_empty() {
                return cached;
            }
            let lane = self.claim(LaneAllocator::claim_next_transition_lane);
            self.transition_lane.set(lane);
            return lane;
        }
        self.update_priority
            .get()
            .unwrap_or(EventPriority::Default)
            .lane()
    }

    /// Lane for retrying a suspense boundary.
    pub fn request_retry_lane(&self, mode: Mode) -> Lane {
        if !mode.contains(Mode::CONCURRENT) {
            return Lanes::SYNC;
        }
        self.claim(LaneAllocator::claim_next_retry_lane)
    }

    fn claim(&self, f: fn(&mut LaneAllocator) -> Lane) -> Lane {
        let mut allocator = self.allocator.get();
        let lane = f(&mut allocator);
        self.allocator.set(allocator);
        lane
    }

    pub fn request_event_time(&self) -> f64 {
        self.clock.now()
    }

    /// Current update priority, if a scope set one.
    pub fn update_priority(&self) -> Option<EventPriority> {
        self.update_priority.get()
    }

    /// Set the update priority, returning the previous one.
    pub fn set_update_priority(&self, priority: Option<EventPriority>) -> Option<EventPriority> {
        self.update_priority.replace(priority)
    }

    pub fn is_in_transition(&self) -> bool {
        self.transition_depth.get() > 0
    }

    pub(crate) fn enter_transition(&self) {
        self.transition_depth.set(self.transition_depth.get() + 1);
    }

    pub(crate) fn exit_transition(&self) {
        let depth = self.transition_depth.get().saturating_sub(1);
        self.transition_depth.set(depth);
        if depth == 0 {
            self.transition_lane.set(Lanes::empty());
        }
    }

    /// Called whenever a message arrives, so a host event loop can wake the
    /// reconciler without polling.
    pub fn set_waker(&self, waker: Option<Rc<dyn Fn()>>) {
        *self.waker.borrow_mut() = waker;
    }

    pub(crate) fn push(&self, message: Message) {
        tracing::trace!(?message, "update queued");
        self.inbox.borrow_mut().push_back(message);
        let waker = self.waker.borrow().clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    pub(crate) fn pop(&self) -> Option<Message> {
        self.inbox.borrow_mut().pop_front()
    }

    /// True when messages are waiting.
    pub fn has_pending(&self) -> bool {
        !self.inbox.borrow().is_empty()
    }
}

impl fmt::Debug for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateChannel")
            .field("pending", &self.inbox.borrow().len())
            .field("update_priority", &self.update_priority.get())
            .field("transition_depth", &self.transition_depth.get())
            .finish()
    }
}

/// Dispatches updates to one component's state.
///
/// Handles outlive renders; once the component unmounts (or the reconciler
/// is dropped) dispatching is a logged no-op.
#[derive(Clone)]
pub struct StateHandle {
    fiber: FiberId,
    mode: Mode,
    channel: Weak<UpdateChannel>,
}

impl StateHandle {
    pub(crate) fn new(fiber: FiberId, mode: Mode, channel: &Rc<UpdateChannel>) -> Self {
        Self {
            fiber,
            mode,
            channel: Rc::downgrade(channel),
        }
    }

    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    /// Replace the state with `value`.
    pub fn set<T: 'static>(&self, value: T) -> Option<Lane> {
        self.dispatch(UpdateTag::Update, Payload::Value(Rc::new(value)), None)
    }

    /// Compute the next state from the previous one.
    ///
    /// If the stored state is not a `T`, the update leaves it unchanged.
    pub fn update<T, F>(&self, f: F) -> Option<Lane>
    where
        T: 'static,
        F: Fn(&T) -> T + 'static,
    {
        let reducer = Rc::new(move |prev: &StateValue, _props: &crate::element::Props| {
            match prev.downcast_ref::<T>() {
                Some(prev) => Rc::new(f(prev)) as StateValue,
                None => Rc::clone(prev),
            }
        });
        self.dispatch(UpdateTag::Update, Payload::Reducer(reducer), None)
    }

    /// Re-render without changing state.
    pub fn force_update(&self) -> Option<Lane> {
        self.dispatch(UpdateTag::Force, Payload::None, None)
    }

    /// Queue an update with an explicit tag and an optional commit callback.
    ///
    /// Returns the lane the update was given, or `None` when the reconciler
    /// is gone.
    pub fn dispatch(
        &self,
        tag: UpdateTag,
        payload: Payload,
        callback: Option<UpdateCallback>,
    ) -> Option<Lane> {
        let Some(channel) = self.channel.upgrade() else {
            tracing::debug!("state update after reconciler was dropped");
            return None;
        };
        let lane = channel.request_update_lane(self.mode);
        let mut update = Update::new(lane, channel.request_event_time(), tag, payload);
        update.callback = callback;
        channel.push(Message::Update {
            fiber: self.fiber,
            update,
        });
        Some(lane)
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("fiber", &self.fiber)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibre_scheduler::ManualClock;
    use slotmap::SlotMap;

    fn channel() -> Rc<UpdateChannel> {
        UpdateChannel::new(Rc::new(ManualClock::new(0.0)))
    }

    #[test]
    fn legacy_mode_is_always_sync() {
        let channel = channel();
        channel.set_update_priority(Some(EventPriority::Idle));
        assert_eq!(channel.request_update_lane(Mode::empty()), Lanes::SYNC);
        assert_eq!(channel.request_update_lane(Mode::CONCURRENT), Lanes::IDLE);
    }

    #[test]
    fn transition_scope_shares_one_lane() {
        let channel = channel();
        channel.enter_transition();
        let a = channel.request_update_lane(Mode::CONCURRENT);
        let b = channel.request_update_lane(Mode::CONCURRENT);
        channel.exit_transition();
        assert_eq!(a, b);
        assert_eq!(a, Lanes::TRANSITION_1);
        channel.enter_transition();
        assert_eq!(channel.request_update_lane(Mode::CONCURRENT), Lanes::TRANSITION_2);
        channel.exit_transition();
        assert_eq!(channel.request_update_lane(Mode::CONCURRENT), Lanes::DEFAULT);
    }

    #[test]
    fn handles_queue_into_inbox() {
        let channel = channel();
        let mut arena: SlotMap<FiberId, ()> = SlotMap::with_key();
        let fiber = arena.insert(());
        let handle = StateHandle::new(fiber, Mode::CONCURRENT, &channel);
        assert_eq!(handle.set(5u32), Some(Lanes::DEFAULT));
        assert!(channel.has_pending());
        match channel.pop() {
            Some(Message::Update { fiber: f, update }) => {
                assert_eq!(f, fiber);
                assert_eq!(update.tag(), UpdateTag::Update);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(channel.pop().is_none());
    }

    #[test]
    fn dropped_channel_makes_dispatch_a_no_op() {
        let channel = channel();
        let mut arena: SlotMap<FiberId, ()> = SlotMap::with_key();
        let handle = StateHandle::new(arena.insert(()), Mode::CONCURRENT, &channel);
        drop(channel);
        assert_eq!(handle.force_update(), None);
    }

    #[test]
    fn waker_runs_on_push() {
        let channel = channel();
        let woke = Rc::new(Cell::new(0));
        let seen = Rc::clone(&woke);
        channel.set_waker(Some(Rc::new(move || seen.set(seen.get() + 1))));
        let mut arena: SlotMap<FiberId, ()> = SlotMap::with_key();
        let handle = StateHandle::new(arena.insert(()), Mode::empty(), &channel);
        handle.force_update();
        handle.force_update();
        assert_eq!(woke.get(), 2);
    }

    #[test]
    fn retry_lanes_rotate() {
        let channel = channel();
        assert_eq!(channel.request_retry_lane(Mode::CONCURRENT), Lanes::RETRY_1);
        assert_eq!(channel.request_retry_lane(Mode::CONCURRENT), Lanes::RETRY_2);
        assert_eq!(channel.request_retry_lane(Mode::empty()), Lanes::SYNC);
    }
}
