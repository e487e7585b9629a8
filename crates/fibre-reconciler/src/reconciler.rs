#![forbid(unsafe_code)]

//! The reconciler: owns every fiber and root, and drives renders and
//! commits through the scheduler.
//!
//! The logic is split across modules, each adding an `impl` block:
//!
//! | Module | Concern |
//! |--------|---------|
//! | `reconciler` | construction, public entry points, fiber allocation, update routing |
//! | `work_loop` | scheduling roots, render loops, finishing renders |
//! | `child_fiber` | diffing a parent's children |
//! | `begin_work` / `complete_work` | per-fiber render steps |
//! | `throw` | suspension and error capture during render |
//! | `commit` | the three commit passes and passive effects |

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use fibre_scheduler::{
    Clock, Scheduler, SchedulerConfig, SchedulerHost, TaskError, TaskHandle,
};
use slotmap::{SecondaryMap, SlotMap};
use tracing::{debug, warn};

use crate::channel::{Message, UpdateChannel};
use crate::context::ContextStack;
use crate::element::{Element, ElementType, Props};
use crate::error::{CapturedError, ReconcileError, ReconcileResult, invariant_violation};
use crate::fiber::{Fiber, FiberId, FiberState, Mode};
use crate::host::HostConfig;
use crate::lane::{EntanglementPolicy, EventPriority, Lane, Lanes};
use crate::root::{FiberRoot, RootId, RootTag};
use crate::update_queue::{Payload, SharedQueueRef, Update, UpdateCallback, UpdateQueue, UpdateTag};
use crate::work_loop::{RenderState, RootExitStatus};

/// Hook invoked with a captured error.
pub type ErrorHook = Rc<dyn Fn(&CapturedError)>;

/// Reconciler tuning.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `scheduler` | `SchedulerConfig::default()` | frame budget and yield policy |
/// | `nested_update_limit` | 50 | synchronous re-commits before [`ReconcileError::NestedUpdateLimit`] |
/// | `fallback_throttle_ms` | 500 | minimum time a retry keeps a fallback on screen |
/// | `retry_sync_on_error` | true | re-render synchronously once after a concurrent render errors |
/// | `entanglement` | both on | which lanes are rendered together |
#[derive(Clone)]
pub struct ReconcilerConfig {
    pub scheduler: SchedulerConfig,
    pub nested_update_limit: usize,
    pub fallback_throttle_ms: f64,
    pub retry_sync_on_error: bool,
    pub entanglement: EntanglementPolicy,
    /// Called for errors that reached a root.
    pub on_uncaught_error: Option<ErrorHook>,
    /// Called for errors the synchronous retry recovered from.
    pub on_recoverable_error: Option<ErrorHook>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            nested_update_limit: 50,
            fallback_throttle_ms: 500.0,
            retry_sync_on_error: true,
            entanglement: EntanglementPolicy::default(),
            on_uncaught_error: None,
            on_recoverable_error: None,
        }
    }
}

impl fmt::Debug for ReconcilerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcilerConfig")
            .field("scheduler", &self.scheduler)
            .field("nested_update_limit", &self.nested_update_limit)
            .field("fallback_throttle_ms", &self.fallback_throttle_ms)
            .field("retry_sync_on_error", &self.retry_sync_on_error)
            .field("entanglement", &self.entanglement)
            .field("on_uncaught_error", &self.on_uncaught_error.is_some())
            .field("on_recoverable_error", &self.on_recoverable_error.is_some())
            .finish()
    }
}

/// How a root is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootOptions {
    pub tag: RootTag,
    /// Render every component twice to surface impure renders.
    pub strict: bool,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            tag: RootTag::Concurrent,
            strict: false,
        }
    }
}

bitflags! {
    /// What the reconciler is currently doing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ExecutionContext: u8 {
        const BATCHED = 1 << 0;
        const RENDER = 1 << 1;
        const COMMIT = 1 << 2;
    }
}

/// Where a host node is inserted or removed.
pub(crate) enum HostParent<H: HostConfig> {
    Instance(H::Instance),
    Container(H::Container),
}

/// Reconciles element trees into a host tree.
pub struct Reconciler<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) config: ReconcilerConfig,
    pub(crate) scheduler: Scheduler<Self>,
    pub(crate) channel: Rc<UpdateChannel>,

    pub(crate) fibers: SlotMap<FiberId, Fiber>,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H::Container>>,
    pub(crate) instances: SecondaryMap<FiberId, H::Instance>,
    pub(crate) payloads: SecondaryMap<FiberId, H::UpdatePayload>,

    pub(crate) execution_context: ExecutionContext,
    pub(crate) render: RenderState,
    pub(crate) contexts: ContextStack,
    /// Fibers allocated by renders that are not yet part of a committed tree.
    pub(crate) render_allocations: Vec<FiberId>,
    /// Shared queues holding interleaved updates.
    pub(crate) concurrent_queues: Vec<SharedQueueRef>,

    pub(crate) sync_queue: Vec<RootId>,
    pub(crate) is_flushing_sync: bool,
    pub(crate) sync_flush_task: Option<TaskHandle>,

    pub(crate) root_does_have_passive_effects: bool,
    pub(crate) root_with_pending_passive_effects: Option<RootId>,
    pub(crate) pending_passive_effects_lanes: Lanes,
    pub(crate) passive_task: Option<TaskHandle>,

    pub(crate) nested_update_count: usize,
    pub(crate) root_with_nested_updates: Option<RootId>,
    pub(crate) most_recent_fallback_time: f64,
    pub(crate) retry_listeners: HashSet<(FiberId, u64)>,

    pub(crate) recoverable_errors: Vec<CapturedError>,
    /// Filled by root error callbacks during layout.
    pub(crate) uncaught: Rc<RefCell<Vec<CapturedError>>>,
    pub(crate) uncaught_log: Vec<CapturedError>,
}

impl<H: HostConfig> SchedulerHost for Reconciler<H> {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

impl<H: HostConfig> Reconciler<H> {
    pub fn new(host: H, clock: Rc<dyn Clock>) -> Self {
        Self::with_config(host, clock, ReconcilerConfig::default())
    }

    pub fn with_config(host: H, clock: Rc<dyn Clock>, config: ReconcilerConfig) -> Self {
        let scheduler = Scheduler::new(config.scheduler.clone(), Rc::clone(&clock));
        Self {
            host,
            scheduler,
            channel: UpdateChannel::new(clock),
            config,
            fibers: SlotMap::with_key(),
            roots: SlotMap::with_key(),
            instances: SecondaryMap::new(),
            payloads: SecondaryMap::new(),
            execution_context: ExecutionContext::empty(),
            render: RenderState::default(),
            contexts: ContextStack::default(),
            render_allocations: Vec::new(),
            concurrent_queues: Vec::new(),
            sync_queue: Vec::new(),
            is_flushing_sync: false,
            sync_flush_task: None,
            root_does_have_passive_effects: false,
            root_with_pending_passive_effects: None,
            pending_passive_effects_lanes: Lanes::empty(),
            passive_task: None,
            nested_update_count: 0,
            root_with_nested_updates: None,
            most_recent_fallback_time: 0.0,
            retry_listeners: HashSet::new(),
            recoverable_errors: Vec::new(),
            uncaught: Rc::new(RefCell::new(Vec::new())),
            uncaught_log: Vec::new(),
        }
    }

    // ---- roots and entry points -------------------------------------------

    /// Create a concurrent root rendering into `container`.
    pub fn create_root(&mut self, container: H::Container) -> RootId {
        self.create_root_with(container, RootOptions::default())
    }

    /// Create a root where every update renders synchronously.
    pub fn create_legacy_root(&mut self, container: H::Container) -> RootId {
        self.create_root_with(
            container,
            RootOptions {
                tag: RootTag::Legacy,
                strict: false,
            },
        )
    }

    pub fn create_root_with(&mut self, container: H::Container, options: RootOptions) -> RootId {
        let mut mode = match options.tag {
            RootTag::Concurrent => Mode::CONCURRENT,
            RootTag::Legacy => Mode::empty(),
        };
        if options.strict {
            mode |= Mode::STRICT;
        }
        let initial: Rc<Element> = Rc::new(Element::Empty);
        let mut fiber = Fiber::new(ElementType::Root, Props::empty(), None, mode);
        fiber.update_queue = Some(UpdateQueue::new(initial.clone()));
        fiber.memoized_state = FiberState::State(initial);
        let current = self.fibers.insert(fiber);
        let root = self
            .roots
            .insert(FiberRoot::new(options.tag, container, current));
        self.node_mut(current).root = Some(root);
        debug!(?root, tag = ?options.tag, "root created");
        root
    }

    /// Schedule `element` as the new content of `root`.
    ///
    /// `callback` runs in the layout pass of the commit that shows it.
    /// Returns the lane the update was given.
    pub fn update_container(
        &mut self,
        root: RootId,
        element: Element,
        callback: Option<UpdateCallback>,
    ) -> ReconcileResult<Lane> {
        let Some(current) = self.roots.get(root).map(|r| r.current) else {
            return Err(ReconcileError::InvalidTree(format!("unknown root {root:?}")));
        };
        let lane = self.request_update_lane(current);
        let event_time = self.request_event_time();
        let mut update = Update::new(
            lane,
            event_time,
            UpdateTag::Update,
            Payload::Value(Rc::new(element)),
        );
        update.callback = callback;
        self.dispatch_update(current, update)?;
        Ok(lane)
    }

    /// [`update_container`](Self::update_container) without a callback.
    pub fn render(&mut self, root: RootId, element: Element) -> ReconcileResult<Lane> {
        self.update_container(root, element, None)
    }

    /// Remove everything `root` rendered, synchronously.
    pub fn unmount(&mut self, root: RootId) -> ReconcileResult<()> {
        self.flush_sync(|r| r.update_container(root, Element::Empty, None))?
            .map(|_| ())
    }

    /// Lane an update on `fiber` dispatched right now would get.
    pub fn request_update_lane(&self, fiber: FiberId) -> Lane {
        let mode = self
            .fibers
            .get(fiber)
            .map(|f| f.mode)
            .unwrap_or(Mode::CONCURRENT);
        self.channel.request_update_lane(mode)
    }

    pub fn request_event_time(&self) -> f64 {
        self.channel.request_event_time()
    }

    // ---- execution scopes -------------------------------------------------

    /// Run `f` with updates buffered until it returns.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> ReconcileResult<R> {
        let previous = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let out = f(self);
        self.execution_context = previous;
        if self.execution_context.is_empty() {
            self.process_inbox()?;
            self.flush_sync_callbacks_only_in_legacy_mode()?;
        }
        Ok(out)
    }

    /// Run `f` as a discrete event (click, key press): updates get `SYNC`
    /// and are flushed when the outermost scope exits.
    pub fn discrete_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> ReconcileResult<R> {
        let previous = self.channel.set_update_priority(Some(EventPriority::Discrete));
        let out = self.batched_updates(f);
        self.channel.set_update_priority(previous);
        let out = out?;
        if self.execution_context.is_empty() {
            self.flush_sync_callbacks()?;
        }
        Ok(out)
    }

    /// Run `f` and synchronously render and commit whatever it scheduled.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> ReconcileResult<R> {
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let previous = self.channel.set_update_priority(Some(EventPriority::Discrete));
        let out = f(self);
        self.channel.set_update_priority(previous);
        self.execution_context = previous_context;
        if !self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            self.process_inbox()?;
            self.flush_sync_callbacks()?;
        }
        Ok(out)
    }

    /// Run `f` with its updates marked as a transition.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> ReconcileResult<R> {
        self.channel.enter_transition();
        let out = f(self);
        self.channel.exit_transition();
        if self.execution_context.is_empty() {
            self.process_inbox()?;
        }
        Ok(out)
    }

    /// Run `f` with `priority` as the current update priority.
    pub fn with_event_priority<R>(
        &mut self,
        priority: EventPriority,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let previous = self.channel.set_update_priority(Some(priority));
        let out = f(self);
        self.channel.set_update_priority(previous);
        out
    }

    // ---- update routing ---------------------------------------------------

    /// Route every dispatched message to its fiber or root.
    ///
    /// Must not be called while rendering.
    pub fn process_inbox(&mut self) -> ReconcileResult<()> {
        if self.execution_context.contains(ExecutionContext::RENDER) {
            invariant_violation("inbox processed during render");
        }
        while let Some(message) = self.channel.pop() {
            match message {
                Message::Update { fiber, update } => self.dispatch_update(fiber, update)?,
                Message::Ping {
                    root,
                    wakeable,
                    lanes,
                } => self.ping_suspended_root(root, wakeable, lanes),
                Message::Retry { boundary, wakeable } => {
                    self.resolve_retry_wakeable(boundary, wakeable)
                }
            }
        }
        Ok(())
    }

    /// Queue `update` on `fiber` and schedule its root.
    pub(crate) fn dispatch_update(&mut self, fiber: FiberId, update: Update) -> ReconcileResult<()> {
        let lane = update.lane;
        let event_time = update.event_time;
        let Some(root) = self.enqueue_update(fiber, update) else {
            warn!(?fiber, "update on an unmounted component ignored");
            return Ok(());
        };
        self.schedule_update_on_root(root, lane, event_time)?;
        if let Some(shared) = self
            .fibers
            .get(fiber)
            .and_then(|f| f.update_queue.as_ref())
            .map(|q| Rc::clone(&q.shared))
        {
            self.entangle_transitions(root, &shared, lane);
        }
        Ok(())
    }

    /// Append `update` to the fiber's shared queue and mark its lane up to
    /// the root. Returns the root, or `None` when the fiber is unmounted.
    pub(crate) fn enqueue_update(&mut self, fiber: FiberId, update: Update) -> Option<RootId> {
        let lane = update.lane;
        let fiber_ref = self.fibers.get(fiber)?;
        let queue = fiber_ref.update_queue.as_ref()?;
        let shared = Rc::clone(&queue.shared);
        let interleaved = self.render.root.is_some()
            && fiber_ref.mode.contains(Mode::CONCURRENT)
            && !self.execution_context.contains(ExecutionContext::RENDER);
        if interleaved {
            shared.borrow_mut().interleaved.push_back(update);
            if !self.concurrent_queues.iter().any(|q| Rc::ptr_eq(q, &shared)) {
                self.concurrent_queues.push(shared);
            }
        } else {
            shared.borrow_mut().pending.push_back(update);
        }
        self.mark_update_lane_from_fiber_to_root(fiber, lane)
    }

    /// Move interleaved updates onto the pending lists.
    pub(crate) fn finish_queueing_concurrent_updates(&mut self) {
        for queue in self.concurrent_queues.drain(..) {
            queue.borrow_mut().finish_interleaved();
        }
    }

    /// Mark `lane` on `fiber` (both generations) and as child work on every
    /// ancestor. Returns the root the walk ended at.
    pub(crate) fn mark_update_lane_from_fiber_to_root(
        &mut self,
        fiber: FiberId,
        lane: Lane,
    ) -> Option<RootId> {
        let mut node = fiber;
        {
            let f = self.fibers.get_mut(node)?;
            f.lanes |= lane;
            let alternate = f.alternate;
            if let Some(alt) = alternate.and_then(|a| self.fibers.get_mut(a)) {
                alt.lanes |= lane;
            }
        }
        while let Some(parent) = self.fibers.get(node).and_then(|f| f.ret) {
            let p = self.fibers.get_mut(parent)?;
            p.child_lanes |= lane;
            let alternate = p.alternate;
            if let Some(alt) = alternate.and_then(|a| self.fibers.get_mut(a)) {
                alt.child_lanes |= lane;
            }
            node = parent;
        }
        self.fibers.get(node).and_then(|f| f.root)
    }

    /// Mark `lane` pending from `fiber` up and make sure its root renders.
    pub fn schedule_update_on_fiber(
        &mut self,
        fiber: FiberId,
        lane: Lane,
        event_time: f64,
    ) -> ReconcileResult<()> {
        let lane = lane.highest_priority_lane();
        if lane.is_empty() {
            return Ok(());
        }
        match self.mark_update_lane_from_fiber_to_root(fiber, lane) {
            Some(root) => self.schedule_update_on_root(root, lane, event_time),
            None => {
                warn!(?fiber, "update on an unmounted component ignored");
                Ok(())
            }
        }
    }

    pub(crate) fn schedule_update_on_root(
        &mut self,
        root: RootId,
        lane: Lane,
        event_time: f64,
    ) -> ReconcileResult<()> {
        self.check_for_nested_updates()?;
        self.root_mut(root).lanes.mark_updated(lane, event_time);
        if self.render.root == Some(root) {
            if !self.execution_context.contains(ExecutionContext::RENDER) {
                self.render.interleaved_updated_lanes |= lane;
            }
            if self.render.exit_status == RootExitStatus::SuspendedWithDelay {
                let lanes = self.render.lanes;
                self.root_mut(root).lanes.mark_suspended(lanes);
            }
        }
        self.ensure_root_is_scheduled(root, event_time);
        if lane == Lanes::SYNC
            && self.execution_context.is_empty()
            && self.root_ref(root).tag == RootTag::Legacy
        {
            self.flush_sync_callbacks_only_in_legacy_mode()?;
        }
        Ok(())
    }

    fn check_for_nested_updates(&mut self) -> ReconcileResult<()> {
        let limit = self.config.nested_update_limit;
        if self.nested_update_count > limit {
            self.nested_update_count = 0;
            self.root_with_nested_updates = None;
            warn!(limit, "nested update limit exceeded");
            return Err(ReconcileError::NestedUpdateLimit { limit });
        }
        Ok(())
    }

    /// Transition updates on one queue must finish together.
    fn entangle_transitions(&mut self, root: RootId, shared: &SharedQueueRef, lane: Lane) {
        if !self.config.entanglement.queue_transitions || !Lanes::TRANSITIONS.contains(lane) {
            return;
        }
        let pending = self.root_ref(root).lanes.pending;
        let queue_lanes = {
            let mut queue = shared.borrow_mut();
            queue.lanes = (queue.lanes & pending) | lane;
            queue.lanes
        };
        self.root_mut(root).lanes.mark_entangled(queue_lanes);
    }

    // ---- fiber arena ------------------------------------------------------

    #[track_caller]
    pub(crate) fn node(&self, id: FiberId) -> &Fiber {
        match self.fibers.get(id) {
            Some(fiber) => fiber,
            None => invariant_violation("dangling fiber id"),
        }
    }

    #[track_caller]
    pub(crate) fn node_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.fibers.get_mut(id) {
            Some(fiber) => fiber,
            None => invariant_violation("dangling fiber id"),
        }
    }

    #[track_caller]
    pub(crate) fn root_ref(&self, id: RootId) -> &FiberRoot<H::Container> {
        match self.roots.get(id) {
            Some(root) => root,
            None => invariant_violation("dangling root id"),
        }
    }

    #[track_caller]
    pub(crate) fn root_mut(&mut self, id: RootId) -> &mut FiberRoot<H::Container> {
        match self.roots.get_mut(id) {
            Some(root) => root,
            None => invariant_violation("dangling root id"),
        }
    }

    /// Insert a fiber created during render.
    pub(crate) fn alloc_fiber(&mut self, fiber: Fiber) -> FiberId {
        let id = self.fibers.insert(fiber);
        self.render_allocations.push(id);
        id
    }

    /// Work-in-progress twin of `current` with `pending_props`, reusing the
    /// alternate when there is one.
    pub(crate) fn create_work_in_progress(&mut self, current: FiberId, pending_props: Props) -> FiberId {
        let wip = match self.node(current).alternate {
            Some(wip) if self.fibers.contains_key(wip) => {
                let element_type = self.node(current).element_type.clone();
                let f = self.node_mut(wip);
                f.pending_props = pending_props;
                f.element_type = element_type;
                f.flags = Default::default();
                f.subtree_flags = Default::default();
                f.deletions.clear();
                wip
            }
            _ => {
                let cur = self.node(current);
                let mut fiber = Fiber::new(
                    cur.element_type.clone(),
                    pending_props,
                    cur.key.clone(),
                    cur.mode,
                );
                fiber.alternate = Some(current);
                fiber.root = cur.root;
                let wip = self.alloc_fiber(fiber);
                self.node_mut(current).alternate = Some(wip);
                wip
            }
        };

        let cur = self.node(current);
        let lanes = cur.lanes;
        let child_lanes = cur.child_lanes;
        let child = cur.child;
        let sibling = cur.sibling;
        let index = cur.index;
        let memoized_props = cur.memoized_props.clone();
        let memoized_state = cur.memoized_state.clone();
        let update_queue = cur.update_queue.as_ref().map(UpdateQueue::clone_for_work);
        let dependencies = cur.dependencies.clone();
        let effects = cur.effects.clone();
        let node_ref = cur.node_ref.clone();

        let f = self.node_mut(wip);
        f.lanes = lanes;
        f.child_lanes = child_lanes;
        f.child = child;
        f.sibling = sibling;
        f.index = index;
        f.memoized_props = memoized_props;
        f.memoized_state = memoized_state;
        f.update_queue = update_queue;
        f.dependencies = dependencies;
        f.effects = effects;
        f.node_ref = node_ref;
        f.retries.clear();

        if let Some(instance) = self.instances.get(current).cloned() {
            self.instances.insert(wip, instance);
        }
        wip
    }

    /// Drop a fiber and everything the reconciler keeps for it.
    pub(crate) fn release_fiber(&mut self, id: FiberId) {
        if let Some(instance) = self.instances.remove(id) {
            self.host.detach_deleted_instance(&instance);
        }
        self.payloads.remove(id);
        self.fibers.remove(id);
    }

    /// Remove fibers built by renders that never made it into a tree.
    ///
    /// Allocations reachable only from an uncommitted tree stay tracked.
    pub(crate) fn sweep_orphans(&mut self) {
        if self.render_allocations.is_empty() {
            return;
        }
        let mut visited = HashSet::new();
        let mut committed = HashSet::new();
        let currents: Vec<FiberId> = self.roots.values().map(|r| r.current).collect();
        for &current in &currents {
            self.mark_reachable(current, &mut visited, &mut committed);
        }
        let mut live = committed.clone();
        for &current in &currents {
            if let Some(alternate) = self.fibers.get(current).and_then(|f| f.alternate) {
                self.mark_reachable(alternate, &mut visited, &mut live);
            }
        }
        let mut swept = 0usize;
        for id in std::mem::take(&mut self.render_allocations) {
            if committed.contains(&id) || !self.fibers.contains_key(id) {
                continue;
            }
            if live.contains(&id) {
                self.render_allocations.push(id);
                continue;
            }
            self.release_fiber(id);
            swept += 1;
        }
        if swept > 0 {
            debug!(swept, "orphan fibers released");
        }
    }

    fn mark_reachable(
        &self,
        start: FiberId,
        visited: &mut HashSet<FiberId>,
        reachable: &mut HashSet<FiberId>,
    ) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            reachable.insert(id);
            if let Some(alternate) = fiber.alternate {
                reachable.insert(alternate);
            }
            stack.extend(fiber.child);
            stack.extend(fiber.sibling);
            stack.extend(fiber.deletions.iter().copied());
        }
    }

    // ---- inspection -------------------------------------------------------

    /// Check the pointer structure of the committed tree of `root`.
    pub fn validate_tree(&self, root: RootId) -> ReconcileResult<()> {
        let invalid = |msg: String| Err(ReconcileError::InvalidTree(msg));
        let Some(root_ref) = self.roots.get(root) else {
            return invalid(format!("unknown root {root:?}"));
        };
        let mut stack = vec![root_ref.current];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                return invalid(format!("dangling fiber {id:?}"));
            };
            if let Some(alternate) = fiber.alternate {
                if let Some(alt) = self.fibers.get(alternate) {
                    if alt.alternate != Some(id) {
                        return invalid(format!("{id:?} and its alternate disagree"));
                    }
                }
            }
            let mut child = fiber.child;
            let mut index = 0usize;
            while let Some(c) = child {
                let Some(child_fiber) = self.fibers.get(c) else {
                    return invalid(format!("{id:?} has a dangling child"));
                };
                let parent_ok = child_fiber.ret == Some(id)
                    || (fiber.alternate.is_some() && child_fiber.ret == fiber.alternate);
                if !parent_ok {
                    return invalid(format!("{c:?} does not point back at {id:?}"));
                }
                index += 1;
                if index > self.fibers.len() {
                    return invalid(format!("sibling cycle under {id:?}"));
                }
                stack.push(c);
                child = child_fiber.sibling;
            }
        }
        Ok(())
    }

    /// Number of live fibers, both generations.
    pub fn fiber_count(&self) -> usize {
        self.fibers.len()
    }

    pub fn fiber(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub fn root(&self, id: RootId) -> Option<&FiberRoot<H::Container>> {
        self.roots.get(id)
    }

    /// Host instance owned by a host fiber.
    pub fn instance(&self, id: FiberId) -> Option<&H::Instance> {
        self.instances.get(id)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scheduler(&self) -> &Scheduler<Self> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }

    pub fn channel(&self) -> &Rc<UpdateChannel> {
        &self.channel
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.scheduler.now()
    }

    /// True while a render is started but not finished.
    pub fn is_rendering(&self) -> bool {
        self.render.root.is_some()
    }

    pub fn has_pending_passive_effects(&self) -> bool {
        self.root_with_pending_passive_effects.is_some()
    }

    /// Errors that reached a root, oldest first, since the last call.
    pub fn take_uncaught_errors(&mut self) -> Vec<CapturedError> {
        std::mem::take(&mut self.uncaught_log)
    }
}

/// Wrap a reconciler failure for the scheduler.
pub(crate) fn task_error(err: ReconcileError) -> TaskError {
    match err {
        ReconcileError::Task(inner) => inner,
        other => TaskError::from_source("reconciler", other),
    }
}

impl<H: HostConfig> fmt::Debug for Reconciler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("roots", &self.roots.len())
            .field("fibers", &self.fibers.len())
            .field("rendering", &self.render.root)
            .field("execution_context", &self.execution_context)
            .finish()
    }
}
