#![forbid(unsafe_code)]

//! Scheduling roots and running renders.
//!
//! A root has at most one scheduled task. Synchronous work goes through a
//! private queue that is flushed at the end of commits and scopes (and by an
//! `Immediate` scheduler task as a fallback). Everything else is rendered by
//! a scheduler task at the priority of its most urgent lane, which yields
//! between units of work and returns itself as a continuation.

use fibre_scheduler::{PriorityLevel, TaskResult, TaskStatus};
use tracing::{debug, debug_span, trace};

use crate::error::{CapturedError, Interrupt, ReconcileError, ReconcileResult, invariant_violation};
use crate::fiber::{FiberId, Flags};
use crate::host::HostConfig;
use crate::lane::{EventPriority, Lanes};
use crate::reconciler::{ExecutionContext, Reconciler, task_error};
use crate::root::{RootId, RootTag};

/// How a render ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum RootExitStatus {
    #[default]
    InProgress,
    /// Nothing could capture an error, not even the root.
    FatalErrored,
    /// A boundary captured an error.
    Errored,
    /// A boundary switched to its fallback.
    Suspended,
    /// Visible content would be replaced by a fallback.
    SuspendedWithDelay,
    Completed,
    /// Something suspended outside any boundary; nothing to commit.
    DidNotComplete,
}

/// State of the render in progress. One render runs at a time.
#[derive(Default)]
pub(crate) struct RenderState {
    pub(crate) root: Option<RootId>,
    /// Next unit of work.
    pub(crate) wip: Option<FiberId>,
    pub(crate) lanes: Lanes,
    pub(crate) exit_status: RootExitStatus,
    pub(crate) fatal_error: Option<CapturedError>,
    /// Lanes of updates skipped by this render.
    pub(crate) skipped_lanes: Lanes,
    /// Lanes of updates dispatched while this render was paused.
    pub(crate) interleaved_updated_lanes: Lanes,
    /// Errors captured during this render.
    pub(crate) concurrent_errors: Vec<CapturedError>,
}

impl<H: HostConfig> Reconciler<H> {
    // ---- scheduling -------------------------------------------------------

    /// Make sure `root` has exactly one task, at the priority of its most
    /// urgent pending lane.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root: RootId, current_time: f64) {
        let wip_lanes = if self.render.root == Some(root) {
            self.render.lanes
        } else {
            Lanes::empty()
        };
        let Some(r) = self.roots.get_mut(root) else {
            return;
        };
        r.lanes.mark_starved_lanes_as_expired(current_time);
        let next = r.lanes.next_lanes(wip_lanes, &self.config.entanglement);
        let existing = r.callback_node;

        if next.is_empty() {
            r.callback_node = None;
            r.callback_priority = Lanes::empty();
            if let Some(handle) = existing {
                self.scheduler.cancel_callback(handle);
            }
            return;
        }

        let new_priority = next.highest_priority_lane();
        let existing_alive = existing.is_some_and(|h| self.scheduler.is_pending(h));
        if r.callback_priority == new_priority && (existing_alive || new_priority == Lanes::SYNC) {
            return;
        }
        if let Some(handle) = existing {
            self.scheduler.cancel_callback(handle);
        }

        let callback_node = if new_priority == Lanes::SYNC {
            self.sync_queue.push(root);
            self.schedule_sync_flush();
            None
        } else {
            let priority = EventPriority::from_lanes(next).scheduler_priority();
            Some(self.scheduler.schedule_callback(priority, move |r: &mut Self, did_timeout| {
                r.perform_concurrent_work_on_root(root, did_timeout)
            }))
        };
        trace!(?root, lanes = next.label(), "root scheduled");
        let r = self.root_mut(root);
        r.callback_priority = new_priority;
        r.callback_node = callback_node;
    }

    fn schedule_sync_flush(&mut self) {
        if self
            .sync_flush_task
            .is_some_and(|h| self.scheduler.is_pending(h))
        {
            return;
        }
        let handle = self
            .scheduler
            .schedule_callback(PriorityLevel::Immediate, |r: &mut Self, _| {
                r.sync_flush_task = None;
                r.flush_sync_callbacks().map_err(task_error)?;
                Ok(TaskStatus::Complete)
            });
        self.sync_flush_task = Some(handle);
    }

    /// Render and commit every root with synchronous work queued.
    pub fn flush_sync_callbacks(&mut self) -> ReconcileResult<()> {
        if self.is_flushing_sync || self.sync_queue.is_empty() {
            return Ok(());
        }
        self.is_flushing_sync = true;
        let previous = self.channel.set_update_priority(Some(EventPriority::Discrete));
        let mut result = Ok(());
        let mut index = 0;
        while index < self.sync_queue.len() {
            let root = self.sync_queue[index];
            index += 1;
            if let Err(err) = self.perform_sync_work_on_root(root) {
                result = Err(err);
                break;
            }
        }
        self.sync_queue.drain(..index);
        if !self.sync_queue.is_empty() {
            self.schedule_sync_flush();
        }
        self.channel.set_update_priority(previous);
        self.is_flushing_sync = false;
        result
    }

    pub(crate) fn flush_sync_callbacks_only_in_legacy_mode(&mut self) -> ReconcileResult<()> {
        let has_legacy = self.sync_queue.iter().any(|&root| {
            self.roots
                .get(root)
                .is_some_and(|r| r.tag == RootTag::Legacy)
        });
        if has_legacy {
            self.flush_sync_callbacks()?;
        }
        Ok(())
    }

    // ---- root entry points ------------------------------------------------

    /// Scheduler task body for a non-sync render of `root`.
    pub(crate) fn perform_concurrent_work_on_root(
        &mut self,
        root: RootId,
        did_timeout: bool,
    ) -> TaskResult<TaskStatus<Self>> {
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            invariant_violation("render task started while already working");
        }
        let Some(original) = self.roots.get(root).map(|r| r.callback_node) else {
            return Ok(TaskStatus::Complete);
        };

        self.process_inbox().map_err(task_error)?;
        self.flush_passive_effects().map_err(task_error)?;
        if self.root_ref(root).callback_node != original {
            // A different task took over.
            return Ok(TaskStatus::Complete);
        }

        let wip_lanes = if self.render.root == Some(root) {
            self.render.lanes
        } else {
            Lanes::empty()
        };
        let mut lanes = self
            .root_ref(root)
            .lanes
            .next_lanes(wip_lanes, &self.config.entanglement);
        if lanes.is_empty() {
            return Ok(TaskStatus::Complete);
        }

        let should_time_slice = !lanes.includes_blocking_lane()
            && !self.root_ref(root).lanes.includes_expired_lane(lanes)
            && !did_timeout;
        let mut exit = if should_time_slice {
            self.render_root_concurrent(root, lanes)
        } else {
            self.render_root_sync(root, lanes)
        };

        if exit != RootExitStatus::InProgress {
            if exit == RootExitStatus::Errored && self.config.retry_sync_on_error {
                let retry_lanes = self.root_ref(root).lanes.lanes_to_retry_on_error();
                if !retry_lanes.is_empty() {
                    lanes = retry_lanes;
                    exit = self.recover_from_concurrent_error(root, retry_lanes);
                }
            }
            match exit {
                RootExitStatus::FatalErrored => {
                    let err = self.handle_fatal_render(root, lanes);
                    return Err(task_error(err));
                }
                RootExitStatus::DidNotComplete => {
                    self.root_mut(root).lanes.mark_suspended(lanes);
                }
                _ => {
                    let finished = self.node(self.root_ref(root).current).alternate;
                    let r = self.root_mut(root);
                    r.finished_work = finished;
                    r.finished_lanes = lanes;
                    self.finish_concurrent_render(root, exit, lanes)
                        .map_err(task_error)?;
                }
            }
        }

        let now = self.now();
        self.ensure_root_is_scheduled(root, now);
        let current = self.roots.get(root).and_then(|r| r.callback_node);
        if original.is_some() && current == original {
            return Ok(TaskStatus::continue_with(move |r: &mut Self, did_timeout| {
                r.perform_concurrent_work_on_root(root, did_timeout)
            }));
        }
        Ok(TaskStatus::Complete)
    }

    /// Render and commit the sync lane of `root`.
    pub(crate) fn perform_sync_work_on_root(&mut self, root: RootId) -> ReconcileResult<()> {
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            invariant_violation("sync render started while already working");
        }
        if !self.roots.contains_key(root) {
            return Ok(());
        }
        self.flush_passive_effects()?;

        let mut lanes = self
            .root_ref(root)
            .lanes
            .next_lanes(Lanes::empty(), &self.config.entanglement);
        if !lanes.contains(Lanes::SYNC) {
            let now = self.now();
            self.ensure_root_is_scheduled(root, now);
            return Ok(());
        }

        let mut exit = self.render_root_sync(root, lanes);
        if self.root_ref(root).tag != RootTag::Legacy
            && exit == RootExitStatus::Errored
            && self.config.retry_sync_on_error
        {
            let retry_lanes = self.root_ref(root).lanes.lanes_to_retry_on_error();
            if !retry_lanes.is_empty() {
                lanes = retry_lanes;
                exit = self.recover_from_concurrent_error(root, retry_lanes);
            }
        }
        match exit {
            RootExitStatus::FatalErrored => return Err(self.handle_fatal_render(root, lanes)),
            RootExitStatus::DidNotComplete => {
                invariant_violation("synchronous render did not complete")
            }
            _ => {}
        }

        let finished = self.node(self.root_ref(root).current).alternate;
        let r = self.root_mut(root);
        r.finished_work = finished;
        r.finished_lanes = lanes;
        let committed = self.commit_root(root);
        let now = self.now();
        self.ensure_root_is_scheduled(root, now);
        committed
    }

    fn handle_fatal_render(&mut self, root: RootId, lanes: Lanes) -> ReconcileError {
        let fatal = self.render.fatal_error.take();
        self.discard_render();
        self.root_mut(root).lanes.mark_suspended(lanes);
        let now = self.now();
        self.ensure_root_is_scheduled(root, now);
        match fatal {
            Some(err) => {
                self.uncaught_log.push(err.clone());
                ReconcileError::Uncaught(err)
            }
            None => invariant_violation("fatal render without an error"),
        }
    }

    /// Render `lanes` again synchronously after a concurrent render errored.
    /// The first attempt's errors are reported as recoverable if the retry
    /// does not error.
    fn recover_from_concurrent_error(&mut self, root: RootId, lanes: Lanes) -> RootExitStatus {
        let first_attempt = std::mem::take(&mut self.render.concurrent_errors);
        debug!(?root, lanes = lanes.label(), "retrying errored render synchronously");
        let exit = self.render_root_sync(root, lanes);
        if exit != RootExitStatus::Errored {
            self.recoverable_errors.extend(first_attempt);
        }
        exit
    }

    fn finish_concurrent_render(
        &mut self,
        root: RootId,
        exit: RootExitStatus,
        lanes: Lanes,
    ) -> ReconcileResult<()> {
        match exit {
            RootExitStatus::Errored | RootExitStatus::Completed => self.commit_root(root),
            RootExitStatus::Suspended => {
                self.root_mut(root).lanes.mark_suspended(lanes);
                if lanes.includes_only_retries() {
                    let ms_until_timeout = self.most_recent_fallback_time
                        + self.config.fallback_throttle_ms
                        - self.now();
                    if ms_until_timeout > 10.0 {
                        let next = self
                            .root_ref(root)
                            .lanes
                            .next_lanes(Lanes::empty(), &self.config.entanglement);
                        if !next.is_empty() {
                            // Other work is pending; it will render first.
                            return Ok(());
                        }
                        debug!(?root, ms_until_timeout, "fallback throttled");
                        let handle = self.scheduler.schedule_delayed(
                            PriorityLevel::Normal,
                            ms_until_timeout,
                            move |r: &mut Self, _| {
                                if let Some(root_ref) = r.roots.get_mut(root) {
                                    root_ref.timeout_handle = None;
                                }
                                r.commit_root(root).map_err(task_error)?;
                                Ok(TaskStatus::Complete)
                            },
                        );
                        self.root_mut(root).timeout_handle = Some(handle);
                        return Ok(());
                    }
                }
                self.commit_root(root)
            }
            RootExitStatus::SuspendedWithDelay => {
                self.root_mut(root).lanes.mark_suspended(lanes);
                if lanes.includes_only_transitions() {
                    debug!(?root, "transition suspended; keeping current content");
                    return Ok(());
                }
                self.commit_root(root)
            }
            RootExitStatus::InProgress
            | RootExitStatus::FatalErrored
            | RootExitStatus::DidNotComplete => invariant_violation("unexpected exit status"),
        }
    }

    // ---- render loops -----------------------------------------------------

    /// Throw away the render in progress.
    pub(crate) fn discard_render(&mut self) {
        self.render = RenderState::default();
        self.contexts.clear();
    }

    /// Start a new render of `lanes` on `root` from its committed tree.
    pub(crate) fn prepare_fresh_stack(&mut self, root: RootId, lanes: Lanes) {
        let timeout = {
            let r = self.root_mut(root);
            r.finished_work = None;
            r.finished_lanes = Lanes::empty();
            r.timeout_handle.take()
        };
        if let Some(handle) = timeout {
            self.scheduler.cancel_callback(handle);
        }
        self.discard_render();

        let current = self.root_ref(root).current;
        let props = self.node(current).memoized_props.clone().unwrap_or_default();
        let wip = self.create_work_in_progress(current, props);
        self.render.root = Some(root);
        self.render.wip = Some(wip);
        self.render.lanes = lanes;
        self.finish_queueing_concurrent_updates();
        debug!(?root, lanes = lanes.label(), "fresh render stack");
    }

    pub(crate) fn render_root_sync(&mut self, root: RootId, lanes: Lanes) -> RootExitStatus {
        let previous = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;
        if self.render.root != Some(root) || self.render.lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }
        {
            let _span = debug_span!("render_root", lanes = lanes.label(), sync = true).entered();
            while let Some(unit) = self.render.wip {
                self.perform_unit_of_work(unit);
            }
        }
        self.execution_context = previous;
        self.render.root = None;
        self.render.lanes = Lanes::empty();
        self.render.exit_status
    }

    pub(crate) fn render_root_concurrent(&mut self, root: RootId, lanes: Lanes) -> RootExitStatus {
        let previous = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;
        if self.render.root != Some(root) || self.render.lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }
        {
            let _span = debug_span!("render_root", lanes = lanes.label(), sync = false).entered();
            while let Some(unit) = self.render.wip {
                if self.scheduler.should_yield() {
                    break;
                }
                self.perform_unit_of_work(unit);
            }
        }
        self.execution_context = previous;
        if self.render.wip.is_some() {
            trace!(?root, "render yielded");
            return RootExitStatus::InProgress;
        }
        self.render.root = None;
        self.render.lanes = Lanes::empty();
        self.render.exit_status
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) {
        let current = self.node(unit).alternate.filter(|&a| self.fibers.contains_key(a));
        let lanes = self.render.lanes;
        match self.begin_work(current, unit, lanes) {
            Ok(next) => {
                let f = self.node_mut(unit);
                f.memoized_props = Some(f.pending_props.clone());
                match next {
                    Some(next) => self.render.wip = Some(next),
                    None => self.complete_unit_of_work(unit),
                }
            }
            Err(interrupt) => self.handle_error(unit, interrupt),
        }
    }

    fn complete_unit_of_work(&mut self, unit: FiberId) {
        if let Err((fiber, interrupt)) = self.try_complete_unit_of_work(unit) {
            self.handle_error(fiber, interrupt);
        }
    }

    /// Route a failure of `erred` to the nearest boundary and keep going.
    fn handle_error(&mut self, mut erred: FiberId, mut value: Interrupt) {
        loop {
            if self.node(erred).ret.is_none() {
                // Nothing above the root can capture.
                let error = match value {
                    Interrupt::Error(e) => e,
                    Interrupt::Suspend(_) => crate::error::RenderError::new("root suspended"),
                };
                self.render.exit_status = RootExitStatus::FatalErrored;
                self.render.fatal_error = Some(CapturedError::new(error, String::new()));
                self.render.wip = None;
                return;
            }
            self.throw_exception(erred, value);
            match self.try_complete_unit_of_work(erred) {
                Ok(()) => return,
                Err((fiber, interrupt)) => {
                    erred = fiber;
                    value = interrupt;
                }
            }
        }
    }

    /// Complete `unit` and its ancestors until a sibling has work.
    fn try_complete_unit_of_work(&mut self, unit: FiberId) -> Result<(), (FiberId, Interrupt)> {
        let mut completed = unit;
        loop {
            let current = self
                .node(completed)
                .alternate
                .filter(|&a| self.fibers.contains_key(a));
            let ret = self.node(completed).ret;

            if !self.node(completed).flags.contains(Flags::INCOMPLETE) {
                if let Err(interrupt) = self.complete_work(current, completed) {
                    return Err((completed, interrupt));
                }
            } else {
                if let Some(next) = self.unwind_work(completed) {
                    self.node_mut(next).flags &= Flags::HOST_EFFECT_MASK;
                    self.render.wip = Some(next);
                    return Ok(());
                }
                match ret {
                    Some(parent) => {
                        let p = self.node_mut(parent);
                        p.flags |= Flags::INCOMPLETE;
                        p.subtree_flags = Flags::empty();
                        p.deletions.clear();
                    }
                    None => {
                        self.render.exit_status = RootExitStatus::DidNotComplete;
                        self.render.wip = None;
                        return Ok(());
                    }
                }
            }

            if let Some(sibling) = self.node(completed).sibling {
                self.render.wip = Some(sibling);
                return Ok(());
            }
            match ret {
                Some(parent) => {
                    completed = parent;
                    self.render.wip = Some(parent);
                }
                None => break,
            }
        }
        if self.render.exit_status == RootExitStatus::InProgress {
            self.render.exit_status = RootExitStatus::Completed;
        }
        self.render.wip = None;
        Ok(())
    }

    // ---- exit status bookkeeping -----------------------------------------

    pub(crate) fn render_did_suspend(&mut self) {
        if self.render.exit_status == RootExitStatus::InProgress {
            self.render.exit_status = RootExitStatus::Suspended;
        }
    }

    pub(crate) fn render_did_suspend_delay_if_possible(&mut self) {
        if matches!(
            self.render.exit_status,
            RootExitStatus::InProgress | RootExitStatus::Suspended | RootExitStatus::Errored
        ) {
            self.render.exit_status = RootExitStatus::SuspendedWithDelay;
        }
        let blocked = self.render.skipped_lanes | self.render.interleaved_updated_lanes;
        if let Some(root) = self.render.root {
            if blocked.includes_non_idle_work() {
                let lanes = self.render.lanes;
                self.root_mut(root).lanes.mark_suspended(lanes);
            }
        }
    }

    pub(crate) fn render_did_error(&mut self, error: CapturedError) {
        if self.render.exit_status != RootExitStatus::SuspendedWithDelay {
            self.render.exit_status = RootExitStatus::Errored;
        }
        self.render.concurrent_errors.push(error);
    }

    // ---- pings and retries ------------------------------------------------

    /// A wakeable a render of `root` suspended on has settled.
    pub(crate) fn ping_suspended_root(&mut self, root: RootId, wakeable: u64, lanes: Lanes) {
        let Some(r) = self.roots.get_mut(root) else {
            return;
        };
        r.ping_cache.remove(&wakeable);
        r.lanes.mark_pinged(lanes);
        if self.render.root == Some(root) && lanes.is_superset_of(self.render.lanes) {
            // The paused render may have already switched a boundary to its
            // fallback; start over instead of committing it.
            debug!(?root, "pinged during render; restarting");
            self.discard_render();
        }
        let now = self.now();
        self.ensure_root_is_scheduled(root, now);
    }

    /// A wakeable a boundary showing its fallback waited on has settled:
    /// render the boundary again at a retry lane.
    pub(crate) fn resolve_retry_wakeable(&mut self, boundary: FiberId, wakeable: u64) {
        self.retry_listeners.remove(&(boundary, wakeable));
        let Some(mode) = self.fibers.get(boundary).map(|f| f.mode) else {
            return;
        };
        let lane = self.channel.request_retry_lane(mode);
        let Some(root) = self.mark_update_lane_from_fiber_to_root(boundary, lane) else {
            return;
        };
        let now = self.now();
        self.root_mut(root).lanes.mark_updated(lane, now);
        debug!(?root, lane = lane.label(), "boundary retry scheduled");
        self.ensure_root_is_scheduled(root, now);
    }
}
