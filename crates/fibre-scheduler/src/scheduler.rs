#![forbid(unsafe_code)]

//! Cooperative priority task queue.
//!
//! Tasks sit in one of two binary min-heaps:
//!
//! - the **ready** heap, keyed by expiration time,
//! - the **timed** heap, keyed by start time, for tasks scheduled with a delay.
//!
//! Ties are broken by task id, so equal-priority tasks run in insertion order.
//!
//! # Execution model
//!
//! The scheduler never runs on its own. When it has ready work it asks the
//! host (through [`HostHooks::request_host_callback`]) to call
//! [`Scheduler::perform_work_until_deadline`] "soon". That call runs tasks
//! until the ready heap is empty or the frame deadline passes with
//! non-expired work left, in which case another host callback is requested.
//! Expired tasks are never preempted by the deadline.
//!
//! A callback receives the shared context (`&mut C`) and a `did_timeout`
//! flag. It may return [`TaskStatus::Continue`] with a continuation; the task
//! then keeps its heap entry (same key, same position) and the continuation
//! runs the next time the task reaches the top.
//!
//! Cancelling a task clears its callback; the inert heap entry is discarded
//! when it surfaces, which keeps cancellation O(1).
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Callback returns `Err` | Task dropped, host callback re-requested if work remains, error returned to the host |
//! | Cancel during own callback | Continuation is discarded |
//! | Cancel of unknown handle | No-op |

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug_span, trace};

use crate::clock::Clock;
use crate::error::TaskResult;
use crate::heap::TaskHeap;
use crate::priority::PriorityLevel;
use crate::trace::{ScheduleTrace, TaskEvent};

/// Default length of one time slice (ms).
pub const DEFAULT_FRAME_INTERVAL_MS: f64 = 5.0;

/// Default number of retained trace entries.
const DEFAULT_TRACE_CAPACITY: usize = 4_096;

/// Work function stored in a task.
///
/// Receives the shared context and whether the task expired before it ran.
pub type Callback<C> = Box<dyn FnOnce(&mut C, bool) -> TaskResult<TaskStatus<C>>>;

/// What a callback wants to happen to its task.
pub enum TaskStatus<C> {
    /// Task is finished; remove it.
    Complete,
    /// Task has more work; keep it queued with this continuation.
    Continue(Callback<C>),
}

impl<C> TaskStatus<C> {
    /// Build a continuation from a closure.
    pub fn continue_with<F>(f: F) -> Self
    where
        F: FnOnce(&mut C, bool) -> TaskResult<TaskStatus<C>> + 'static,
    {
        TaskStatus::Continue(Box::new(f))
    }

    /// True for [`TaskStatus::Continue`].
    pub fn is_continuation(&self) -> bool {
        matches!(self, TaskStatus::Continue(_))
    }
}

impl<C> fmt::Debug for TaskStatus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Complete => f.write_str("Complete"),
            TaskStatus::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// Opaque handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// Monotonically increasing task id.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Context type that owns a scheduler.
///
/// Callbacks receive the whole context, so the scheduler must be reachable
/// from it.
pub trait SchedulerHost: Sized + 'static {
    /// Access the embedded scheduler.
    fn scheduler(&mut self) -> &mut Scheduler<Self>;
}

/// Notifications from the scheduler to whatever drives it.
///
/// The scheduler is agnostic to the mechanism: a message-loop tick, a timer
/// wheel, or a test driver that polls [`Scheduler::has_pending_host_callback`].
pub trait HostHooks: fmt::Debug {
    /// Call `perform_work_until_deadline` soon, but not synchronously.
    fn request_host_callback(&self);
    /// Call `handle_host_timeout` after `delay_ms`.
    fn request_host_timeout(&self, delay_ms: f64);
    /// Forget a previously requested timeout.
    fn cancel_host_timeout(&self);
}

/// Hooks that do nothing; the driver polls the scheduler instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingHostHooks;

impl HostHooks for PollingHostHooks {
    fn request_host_callback(&self) {}
    fn request_host_timeout(&self, _delay_ms: f64) {}
    fn cancel_host_timeout(&self) {}
}

/// How [`Scheduler::should_yield`] decides to give control back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YieldPolicy {
    /// Yield once the current slice has run for `frame_interval_ms`.
    Deadline,
    /// Yield after this many `should_yield` checks within one slice.
    ///
    /// Makes interruption points deterministic in tests.
    AfterChecks(usize),
    /// Never yield (every flush drains the queue).
    Never,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Length of one time slice in ms. Default: 5.0.
    pub frame_interval_ms: f64,

    /// Yield decision policy. Default: [`YieldPolicy::Deadline`].
    pub yield_policy: YieldPolicy,

    /// Record a [`ScheduleTrace`]. Default: false.
    pub trace: bool,

    /// Maximum retained trace entries (0 = unbounded). Default: 4096.
    pub trace_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            yield_policy: YieldPolicy::Deadline,
            trace: false,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    /// Tasks ever scheduled.
    pub total_scheduled: u64,
    /// Tasks whose callback ran to completion.
    pub total_completed: u64,
    /// Tasks cancelled before completion.
    pub total_cancelled: u64,
    /// Tasks whose callback returned an error.
    pub total_failed: u64,
    /// Times the flush loop yielded with work remaining.
    pub total_yields: u64,
    /// Continuations returned by callbacks.
    pub total_continuations: u64,
}

struct Task<C> {
    priority: PriorityLevel,
    start_time: f64,
    expiration_time: f64,
    callback: Option<Callback<C>>,
    cancelled: bool,
}

/// Time-sliced min-heap task queue.
pub struct Scheduler<C> {
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    hooks: Box<dyn HostHooks>,

    /// Task bodies by id; heaps hold only keys.
    tasks: HashMap<u64, Task<C>>,
    ready: TaskHeap,
    timed: TaskHeap,

    next_id: u64,
    current_task: Option<u64>,
    current_priority: PriorityLevel,

    is_performing_work: bool,
    host_callback_scheduled: bool,
    host_timeout_at: Option<f64>,

    /// Start of the current slice.
    frame_start: f64,
    /// `should_yield` calls in the current slice.
    yield_checks: usize,

    trace: Option<ScheduleTrace>,
    stats: SchedulerStats,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("ready", &self.ready.len())
            .field("timed", &self.timed.len())
            .field("current_task", &self.current_task)
            .field("current_priority", &self.current_priority)
            .field("host_callback_scheduled", &self.host_callback_scheduled)
            .field("host_timeout_at", &self.host_timeout_at)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<C> Scheduler<C> {
    /// Create a scheduler reading time from `clock`.
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        let trace = config
            .trace
            .then(|| ScheduleTrace::new(config.trace_capacity));
        let frame_start = clock.now();
        Self {
            config,
            clock,
            hooks: Box::new(PollingHostHooks),
            tasks: HashMap::new(),
            ready: TaskHeap::new(),
            timed: TaskHeap::new(),
            next_id: 1,
            current_task: None,
            current_priority: PriorityLevel::Normal,
            is_performing_work: false,
            host_callback_scheduled: false,
            host_timeout_at: None,
            frame_start,
            yield_checks: 0,
            trace,
            stats: SchedulerStats::default(),
        }
    }

    /// Replace the host notification hooks.
    pub fn set_host_hooks(&mut self, hooks: Box<dyn HostHooks>) {
        self.hooks = hooks;
    }

    /// Change the yield policy (takes effect at the next check).
    pub fn set_yield_policy(&mut self, policy: YieldPolicy) {
        self.config.yield_policy = policy;
    }

    /// Current configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current time in ms.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Shared clock handle.
    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    /// Schedule `callback` to run at `priority`.
    pub fn schedule_callback<F>(&mut self, priority: PriorityLevel, callback: F) -> TaskHandle
    where
        F: FnOnce(&mut C, bool) -> TaskResult<TaskStatus<C>> + 'static,
    {
        self.schedule_task(priority, None, Box::new(callback))
    }

    /// Schedule `callback` to become ready after `delay_ms`.
    pub fn schedule_delayed<F>(
        &mut self,
        priority: PriorityLevel,
        delay_ms: f64,
        callback: F,
    ) -> TaskHandle
    where
        F: FnOnce(&mut C, bool) -> TaskResult<TaskStatus<C>> + 'static,
    {
        self.schedule_task(priority, Some(delay_ms), Box::new(callback))
    }

    /// Schedule a boxed callback with an optional delay.
    pub fn schedule_task(
        &mut self,
        priority: PriorityLevel,
        delay_ms: Option<f64>,
        callback: Callback<C>,
    ) -> TaskHandle {
        let current_time = self.now();
        let start_time = match delay_ms {
            Some(delay) if delay > 0.0 => current_time + delay,
            _ => current_time,
        };
        let expiration_time = start_time + priority.timeout_ms();

        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                priority,
                start_time,
                expiration_time,
                callback: Some(callback),
                cancelled: false,
            },
        );
        self.stats.total_scheduled += 1;

        let delayed = start_time > current_time;
        self.record(TaskEvent::Spawn {
            task_id: id,
            priority,
            delayed,
        });
        trace!(task_id = id, %priority, delayed, expiration_time, "task scheduled");

        if delayed {
            self.timed.push(start_time, id);
            let is_earliest = self.timed.peek().map(|e| e.id) == Some(id);
            if self.ready.is_empty() && is_earliest {
                self.cancel_host_timeout();
                self.request_host_timeout(start_time - current_time);
            }
        } else {
            self.ready.push(expiration_time, id);
            if !self.host_callback_scheduled && !self.is_performing_work {
                self.request_host_callback();
            }
        }
        TaskHandle(id)
    }

    /// Cancel a task. Its heap entry stays behind, inert.
    pub fn cancel_callback(&mut self, handle: TaskHandle) {
        let Some(task) = self.tasks.get_mut(&handle.0) else {
            return;
        };
        if task.cancelled {
            return;
        }
        task.cancelled = true;
        task.callback = None;
        self.stats.total_cancelled += 1;
        self.record(TaskEvent::Cancel { task_id: handle.0 });
        trace!(task_id = handle.0, "task cancelled");
    }

    /// True while the task is queued and not cancelled.
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.tasks
            .get(&handle.0)
            .is_some_and(|task| !task.cancelled)
    }

    /// Priority of a queued task.
    pub fn task_priority(&self, handle: TaskHandle) -> Option<PriorityLevel> {
        self.tasks.get(&handle.0).map(|task| task.priority)
    }

    /// Number of live (not cancelled) tasks, ready or timed.
    pub fn pending_count(&self) -> usize {
        self.tasks.values().filter(|task| !task.cancelled).count()
    }

    /// Handle of the task at the top of the ready heap, if live.
    pub fn first_callback(&self) -> Option<TaskHandle> {
        let entry = self.ready.peek()?;
        let task = self.tasks.get(&entry.id)?;
        (!task.cancelled).then_some(TaskHandle(entry.id))
    }

    /// Priority of the task currently running (or `Normal` outside a flush).
    pub fn current_priority_level(&self) -> PriorityLevel {
        self.current_priority
    }

    /// Task currently running, if any.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current_task.map(TaskHandle)
    }

    /// True while inside `perform_work_until_deadline`.
    pub fn is_performing_work(&self) -> bool {
        self.is_performing_work
    }

    /// True when the host owes the scheduler a `perform_work_until_deadline` call.
    pub fn has_pending_host_callback(&self) -> bool {
        self.host_callback_scheduled
    }

    /// Absolute time at which the host should call `handle_host_timeout`.
    pub fn host_timeout_deadline(&self) -> Option<f64> {
        self.host_timeout_at
    }

    /// Should long-running work give control back now?
    pub fn should_yield(&mut self) -> bool {
        match self.config.yield_policy {
            YieldPolicy::Never => false,
            YieldPolicy::Deadline => self.now() - self.frame_start >= self.config.frame_interval_ms,
            YieldPolicy::AfterChecks(limit) => {
                self.yield_checks += 1;
                self.yield_checks > limit
            }
        }
    }

    /// Statistics since construction.
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Recorded trace, when tracing is enabled.
    pub fn trace(&self) -> Option<&ScheduleTrace> {
        self.trace.as_ref()
    }

    /// Clear the recorded trace.
    pub fn clear_trace(&mut self) {
        if let Some(trace) = self.trace.as_mut() {
            trace.clear();
        }
    }

    /// The host's timeout fired: promote due timers and ask for a callback.
    pub fn handle_host_timeout(&mut self) {
        self.host_timeout_at = None;
        let current_time = self.now();
        self.advance_timers(current_time);
        if self.host_callback_scheduled {
            return;
        }
        if !self.ready.is_empty() {
            self.request_host_callback();
        } else if let Some(start) = self.first_timer_start() {
            self.request_host_timeout(start - current_time);
        }
    }

    fn record(&mut self, event: TaskEvent) {
        if let Some(trace) = self.trace.as_mut() {
            trace.record(event);
        }
    }

    fn request_host_callback(&mut self) {
        self.host_callback_scheduled = true;
        self.hooks.request_host_callback();
    }

    fn request_host_timeout(&mut self, delay_ms: f64) {
        let delay_ms = delay_ms.max(0.0);
        self.host_timeout_at = Some(self.now() + delay_ms);
        self.hooks.request_host_timeout(delay_ms);
    }

    fn cancel_host_timeout(&mut self) {
        if self.host_timeout_at.take().is_some() {
            self.hooks.cancel_host_timeout();
        }
    }

    fn first_timer_start(&mut self) -> Option<f64> {
        while let Some(entry) = self.timed.peek() {
            match self.tasks.get(&entry.id) {
                Some(task) if !task.cancelled => return Some(task.start_time),
                _ => {
                    self.timed.pop();
                    self.tasks.remove(&entry.id);
                }
            }
        }
        None
    }

    /// Move timed tasks whose start time has passed into the ready heap.
    fn advance_timers(&mut self, current_time: f64) {
        while let Some(entry) = self.timed.peek() {
            let (cancelled, start_time, expiration_time) = match self.tasks.get(&entry.id) {
                Some(task) => (task.cancelled, task.start_time, task.expiration_time),
                None => (true, 0.0, 0.0),
            };
            if cancelled {
                self.timed.pop();
                self.tasks.remove(&entry.id);
            } else if start_time <= current_time {
                self.timed.pop();
                self.ready.push(expiration_time, entry.id);
                self.record(TaskEvent::Promote { task_id: entry.id });
            } else {
                return;
            }
        }
    }

    /// Pop the top ready entry if it is `id`, dropping the task body.
    fn retire_if_top(&mut self, id: u64) {
        if self.ready.peek().map(|e| e.id) == Some(id) {
            self.ready.pop();
        }
        self.tasks.remove(&id);
    }
}

/// Outcome of one step of the flush loop.
enum Step<C> {
    Run {
        id: u64,
        callback: Callback<C>,
        did_timeout: bool,
    },
    Discarded,
    Yield,
    Empty,
}

impl<C: SchedulerHost> Scheduler<C> {
    /// Host entry point: run tasks until the slice ends.
    ///
    /// Returns `Ok(true)` when work remains (another host callback has been
    /// requested). A failing callback's error is returned after the
    /// follow-up callback has been requested, so the queue keeps draining.
    pub fn perform_work_until_deadline(ctx: &mut C) -> TaskResult<bool> {
        let scheduler = ctx.scheduler();
        if !scheduler.host_callback_scheduled {
            return Ok(false);
        }
        let current_time = scheduler.now();
        scheduler.frame_start = current_time;
        scheduler.yield_checks = 0;

        let result = Self::flush_work(ctx, current_time);

        let scheduler = ctx.scheduler();
        match result {
            Ok(has_more) => {
                if has_more {
                    scheduler.stats.total_yields += 1;
                    let pending = scheduler.ready.len();
                    scheduler.record(TaskEvent::Yield { pending });
                    scheduler.request_host_callback();
                }
                Ok(has_more)
            }
            Err(err) => {
                if !scheduler.ready.is_empty() && !scheduler.host_callback_scheduled {
                    scheduler.request_host_callback();
                }
                Err(err)
            }
        }
    }

    fn flush_work(ctx: &mut C, initial_time: f64) -> TaskResult<bool> {
        let _span = debug_span!("scheduler_flush").entered();
        let scheduler = ctx.scheduler();
        scheduler.host_callback_scheduled = false;
        scheduler.cancel_host_timeout();
        scheduler.is_performing_work = true;
        let previous_priority = scheduler.current_priority;

        let result = Self::work_loop(ctx, initial_time);

        let scheduler = ctx.scheduler();
        scheduler.current_task = None;
        scheduler.current_priority = previous_priority;
        scheduler.is_performing_work = false;
        result
    }

    fn work_loop(ctx: &mut C, initial_time: f64) -> TaskResult<bool> {
        let mut current_time = initial_time;
        ctx.scheduler().advance_timers(current_time);

        loop {
            let step = Self::next_step(ctx.scheduler(), current_time);
            match step {
                Step::Empty => break,
                Step::Yield => return Ok(true),
                Step::Discarded => continue,
                Step::Run {
                    id,
                    callback,
                    did_timeout,
                } => {
                    trace!(task_id = id, did_timeout, "task run");
                    let outcome = callback(ctx, did_timeout);
                    let scheduler = ctx.scheduler();
                    current_time = scheduler.now();
                    match outcome {
                        Ok(TaskStatus::Continue(next)) => {
                            scheduler.stats.total_continuations += 1;
                            let kept = match scheduler.tasks.get_mut(&id) {
                                Some(task) if !task.cancelled => {
                                    task.callback = Some(next);
                                    true
                                }
                                _ => false,
                            };
                            if kept {
                                scheduler.record(TaskEvent::Continue { task_id: id });
                            } else {
                                scheduler.retire_if_top(id);
                            }
                        }
                        Ok(TaskStatus::Complete) => {
                            scheduler.stats.total_completed += 1;
                            scheduler.record(TaskEvent::Complete { task_id: id });
                            scheduler.retire_if_top(id);
                        }
                        Err(err) => {
                            scheduler.stats.total_failed += 1;
                            scheduler.record(TaskEvent::Fail {
                                task_id: id,
                                message: err.message().to_string(),
                            });
                            scheduler.retire_if_top(id);
                            scheduler.current_task = None;
                            return Err(err);
                        }
                    }
                    scheduler.advance_timers(current_time);
                }
            }
        }

        let scheduler = ctx.scheduler();
        if let Some(start) = scheduler.first_timer_start() {
            scheduler.request_host_timeout(start - current_time);
        }
        Ok(false)
    }

    fn next_step(scheduler: &mut Scheduler<C>, current_time: f64) -> Step<C> {
        let Some(entry) = scheduler.ready.peek() else {
            return Step::Empty;
        };
        let expiration_time = match scheduler.tasks.get(&entry.id) {
            Some(task) if task.callback.is_some() => task.expiration_time,
            _ => {
                scheduler.ready.pop();
                scheduler.tasks.remove(&entry.id);
                return Step::Discarded;
            }
        };
        if expiration_time > current_time && scheduler.should_yield() {
            return Step::Yield;
        }
        let Some(task) = scheduler.tasks.get_mut(&entry.id) else {
            return Step::Discarded;
        };
        let Some(callback) = task.callback.take() else {
            return Step::Discarded;
        };
        let priority = task.priority;
        scheduler.current_task = Some(entry.id);
        scheduler.current_priority = priority;
        let did_timeout = expiration_time <= current_time;
        scheduler.record(TaskEvent::Run {
            task_id: entry.id,
            did_timeout,
        });
        Step::Run {
            id: entry.id,
            callback,
            did_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TaskError;
    use std::cell::RefCell;

    struct Ctx {
        scheduler: Scheduler<Ctx>,
        log: Vec<&'static str>,
    }

    impl SchedulerHost for Ctx {
        fn scheduler(&mut self) -> &mut Scheduler<Self> {
            &mut self.scheduler
        }
    }

    fn ctx(clock: &ManualClock, policy: YieldPolicy) -> Ctx {
        let config = SchedulerConfig {
            yield_policy: policy,
            trace: true,
            ..SchedulerConfig::default()
        };
        Ctx {
            scheduler: Scheduler::new(config, Rc::new(clock.clone())),
            log: Vec::new(),
        }
    }

    fn push(name: &'static str) -> impl FnOnce(&mut Ctx, bool) -> TaskResult<TaskStatus<Ctx>> {
        move |ctx: &mut Ctx, _: bool| {
            ctx.log.push(name);
            Ok(TaskStatus::Complete)
        }
    }

    fn drain(ctx: &mut Ctx) {
        while Scheduler::perform_work_until_deadline(ctx).expect("flush") {}
    }

    #[test]
    fn drains_by_expiration_then_insertion() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        ctx.scheduler
            .schedule_callback(PriorityLevel::UserBlocking, push("A"));
        ctx.scheduler.schedule_callback(PriorityLevel::Idle, push("B"));
        clock.advance(1.0);
        ctx.scheduler
            .schedule_callback(PriorityLevel::Immediate, push("C"));
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["C", "A", "B"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        for name in ["1", "2", "3", "4"] {
            ctx.scheduler.schedule_callback(PriorityLevel::Normal, push(name));
        }
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn scheduling_requests_a_host_callback_once() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        assert!(!ctx.scheduler.has_pending_host_callback());
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("a"));
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("b"));
        assert!(ctx.scheduler.has_pending_host_callback());
        assert!(!Scheduler::perform_work_until_deadline(&mut ctx).expect("flush"));
        assert!(!ctx.scheduler.has_pending_host_callback());
    }

    #[test]
    fn cancelled_task_never_runs() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        let a = ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("a"));
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("b"));
        ctx.scheduler.cancel_callback(a);
        assert!(!ctx.scheduler.is_pending(a));
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["b"]);
        assert_eq!(ctx.scheduler.stats().total_cancelled, 1);
        assert_eq!(ctx.scheduler.pending_count(), 0);
    }

    #[test]
    fn continuation_keeps_task_position() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::AfterChecks(1));
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, |ctx: &mut Ctx, _| {
            ctx.log.push("first-half");
            Ok(TaskStatus::continue_with(|ctx: &mut Ctx, _| {
                ctx.log.push("second-half");
                Ok(TaskStatus::Complete)
            }))
        });
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("other"));

        // Slice 1: one check allowed -> first half runs, then the loop yields.
        assert!(Scheduler::perform_work_until_deadline(&mut ctx).expect("flush"));
        assert_eq!(ctx.log, vec!["first-half"]);
        // Slice 2: continuation is still first in line.
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["first-half", "second-half", "other"]);
        let trace = ctx.scheduler.trace().expect("trace enabled");
        assert_eq!(trace.run_order(), vec![1, 1, 2]);
    }

    #[test]
    fn expired_tasks_ignore_the_deadline() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Deadline);
        let slow = clock.clone();
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, move |ctx: &mut Ctx, _| {
            slow.advance(20.0);
            ctx.log.push("slow");
            Ok(TaskStatus::Complete)
        });
        ctx.scheduler
            .schedule_callback(PriorityLevel::Immediate, push("urgent"));
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("normal"));

        // urgent (expired) runs first, then slow blows the slice, normal waits.
        assert!(Scheduler::perform_work_until_deadline(&mut ctx).expect("flush"));
        assert_eq!(ctx.log, vec!["urgent", "slow"]);
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["urgent", "slow", "normal"]);
    }

    #[test]
    fn delayed_task_waits_for_host_timeout() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        ctx.scheduler
            .schedule_delayed(PriorityLevel::Normal, 100.0, push("late"));
        assert!(!ctx.scheduler.has_pending_host_callback());
        assert_eq!(ctx.scheduler.host_timeout_deadline(), Some(100.0));

        clock.advance(100.0);
        ctx.scheduler.handle_host_timeout();
        assert!(ctx.scheduler.has_pending_host_callback());
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["late"]);
    }

    #[test]
    fn failing_task_reschedules_remaining_work() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, |_: &mut Ctx, _| {
            Err(TaskError::new("broken"))
        });
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, push("after"));

        let err = Scheduler::perform_work_until_deadline(&mut ctx).expect_err("first task fails");
        assert_eq!(err.message(), "broken");
        assert!(ctx.scheduler.has_pending_host_callback());
        drain(&mut ctx);
        assert_eq!(ctx.log, vec!["after"]);
        assert_eq!(ctx.scheduler.stats().total_failed, 1);
    }

    #[test]
    fn cancel_inside_own_callback_drops_continuation() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        let handle = Rc::new(RefCell::new(None::<TaskHandle>));
        let inner = Rc::clone(&handle);
        let task = ctx.scheduler.schedule_callback(PriorityLevel::Normal, move |ctx: &mut Ctx, _| {
            if let Some(me) = *inner.borrow() {
                ctx.scheduler.cancel_callback(me);
            }
            Ok(TaskStatus::continue_with(|ctx: &mut Ctx, _| {
                ctx.log.push("resurrected");
                Ok(TaskStatus::Complete)
            }))
        });
        *handle.borrow_mut() = Some(task);
        drain(&mut ctx);
        assert!(ctx.log.is_empty());
        assert_eq!(ctx.scheduler.pending_count(), 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn scheduling_and_running_are_traced() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        ctx.scheduler.schedule_callback(PriorityLevel::Low, push("x"));
        drain(&mut ctx);
        assert!(logs_contain("task scheduled"));
        assert!(logs_contain("task run"));
    }

    #[test]
    fn tasks_scheduled_during_flush_run_in_same_flush() {
        let clock = ManualClock::new(0.0);
        let mut ctx = ctx(&clock, YieldPolicy::Never);
        ctx.scheduler.schedule_callback(PriorityLevel::Normal, |ctx: &mut Ctx, _| {
            ctx.log.push("outer");
            ctx.scheduler
                .schedule_callback(PriorityLevel::UserBlocking, push("inner"));
            Ok(TaskStatus::Complete)
        });
        assert!(!Scheduler::perform_work_until_deadline(&mut ctx).expect("flush"));
        assert_eq!(ctx.log, vec!["outer", "inner"]);
    }
}
