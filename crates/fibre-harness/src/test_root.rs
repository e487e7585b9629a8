#![forbid(unsafe_code)]

//! Deterministic driver for one root.
//!
//! `TestRoot` owns a reconciler over a [`MemoryHost`], a [`ManualClock`]
//! and one root. Nothing runs until the test pumps it: [`flush_all`]
//! drains the scheduler, [`flush_units`] runs a single slice that stops
//! after a fixed number of units of work, and [`advance_time`] moves the
//! clock and fires any timeout that came due.
//!
//! # Example
//!
//! ```
//! use fibre_harness::TestRoot;
//! use fibre_reconciler::host;
//!
//! let mut t = TestRoot::new();
//! t.render(host("div").child("hello")).unwrap();
//! t.flush_all().unwrap();
//! assert_eq!(t.serialize(), "<div>hello</div>");
//! ```
//!
//! [`flush_all`]: TestRoot::flush_all
//! [`flush_units`]: TestRoot::flush_units
//! [`advance_time`]: TestRoot::advance_time

use std::rc::Rc;

use fibre_reconciler::{
    CapturedError, Element, Lane, ReconcileError, ReconcileResult, Reconciler, ReconcilerConfig,
    RootId, RootOptions, RootTag,
};
use fibre_scheduler::{Clock, ManualClock, Scheduler, YieldPolicy};
use tracing::debug;

use crate::memory_host::{HostOp, MemoryHost, NodeId};

/// Scheduler slices [`TestRoot::flush_all`] runs before declaring a livelock.
pub const MAX_FLUSH_SLICES: usize = 10_000;

/// A reconciler, its clock and one mounted root.
pub struct TestRoot {
    /// The engine under test.
    reconciler: Reconciler<MemoryHost>,
    /// Shared with the scheduler; only moves when the test says so.
    clock: ManualClock,
    root: RootId,
    container: NodeId,
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRoot {
    /// A concurrent root with the default configuration.
    pub fn new() -> Self {
        Self::with_options(RootOptions::default(), ReconcilerConfig::default())
    }

    /// A legacy root: every update renders synchronously.
    pub fn legacy() -> Self {
        Self::with_options(
            RootOptions {
                tag: RootTag::Legacy,
                strict: false,
            },
            ReconcilerConfig::default(),
        )
    }

    /// A concurrent root with a custom configuration.
    pub fn with_config(config: ReconcilerConfig) -> Self {
        Self::with_options(RootOptions::default(), config)
    }

    pub fn with_options(options: RootOptions, config: ReconcilerConfig) -> Self {
        let clock = ManualClock::new(0.0);
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let mut reconciler = Reconciler::with_config(host, Rc::new(clock.clone()), config);
        let root = reconciler.create_root_with(container, options);
        Self {
            reconciler,
            clock,
            root,
            container,
        }
    }

    /// Schedule `element` as the root's content. Legacy roots render it
    /// before returning; concurrent roots wait for a flush.
    pub fn render(&mut self, element: impl Into<Element>) -> ReconcileResult<Lane> {
        self.reconciler.render(self.root, element.into())
    }

    /// Render and commit `element` synchronously.
    pub fn render_sync(&mut self, element: impl Into<Element>) -> ReconcileResult<()> {
        let root = self.root;
        let element = element.into();
        self.reconciler
            .flush_sync(|r| r.render(root, element))?
            .map(|_| ())
    }

    /// Remove everything the root rendered.
    pub fn unmount(&mut self) -> ReconcileResult<()> {
        self.reconciler.unmount(self.root)
    }

    /// Run scheduled work until nothing is left that is due now.
    ///
    /// Dispatched updates are routed first and timeouts that are already
    /// due are fired. Delayed work that is not due yet stays queued; see
    /// [`advance_time`](Self::advance_time). The first error is returned
    /// after the queue has drained.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler is still busy after [`MAX_FLUSH_SLICES`]
    /// slices.
    pub fn flush_all(&mut self) -> ReconcileResult<()> {
        let mut first_error = None;
        for _ in 0..MAX_FLUSH_SLICES {
            if let Err(err) = self.reconciler.process_inbox() {
                first_error.get_or_insert(err);
            }
            self.fire_due_timeout();
            if !self.reconciler.scheduler().has_pending_host_callback() {
                if self.reconciler.channel().has_pending() {
                    continue;
                }
                return first_error.map_or(Ok(()), Err);
            }
            if let Err(err) = Scheduler::perform_work_until_deadline(&mut self.reconciler) {
                first_error.get_or_insert(ReconcileError::from(err));
            }
        }
        panic!("scheduler still busy after {MAX_FLUSH_SLICES} slices");
    }

    /// Run one scheduler slice. Returns true when work remains.
    pub fn flush_slice(&mut self) -> ReconcileResult<bool> {
        self.reconciler.process_inbox()?;
        self.fire_due_timeout();
        Ok(Scheduler::perform_work_until_deadline(&mut self.reconciler)?)
    }

    /// Run one slice that yields after at most `units` units of render work.
    pub fn flush_units(&mut self, units: usize) -> ReconcileResult<bool> {
        let previous = self.reconciler.scheduler().config().yield_policy;
        // The flush loop spends one check before running the first task.
        self.reconciler
            .scheduler_mut()
            .set_yield_policy(YieldPolicy::AfterChecks(units + 1));
        let result = self.flush_slice();
        self.reconciler.scheduler_mut().set_yield_policy(previous);
        result
    }

    /// Move the clock forward and fire the host timeout if it came due.
    pub fn advance_time(&mut self, ms: f64) {
        self.clock.advance(ms);
        self.fire_due_timeout();
    }

    fn fire_due_timeout(&mut self) {
        let now = self.clock.now();
        let due = self
            .reconciler
            .scheduler()
            .host_timeout_deadline()
            .is_some_and(|at| at <= now);
        if due {
            debug!(now, "host timeout fired");
            self.reconciler.scheduler_mut().handle_host_timeout();
        }
    }

    /// Markup of the container, hidden nodes included.
    pub fn serialize(&self) -> String {
        self.reconciler.host().serialize(self.container)
    }

    /// Markup of the visible part of the container.
    pub fn serialize_visible(&self) -> String {
        self.reconciler.host().serialize_visible(self.container)
    }

    pub fn ops(&self) -> &[HostOp] {
        self.reconciler.host().ops()
    }

    /// Drain the host operation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        self.reconciler.host_mut().take_ops()
    }

    /// Drain the log and keep only operations on the attached tree.
    pub fn take_mutations(&mut self) -> Vec<HostOp> {
        self.take_ops()
            .into_iter()
            .filter(HostOp::is_mutation)
            .collect()
    }

    pub fn take_uncaught_errors(&mut self) -> Vec<CapturedError> {
        self.reconciler.take_uncaught_errors()
    }

    pub fn reconciler(&self) -> &Reconciler<MemoryHost> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<MemoryHost> {
        &mut self.reconciler
    }

    pub fn host(&self) -> &MemoryHost {
        self.reconciler.host()
    }

    pub fn host_mut(&mut self) -> &mut MemoryHost {
        self.reconciler.host_mut()
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn root_id(&self) -> RootId {
        self.root
    }

    pub fn container(&self) -> NodeId {
        self.container
    }
}
