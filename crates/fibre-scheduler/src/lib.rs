#![forbid(unsafe_code)]

//! fibre scheduler
//!
//! A single-threaded, cooperative task queue. Work is ordered by priority
//! (expressed as a timeout), sliced into short frames, and resumed through
//! continuations. The reconciler rides on it: render passes, passive-effect
//! flushes and throttled commits are all tasks.
//!
//! # Key Components
//!
//! - [`Scheduler`] - two min-heaps (ready, timed) plus the flush loop
//! - [`PriorityLevel`] - priority classes and their timeouts
//! - [`Clock`] - time source ([`MonotonicClock`], [`ManualClock`])
//! - [`HostHooks`] - how the scheduler asks its host to call back
//! - [`ScheduleTrace`] - deterministic event log for tests
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use fibre_scheduler::{
//!     ManualClock, PriorityLevel, Scheduler, SchedulerConfig, SchedulerHost, TaskStatus,
//! };
//!
//! struct App {
//!     scheduler: Scheduler<App>,
//!     ran: Vec<&'static str>,
//! }
//!
//! impl SchedulerHost for App {
//!     fn scheduler(&mut self) -> &mut Scheduler<App> {
//!         &mut self.scheduler
//!     }
//! }
//!
//! let clock = ManualClock::new(0.0);
//! let mut app = App {
//!     scheduler: Scheduler::new(SchedulerConfig::default(), Rc::new(clock)),
//!     ran: Vec::new(),
//! };
//! app.scheduler.schedule_callback(PriorityLevel::Normal, |app: &mut App, _| {
//!     app.ran.push("hello");
//!     Ok(TaskStatus::Complete)
//! });
//! while Scheduler::perform_work_until_deadline(&mut app).unwrap() {}
//! assert_eq!(app.ran, vec!["hello"]);
//! ```

pub mod clock;
pub mod error;
mod heap;
pub mod priority;
pub mod scheduler;
pub mod trace;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{TaskError, TaskResult};
pub use priority::PriorityLevel;
pub use scheduler::{
    Callback, DEFAULT_FRAME_INTERVAL_MS, HostHooks, PollingHostHooks, Scheduler, SchedulerConfig,
    SchedulerHost, SchedulerStats, TaskHandle, TaskStatus, YieldPolicy,
};
pub use trace::{ScheduleTrace, TaskEvent, TraceEntry};
