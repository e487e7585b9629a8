#![forbid(unsafe_code)]

//! fibre public facade crate.
//!
//! Re-exports the scheduler and the reconciler behind one import and adds a
//! top-level [`Error`] for applications that do not care which layer failed.
//!
//! # Example
//!
//! ```
//! use fibre::prelude::*;
//! use fibre_harness::TestRoot;
//!
//! let greeting = component("Greeting", |cx| {
//!     let name = cx.props().str("name").unwrap_or("world").to_string();
//!     Ok(host("p").child(format!("hello {name}")).build())
//! });
//!
//! let mut root = TestRoot::new();
//! root.render(greeting.element().attr("name", "fibre")).unwrap();
//! root.flush_all().unwrap();
//! assert_eq!(root.serialize(), "<p>hello fibre</p>");
//! ```

use std::fmt;

// --- Scheduler re-exports --------------------------------------------------

pub use fibre_scheduler::{
    Clock, HostHooks, ManualClock, MonotonicClock, PollingHostHooks, PriorityLevel, Scheduler,
    SchedulerConfig, SchedulerHost, TaskError, TaskHandle, TaskStatus, YieldPolicy,
};

// --- Reconciler re-exports -------------------------------------------------

pub use fibre_reconciler::{
    CapturedError, Cleanup, Component, ComponentType, Context, Deps, EffectResult, Element,
    ElementBuilder, EntanglementPolicy, EventPriority, HostConfig, HostError, HostResult,
    Interrupt, Lane, Lanes, NodeRef, Props, ReconcileError, Reconciler, ReconcilerConfig, Render,
    RenderContext, RenderError, Resource, RootId, RootOptions, RootTag, StateHandle, StateValue,
    component, fragment, host, suspense, text,
};

// --- Harness re-exports ----------------------------------------------------

#[cfg(feature = "harness")]
pub use fibre_harness::{HostOp, MemoryHost, NodeId, TestRoot};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for fibre apps.
#[derive(Debug)]
pub enum Error {
    /// A scheduler task failed outside the reconciler.
    Task(TaskError),
    /// The reconciler gave up on an update.
    Reconcile(ReconcileError),
    /// A host operation failed outside a render.
    Host(HostError),
    /// A component or effect failed outside a render.
    Render(RenderError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(err) => write!(f, "{err}"),
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::Host(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Task(err) => Some(err),
            Self::Reconcile(err) => Some(err),
            Self::Host(err) => Some(err),
            Self::Render(err) => Some(err),
        }
    }
}

impl From<TaskError> for Error {
    fn from(err: TaskError) -> Self {
        Self::Task(err)
    }
}

impl From<ReconcileError> for Error {
    fn from(err: ReconcileError) -> Self {
        Self::Reconcile(err)
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        Self::Render(err)
    }
}

/// Standard result type for fibre APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Component, ComponentType, Context, Deps, Element, Error, HostConfig, Lanes, Reconciler,
        ReconcilerConfig, Render, RenderContext, RenderError, Resource, Result, StateHandle,
        component, fragment, host, suspense, text,
    };

    pub use crate::{reconciler, scheduler};
}

pub use fibre_reconciler as reconciler;
pub use fibre_scheduler as scheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn errors_convert_and_keep_their_source() {
        let err: Error = ReconcileError::NestedUpdateLimit { limit: 3 }.into();
        assert!(matches!(err, Error::Reconcile(_)));
        assert!(err.to_string().contains("3 nested"));
        assert!(err.source().is_some());

        let err: Error = HostError::new("append_child", "parent gone").into();
        assert_eq!(err.to_string(), "append_child: parent gone");

        let err: Error = RenderError::new("boom").into();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn question_mark_lifts_layer_errors() {
        fn run() -> Result<()> {
            let failed: std::result::Result<(), TaskError> = Err(TaskError::new("task failed"));
            failed?;
            Ok(())
        }
        assert!(matches!(run(), Err(Error::Task(_))));
    }
}
