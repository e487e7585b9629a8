#![forbid(unsafe_code)]

//! Error types.
//!
//! # Failure Modes
//!
//! | Failure | Where | Outcome |
//! |---------|-------|---------|
//! | Component render returns an error | render phase | routed to the nearest error boundary, or the root reporter |
//! | Component suspends with no boundary on a sync render | render phase | converted into a render error |
//! | Host operation fails | complete / commit phase | captured like a render error at the failing fiber |
//! | Effect callback fails | commit phase | captured at the fiber that owns the effect |
//! | Updates re-schedule themselves forever | scheduling | [`ReconcileError::NestedUpdateLimit`] |
//! | Internal inconsistency | anywhere | panic via [`invariant_violation`] |

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use fibre_scheduler::TaskError;

use crate::resource::Wakeable;

/// Error raised by a component, an effect, or the host during a render.
///
/// Cheap to clone: errors are captured into update payloads and replayed.
#[derive(Clone)]
pub struct RenderError {
    message: Rc<str>,
    source: Option<Rc<dyn Error + 'static>>,
}

impl RenderError {
    /// Error with a message and no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Rc::from(message.into()),
            source: None,
        }
    }

    /// Wrap an underlying error.
    pub fn from_source(message: impl Into<String>, source: impl Error + 'static) -> Self {
        Self {
            message: Rc::from(message.into()),
            source: Some(Rc::new(source)),
        }
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderError")
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for RenderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref()
    }
}

impl From<HostError> for RenderError {
    fn from(err: HostError) -> Self {
        let message = format!("host operation `{}` failed", err.operation);
        RenderError::from_source(message, err)
    }
}

/// Why a component stopped rendering.
#[derive(Clone)]
pub enum Interrupt {
    /// Data is not ready; retry when the wakeable settles.
    Suspend(Wakeable),
    /// Rendering failed.
    Error(RenderError),
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Suspend(wakeable) => write!(f, "Suspend({})", wakeable.id()),
            Interrupt::Error(err) => write!(f, "Error({err})"),
        }
    }
}

impl From<RenderError> for Interrupt {
    fn from(err: RenderError) -> Self {
        Interrupt::Error(err)
    }
}

impl From<HostError> for Interrupt {
    fn from(err: HostError) -> Self {
        Interrupt::Error(err.into())
    }
}

/// A render error plus the component path it came from.
#[derive(Debug, Clone)]
pub struct CapturedError {
    /// The original error.
    pub error: RenderError,
    /// Innermost-first names of the fibers between the failure and the root.
    pub component_stack: Rc<str>,
}

impl CapturedError {
    pub(crate) fn new(error: RenderError, component_stack: String) -> Self {
        Self {
            error,
            component_stack: Rc::from(component_stack),
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.component_stack.is_empty() {
            write!(f, "\n{}", self.component_stack)?;
        }
        Ok(())
    }
}

/// A host tree operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    /// Which host operation failed (`"append_child"`, `"commit_update"`, ...).
    pub operation: &'static str,
    /// Host-provided detail.
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl Error for HostError {}

/// Result of a host operation.
pub type HostResult<T> = Result<T, HostError>;

/// Errors the reconciler hands back to its caller.
///
/// Everything a component or effect can do wrong is captured and routed
/// through boundaries; only scheduling-level failures surface here.
#[derive(Debug)]
pub enum ReconcileError {
    /// A scheduler task failed.
    Task(TaskError),
    /// Updates kept scheduling more synchronous updates.
    NestedUpdateLimit {
        /// The configured limit that was exceeded.
        limit: usize,
    },
    /// A render failed and nothing could capture the error.
    Uncaught(CapturedError),
    /// A fiber tree failed structural validation.
    InvalidTree(String),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Task(e) => write!(f, "{e}"),
            ReconcileError::NestedUpdateLimit { limit } => write!(
                f,
                "maximum update depth exceeded ({limit} nested synchronous updates)"
            ),
            ReconcileError::Uncaught(e) => write!(f, "uncaught render error: {e}"),
            ReconcileError::InvalidTree(msg) => write!(f, "invalid fiber tree: {msg}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReconcileError::Task(e) => Some(e),
            ReconcileError::Uncaught(e) => Some(&e.error),
            _ => None,
        }
    }
}

impl From<TaskError> for ReconcileError {
    fn from(err: TaskError) -> Self {
        ReconcileError::Task(err)
    }
}

/// Result type for reconciler entry points.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Abort on an internal inconsistency.
///
/// These indicate a bug in the reconciler itself, never in user code.
#[track_caller]
pub(crate) fn invariant_violation(message: &str) -> ! {
    tracing::error!(detail = message, "reconciler invariant violated");
    panic!("reconciler invariant violated: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_display_includes_source() {
        let io = std::io::Error::other("socket closed");
        let err = RenderError::from_source("fetch", io);
        assert_eq!(err.to_string(), "fetch: socket closed");
        assert!(err.source().is_some());
        assert_eq!(err.message(), "fetch");
    }

    #[test]
    fn host_error_converts_to_render_error() {
        let err: RenderError = HostError::new("append_child", "parent gone").into();
        assert_eq!(
            err.to_string(),
            "host operation `append_child` failed: append_child: parent gone"
        );
    }

    #[test]
    fn captured_error_prints_stack() {
        let captured = CapturedError::new(RenderError::new("boom"), "in Child\nin App".into());
        assert_eq!(captured.to_string(), "boom\nin Child\nin App");
    }

    #[test]
    fn nested_update_limit_message() {
        let err = ReconcileError::NestedUpdateLimit { limit: 50 };
        assert!(err.to_string().contains("50 nested"));
    }

    #[test]
    #[should_panic(expected = "reconciler invariant violated: cannot commit")]
    fn invariant_violation_panics() {
        invariant_violation("cannot commit");
    }
}
