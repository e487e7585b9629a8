#![forbid(unsafe_code)]

//! Suspendable data.
//!
//! A component that needs data which is not ready yet returns
//! [`Interrupt::Suspend`](crate::Interrupt::Suspend) with a [`Wakeable`].
//! The reconciler subscribes to it twice: once to *ping* the root (the
//! suspended render may now complete) and once to *retry* the boundary
//! that is showing a fallback.
//!
//! [`Resource`] is the stock wakeable: a single-assignment cell with
//! listeners.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Interrupt, RenderError};

static NEXT_WAKEABLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_wakeable_id() -> u64 {
    NEXT_WAKEABLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something a render can wait on.
pub trait Thenable {
    /// Stable identity, used to de-duplicate listeners.
    fn id(&self) -> u64;
    /// True once resolved or rejected.
    fn is_settled(&self) -> bool;
    /// Run `listener` once settled; immediately if already settled.
    fn subscribe(&self, listener: Box<dyn FnOnce()>);
}

/// Shared handle to a [`Thenable`].
pub type Wakeable = Rc<dyn Thenable>;

enum ResourceState<T> {
    Pending,
    Ready(Rc<T>),
    Failed(RenderError),
}

struct ResourceInner<T> {
    id: u64,
    state: RefCell<ResourceState<T>>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl<T> Thenable for ResourceInner<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), ResourceState::Pending)
    }

    fn subscribe(&self, listener: Box<dyn FnOnce()>) {
        if self.is_settled() {
            listener();
        } else {
            self.listeners.borrow_mut().push(listener);
        }
    }
}

/// Single-assignment async value.
///
/// ```
/// use fibre_reconciler::Resource;
///
/// let user = Resource::<String>::pending();
/// assert!(user.read().is_err());
/// user.resolve("ada".to_string());
/// assert_eq!(user.read().ok().as_deref().map(String::as_str), Some("ada"));
/// ```
pub struct Resource<T> {
    inner: Rc<ResourceInner<T>>,
}

impl<T: 'static> Resource<T> {
    /// A resource whose value has not arrived.
    pub fn pending() -> Self {
        Self {
            inner: Rc::new(ResourceInner {
                id: next_wakeable_id(),
                state: RefCell::new(ResourceState::Pending),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// A resource that is already available.
    pub fn ready(value: T) -> Self {
        let resource = Self::pending();
        *resource.inner.state.borrow_mut() = ResourceState::Ready(Rc::new(value));
        resource
    }

    /// Read the value, suspending while pending.
    pub fn read(&self) -> Result<Rc<T>, Interrupt> {
        match &*self.inner.state.borrow() {
            ResourceState::Ready(value) => Ok(Rc::clone(value)),
            ResourceState::Failed(err) => Err(Interrupt::Error(err.clone())),
            ResourceState::Pending => Err(Interrupt::Suspend(self.wakeable())),
        }
    }

    /// Settle with a value. Ignored if already settled.
    pub fn resolve(&self, value: T) {
        self.settle(ResourceState::Ready(Rc::new(value)));
    }

    /// Settle with an error. Ignored if already settled.
    pub fn reject(&self, error: RenderError) {
        self.settle(ResourceState::Failed(error));
    }

    pub fn is_pending(&self) -> bool {
        !self.inner.is_settled()
    }

    /// This resource as a [`Wakeable`].
    pub fn wakeable(&self) -> Wakeable {
        Rc::clone(&self.inner) as Wakeable
    }

    fn settle(&self, state: ResourceState<T>) {
        if self.inner.is_settled() {
            tracing::debug!(resource = self.inner.id, "resource already settled");
            return;
        }
        *self.inner.state.borrow_mut() = state;
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        tracing::trace!(
            resource = self.inner.id,
            listeners = listeners.len(),
            "resource settled"
        );
        for listener in listeners {
            listener();
        }
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.state.borrow() {
            ResourceState::Pending => "pending",
            ResourceState::Ready(_) => "ready",
            ResourceState::Failed(_) => "failed",
        };
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn listeners_fire_once_on_resolve() {
        let resource = Resource::<u32>::pending();
        let fired = Rc::new(Cell::new(0));
        let seen = Rc::clone(&fired);
        resource
            .wakeable()
            .subscribe(Box::new(move || seen.set(seen.get() + 1)));
        resource.resolve(1);
        resource.resolve(2);
        assert_eq!(fired.get(), 1);
        assert_eq!(resource.read().ok().as_deref(), Some(&1));
    }

    #[test]
    fn subscribing_after_settle_runs_immediately() {
        let resource = Resource::ready("x");
        let fired = Rc::new(Cell::new(false));
        let seen = Rc::clone(&fired);
        resource.wakeable().subscribe(Box::new(move || seen.set(true)));
        assert!(fired.get());
    }

    #[test]
    fn pending_read_suspends_with_same_identity() {
        let resource = Resource::<u8>::pending();
        match resource.read() {
            Err(Interrupt::Suspend(w)) => assert_eq!(w.id(), resource.wakeable().id()),
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[test]
    fn rejected_read_errors() {
        let resource = Resource::<u8>::pending();
        resource.reject(RenderError::new("offline"));
        assert!(matches!(resource.read(), Err(Interrupt::Error(e)) if e.message() == "offline"));
        assert!(!resource.is_pending());
    }
}
