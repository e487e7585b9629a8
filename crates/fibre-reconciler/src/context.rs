#![forbid(unsafe_code)]

//! Context: values provided to a whole subtree.
//!
//! A provider pushes its value while its subtree renders and pops it on the
//! way back up. Readers record a dependency; when a provider's value
//! changes, every dependent fiber below it is marked with the render lanes
//! so it re-renders even inside bailed-out subtrees.

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::element::{Element, ElementBuilder, ElementType, PropValue, VALUE_PROP};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A typed context with a default value.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Context<T> {
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: Rc::new(default),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn default_value(&self) -> Rc<T> {
        Rc::clone(&self.default)
    }

    /// Provider element. Dependents re-render when `value` is a different
    /// allocation from the previous render's.
    pub fn provider<I>(&self, value: Rc<T>, children: I) -> Element
    where
        I: IntoIterator,
        I::Item: Into<Element>,
    {
        ElementBuilder::new(ElementType::Provider(self.id))
            .attr(VALUE_PROP, PropValue::Data(value))
            .children(children)
            .build()
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Context").field(&self.id.0).finish()
    }
}

/// Contexts a fiber read during its last render.
pub(crate) type Dependencies = SmallVec<[ContextId; 2]>;

/// Values currently provided, innermost last.
#[derive(Default)]
pub(crate) struct ContextStack {
    entries: Vec<(ContextId, Rc<dyn Any>)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: ContextId, value: Rc<dyn Any>) {
        self.entries.push((context, value));
    }

    pub(crate) fn pop(&mut self, context: ContextId) {
        match self.entries.pop() {
            Some((top, _)) if top == context => {}
            _ => crate::error::invariant_violation("unbalanced context stack"),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn read(&self, context: ContextId) -> Option<Rc<dyn Any>> {
        self.entries
            .iter()
            .rev()
            .find(|(id, _)| *id == context)
            .map(|(_, value)| Rc::clone(value))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_provider_wins() {
        let theme = Context::new("light");
        let mut stack = ContextStack::default();
        stack.push(theme.id(), Rc::new("dark"));
        stack.push(theme.id(), Rc::new("blue"));
        let value = stack.read(theme.id()).and_then(|v| v.downcast::<&str>().ok());
        assert_eq!(value.as_deref(), Some(&"blue"));
        stack.pop(theme.id());
        let value = stack.read(theme.id()).and_then(|v| v.downcast::<&str>().ok());
        assert_eq!(value.as_deref(), Some(&"dark"));
        stack.pop(theme.id());
        assert_eq!(stack.len(), 0);
        assert!(stack.read(theme.id()).is_none());
    }

    #[test]
    fn contexts_get_distinct_ids() {
        let a = Context::new(1);
        let b = Context::new(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(*a.default_value(), 1);
    }

    #[test]
    #[should_panic(expected = "unbalanced context stack")]
    fn popping_wrong_context_panics() {
        let a = Context::new(());
        let b = Context::new(());
        let mut stack = ContextStack::default();
        stack.push(a.id(), Rc::new(()));
        stack.pop(b.id());
    }
}
