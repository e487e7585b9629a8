#![forbid(unsafe_code)]

//! Effect records declared by components during render.
//!
//! A render produces a fresh list of records. Each record either carries a
//! new callback (`has_effect`) or, when its dependencies did not change,
//! only keeps the shared [`EffectInstance`] alive so the previous cleanup
//! still runs on unmount.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::RenderError;

/// Teardown returned by an effect.
pub type Cleanup = Box<dyn FnOnce()>;

/// What an effect callback returns.
pub type EffectResult = Result<Option<Cleanup>, RenderError>;

/// An effect callback.
pub type EffectFn = Box<dyn FnOnce() -> EffectResult>;

/// When an effect runs relative to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// Before any host mutation; reads the old tree.
    Snapshot,
    /// Right after mutation, synchronously, bottom-up.
    Layout,
    /// After commit, as a separate task.
    Passive,
}

/// Dependencies that decide whether an effect re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deps(Option<u64>);

impl Deps {
    /// Re-run after every commit.
    pub fn always() -> Self {
        Deps(None)
    }

    /// Re-run whenever `value` hashes differently from the last render.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Deps(Some(hasher.finish()))
    }

    /// Run once on mount, clean up on unmount.
    pub fn once() -> Self {
        Deps::of(&())
    }

    pub(crate) fn unchanged_from(self, previous: Deps) -> bool {
        matches!((self.0, previous.0), (Some(a), Some(b)) if a == b)
    }
}

/// Cleanup slot shared by every render of one effect.
#[derive(Default)]
pub(crate) struct EffectInstance {
    destroy: RefCell<Option<Cleanup>>,
}

impl EffectInstance {
    pub(crate) fn set_destroy(&self, cleanup: Option<Cleanup>) {
        *self.destroy.borrow_mut() = cleanup;
    }

    pub(crate) fn take_destroy(&self) -> Option<Cleanup> {
        self.destroy.borrow_mut().take()
    }
}

pub(crate) struct EffectRecord {
    pub(crate) kind: EffectKind,
    pub(crate) has_effect: bool,
    pub(crate) deps: Deps,
    pub(crate) create: RefCell<Option<EffectFn>>,
    pub(crate) inst: Rc<EffectInstance>,
}

impl EffectRecord {
    /// Build a record, reusing the previous render's instance when the
    /// effect in the same position has the same kind.
    pub(crate) fn new(
        kind: EffectKind,
        deps: Deps,
        create: EffectFn,
        previous: Option<&EffectRecord>,
    ) -> Self {
        match previous {
            Some(prev) if prev.kind == kind => {
                let has_effect = !deps.unchanged_from(prev.deps);
                Self {
                    kind,
                    has_effect,
                    deps,
                    create: RefCell::new(has_effect.then_some(create)),
                    inst: Rc::clone(&prev.inst),
                }
            }
            _ => Self {
                kind,
                has_effect: true,
                deps,
                create: RefCell::new(Some(create)),
                inst: Rc::new(EffectInstance::default()),
            },
        }
    }

    pub(crate) fn take_create(&self) -> Option<EffectFn> {
        self.create.borrow_mut().take()
    }
}

impl fmt::Debug for EffectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRecord")
            .field("kind", &self.kind)
            .field("has_effect", &self.has_effect)
            .finish()
    }
}

/// Effects declared by one render, in declaration order.
pub(crate) type EffectList = Rc<Vec<EffectRecord>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EffectFn {
        Box::new(|| Ok(None))
    }

    #[test]
    fn equal_deps_skip_the_effect() {
        let first = EffectRecord::new(EffectKind::Passive, Deps::of(&1), noop(), None);
        assert!(first.has_effect);
        let second = EffectRecord::new(EffectKind::Passive, Deps::of(&1), noop(), Some(&first));
        assert!(!second.has_effect);
        assert!(second.take_create().is_none());
        assert!(Rc::ptr_eq(&first.inst, &second.inst));
    }

    #[test]
    fn changed_or_missing_deps_rerun() {
        let first = EffectRecord::new(EffectKind::Layout, Deps::of(&1), noop(), None);
        let changed = EffectRecord::new(EffectKind::Layout, Deps::of(&2), noop(), Some(&first));
        assert!(changed.has_effect);
        let always = EffectRecord::new(EffectKind::Layout, Deps::always(), noop(), Some(&first));
        assert!(always.has_effect);
        let again = EffectRecord::new(EffectKind::Layout, Deps::always(), noop(), Some(&always));
        assert!(again.has_effect);
    }

    #[test]
    fn kind_mismatch_gets_fresh_instance() {
        let first = EffectRecord::new(EffectKind::Layout, Deps::once(), noop(), None);
        let second = EffectRecord::new(EffectKind::Passive, Deps::once(), noop(), Some(&first));
        assert!(second.has_effect);
        assert!(!Rc::ptr_eq(&first.inst, &second.inst));
    }

    #[test]
    fn instance_holds_cleanup_between_renders() {
        let inst = EffectInstance::default();
        let ran = Rc::new(std::cell::Cell::new(false));
        let seen = Rc::clone(&ran);
        inst.set_destroy(Some(Box::new(move || seen.set(true))));
        if let Some(destroy) = inst.take_destroy() {
            destroy();
        }
        assert!(ran.get());
        assert!(inst.take_destroy().is_none());
    }
}
