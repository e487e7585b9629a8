#![forbid(unsafe_code)]

//! Fibers: the mutable nodes of the reconciliation tree.
//!
//! Fibers live in a [`SlotMap`](slotmap::SlotMap) owned by the reconciler
//! and point at each other by [`FiberId`]. Each logical node has up to two
//! fibers, linked through `alternate`: the *current* one (what is on
//! screen) and the *work-in-progress* one (what the render is building).
//! A commit swaps the roles by re-pointing the root.

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::context::Dependencies;
use crate::effects::EffectList;
use crate::element::{ElementType, Key, NodeRef, Props};
use crate::lane::Lanes;
use crate::resource::Wakeable;
use crate::root::RootId;
use crate::update_queue::{StateValue, UpdateQueue};

new_key_type! {
    /// Arena key of a fiber.
    pub struct FiberId;
}

/// What a fiber does during render and commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    HostRoot,
    HostComponent,
    HostText,
    Component,
    Fragment,
    Suspense,
    Offscreen,
    ContextProvider,
}

impl WorkTag {
    pub(crate) fn of(ty: &ElementType) -> Self {
        match ty {
            ElementType::Root => WorkTag::HostRoot,
            ElementType::Text => WorkTag::HostText,
            ElementType::Host(_) => WorkTag::HostComponent,
            ElementType::Component(_) => WorkTag::Component,
            ElementType::Fragment => WorkTag::Fragment,
            ElementType::Suspense => WorkTag::Suspense,
            ElementType::Offscreen => WorkTag::Offscreen,
            ElementType::Provider(_) => WorkTag::ContextProvider,
        }
    }

    /// Fibers that own a host instance.
    pub fn is_host(self) -> bool {
        matches!(self, WorkTag::HostComponent | WorkTag::HostText)
    }
}

bitflags! {
    /// Side effects a fiber needs at commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        const PERFORMED_WORK = 1 << 0;
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const CHILD_DELETION = 1 << 4;
        const CONTENT_RESET = 1 << 5;
        const CALLBACK = 1 << 6;
        const DID_CAPTURE = 1 << 7;
        const REF = 1 << 9;
        const SNAPSHOT = 1 << 10;
        const PASSIVE = 1 << 11;
        const VISIBILITY = 1 << 13;
        const INCOMPLETE = 1 << 15;
        const SHOULD_CAPTURE = 1 << 16;

        /// Everything a completed fiber may carry into commit.
        const HOST_EFFECT_MASK = 0b0111_1111_1111_1111;
        const BEFORE_MUTATION_MASK = Self::UPDATE.bits() | Self::SNAPSHOT.bits();
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::CONTENT_RESET.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();
        const LAYOUT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();
        const PASSIVE_MASK = Self::PASSIVE.bits() | Self::CHILD_DELETION.bits();
    }
}

bitflags! {
    /// Rendering mode inherited from the root.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mode: u8 {
        /// Concurrent rendering (time slicing, transitions).
        const CONCURRENT = 1 << 0;
        /// Extra development checks.
        const STRICT = 1 << 1;
    }
}

/// Memoized per-tag state.
#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    /// Component or root state produced by the update queue.
    State(StateValue),
    /// A suspense boundary currently showing its fallback.
    SuspenseFallback,
    /// Visibility of an offscreen subtree.
    Offscreen { hidden: bool },
}

impl FiberState {
    pub(crate) fn state(&self) -> Option<&StateValue> {
        match self {
            FiberState::State(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn is_suspense_fallback(&self) -> bool {
        matches!(self, FiberState::SuspenseFallback)
    }

    pub(crate) fn is_hidden(&self) -> bool {
        matches!(self, FiberState::Offscreen { hidden: true })
    }
}

/// One node of the fiber tree.
pub struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: ElementType,
    pub(crate) pending_props: Props,
    pub(crate) memoized_props: Option<Props>,
    pub(crate) memoized_state: FiberState,
    pub(crate) update_queue: Option<UpdateQueue>,
    pub(crate) dependencies: Option<Dependencies>,
    pub(crate) effects: Option<EffectList>,
    /// Wakeables a suspense boundary retries on.
    pub(crate) retries: Vec<Wakeable>,
    pub(crate) node_ref: Option<NodeRef>,
    pub(crate) mode: Mode,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    pub(crate) ret: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) alternate: Option<FiberId>,
    pub(crate) index: usize,

    /// Set on host-root fibers.
    pub(crate) root: Option<RootId>,
}

impl Fiber {
    pub(crate) fn new(element_type: ElementType, pending_props: Props, key: Option<Key>, mode: Mode) -> Self {
        Self {
            tag: WorkTag::of(&element_type),
            key,
            element_type,
            pending_props,
            memoized_props: None,
            memoized_state: FiberState::None,
            update_queue: None,
            dependencies: None,
            effects: None,
            retries: Vec::new(),
            node_ref: None,
            mode,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
            ret: None,
            child: None,
            sibling: None,
            alternate: None,
            index: 0,
            root: None,
        }
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn props(&self) -> Option<&Props> {
        self.memoized_props.as_ref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn subtree_flags(&self) -> Flags {
        self.subtree_flags
    }

    pub fn lanes(&self) -> Lanes {
        self.lanes
    }

    pub fn child_lanes(&self) -> Lanes {
        self.child_lanes
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.ret
    }

    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True for an offscreen fiber whose content is hidden.
    pub fn is_hidden(&self) -> bool {
        self.memoized_state.is_hidden()
    }

    /// True for a suspense fiber currently showing its fallback.
    pub fn is_showing_fallback(&self) -> bool {
        self.memoized_state.is_suspense_fallback()
    }

    /// Name for logs and component stacks.
    pub fn name(&self) -> String {
        self.element_type.name()
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("type", &self.element_type)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("lanes", &self.lanes.label())
            .field("child_lanes", &self.child_lanes.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn tags_follow_element_type() {
        assert_eq!(WorkTag::of(&ElementType::Root), WorkTag::HostRoot);
        assert_eq!(WorkTag::of(&ElementType::Host(Rc::from("div"))), WorkTag::HostComponent);
        assert!(WorkTag::HostText.is_host());
        assert!(!WorkTag::Fragment.is_host());
    }

    #[test]
    fn masks_group_commit_passes() {
        assert!(Flags::MUTATION_MASK.contains(Flags::PLACEMENT | Flags::CHILD_DELETION));
        assert!(Flags::PASSIVE_MASK.contains(Flags::CHILD_DELETION));
        assert!(Flags::HOST_EFFECT_MASK.contains(Flags::VISIBILITY | Flags::DID_CAPTURE));
        assert!(!Flags::HOST_EFFECT_MASK.intersects(Flags::INCOMPLETE | Flags::SHOULD_CAPTURE));
    }

    #[test]
    fn new_fiber_is_detached() {
        let fiber = Fiber::new(ElementType::Fragment, Props::empty(), None, Mode::CONCURRENT);
        assert!(fiber.parent().is_none());
        assert!(fiber.alternate().is_none());
        assert!(fiber.flags().is_empty());
        assert_eq!(fiber.tag(), WorkTag::Fragment);
        assert!(!fiber.is_hidden());
    }
}
