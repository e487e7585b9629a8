#![forbid(unsafe_code)]

//! Roots: one per mounted tree.

use std::collections::HashMap;

use fibre_scheduler::TaskHandle;
use slotmap::new_key_type;

use crate::fiber::FiberId;
use crate::lane::{Lane, Lanes, RootLanes};

new_key_type! {
    /// Arena key of a root.
    pub struct RootId;
}

/// How updates on a root are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootTag {
    /// Every update renders synchronously.
    Legacy,
    /// Updates get lanes; non-sync renders are time-sliced.
    Concurrent,
}

/// Bookkeeping for one mounted tree.
pub struct FiberRoot<C> {
    pub(crate) tag: RootTag,
    pub(crate) container: C,
    /// The committed host-root fiber.
    pub(crate) current: FiberId,
    /// Completed tree waiting to be committed.
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) finished_lanes: Lanes,
    pub(crate) lanes: RootLanes,
    /// Scheduled render task, if any.
    pub(crate) callback_node: Option<TaskHandle>,
    /// Most urgent lane of the scheduled render.
    pub(crate) callback_priority: Lane,
    /// Delayed commit of a suspended render.
    pub(crate) timeout_handle: Option<TaskHandle>,
    /// Lanes already waiting on each wakeable.
    pub(crate) ping_cache: HashMap<u64, Lanes>,
}

impl<C> FiberRoot<C> {
    pub(crate) fn new(tag: RootTag, container: C, current: FiberId) -> Self {
        Self {
            tag,
            container,
            current,
            finished_work: None,
            finished_lanes: Lanes::empty(),
            lanes: RootLanes::default(),
            callback_node: None,
            callback_priority: Lanes::empty(),
            timeout_handle: None,
            ping_cache: HashMap::new(),
        }
    }

    pub fn tag(&self) -> RootTag {
        self.tag
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    /// The committed host-root fiber.
    pub fn current(&self) -> FiberId {
        self.current
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.lanes.pending
    }

    pub fn suspended_lanes(&self) -> Lanes {
        self.lanes.suspended
    }

    pub fn expired_lanes(&self) -> Lanes {
        self.lanes.expired
    }

    /// True while a render task or a delayed commit is scheduled.
    pub fn has_scheduled_work(&self) -> bool {
        self.callback_node.is_some() || self.timeout_handle.is_some()
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for FiberRoot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberRoot")
            .field("tag", &self.tag)
            .field("container", &self.container)
            .field("pending", &self.lanes.pending.label())
            .field("callback_priority", &self.callback_priority.label())
            .finish()
    }
}
