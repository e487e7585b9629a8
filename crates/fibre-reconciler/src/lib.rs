#![forbid(unsafe_code)]

//! fibre reconciler
//!
//! Reconciles declarative element trees into a mutable host tree. Renders
//! are incremental and interruptible: every fiber boundary is a yield
//! point, more urgent updates discard work in progress, and a finished tree
//! becomes visible in one commit.
//!
//! # Key Components
//!
//! - [`Reconciler`] - fiber arena, roots, public entry points
//! - [`Lanes`] - 31-bit priority sets; [`RootLanes`] tracks a root's
//!   pending, suspended, pinged and expired work
//! - [`HostConfig`] - the host tree the reconciler mutates
//! - [`Component`] / [`RenderContext`] - user components, state, effects
//! - [`Resource`] - pending values that suspend a render
//! - [`UpdateChannel`] / [`StateHandle`] - updates from outside the engine
//!
//! # Phases
//!
//! 1. **Render** (`work_loop`, `begin_work`, `complete_work`, `throw`):
//!    builds the work-in-progress twin of the current tree, one fiber at a
//!    time, on a scheduler task.
//! 2. **Commit** (`commit`): snapshot, mutation and layout passes run
//!    synchronously; passive effects run on a later task.

pub mod channel;
mod begin_work;
mod child_fiber;
mod commit;
pub mod component;
mod complete_work;
pub mod context;
pub mod effects;
pub mod element;
pub mod error;
pub mod fiber;
pub mod host;
pub mod lane;
mod reconciler;
pub mod resource;
pub mod root;
mod throw;
pub mod update_queue;
mod work_loop;

pub use channel::{StateHandle, UpdateChannel};
pub use component::{Component, ComponentType, Render, RenderContext, component};
pub use context::{Context, ContextId};
pub use effects::{Cleanup, Deps, EffectFn, EffectKind, EffectResult};
pub use element::{
    Element, ElementBuilder, ElementNode, ElementType, Key, NodeRef, PropValue, Props, fragment,
    host, suspense, text,
};
pub use error::{
    CapturedError, HostError, HostResult, Interrupt, ReconcileError, ReconcileResult, RenderError,
};
pub use fiber::{Fiber, FiberId, Flags, Mode, WorkTag};
pub use host::HostConfig;
pub use lane::{
    EntanglementPolicy, EventPriority, Lane, LaneAllocator, Lanes, RootLanes, TOTAL_LANES,
};
pub use reconciler::{ErrorHook, Reconciler, ReconcilerConfig, RootOptions};
pub use resource::{Resource, Thenable, Wakeable};
pub use root::{FiberRoot, RootId, RootTag};
pub use update_queue::{Payload, Reducer, StateValue, Update, UpdateCallback, UpdateTag};
