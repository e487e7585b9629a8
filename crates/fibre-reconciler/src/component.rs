#![forbid(unsafe_code)]

//! User components and the context they render with.

use std::fmt;
use std::rc::Rc;

use crate::channel::{StateHandle, UpdateChannel};
use crate::context::{Context, ContextStack, Dependencies};
use crate::effects::{Deps, EffectKind, EffectList, EffectRecord, EffectResult};
use crate::element::{Element, ElementBuilder, ElementType, Props};
use crate::error::{CapturedError, Interrupt};
use crate::fiber::{FiberId, Mode};
use crate::update_queue::StateValue;

/// What a render returns.
pub type Render = Result<Element, Interrupt>;

/// A user component.
///
/// `render` must be a pure function of props, state and context: it may be
/// called several times for one commit, or for a commit that never happens.
/// Side effects belong in effects registered through [`RenderContext`].
pub trait Component: 'static {
    /// Name used in logs and component stacks.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// State before any update has been processed.
    fn initial_state(&self, _props: &Props) -> Option<StateValue> {
        None
    }

    fn render(&self, cx: &mut RenderContext<'_>) -> Render;

    /// Boundaries catch render and commit errors from their subtree.
    fn is_error_boundary(&self) -> bool {
        false
    }

    /// State to render with after a descendant failed.
    fn derive_state_from_error(&self, _error: &CapturedError) -> Option<StateValue> {
        None
    }

    /// Runs in the layout pass of the commit that shows the error state.
    fn did_catch(&self, _error: &CapturedError) {}
}

/// Shared handle to a component. Two handles are the same type iff they
/// share the allocation.
#[derive(Clone)]
pub struct ComponentType(Rc<dyn Component>);

impl ComponentType {
    pub fn new(component: impl Component) -> Self {
        ComponentType(Rc::new(component))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Start an element of this component.
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Component(self.clone()))
    }

    pub(crate) fn get(&self) -> &Rc<dyn Component> {
        &self.0
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct FnComponent<F> {
    name: &'static str,
    render: F,
}

impl<F> Component for FnComponent<F>
where
    F: Fn(&mut RenderContext<'_>) -> Render + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn render(&self, cx: &mut RenderContext<'_>) -> Render {
        (self.render)(cx)
    }
}

/// A stateless component from a closure.
pub fn component<F>(name: &'static str, render: F) -> ComponentType
where
    F: Fn(&mut RenderContext<'_>) -> Render + 'static,
{
    ComponentType::new(FnComponent { name, render })
}

/// Everything a component may read or register while rendering.
pub struct RenderContext<'a> {
    props: &'a Props,
    state: Option<StateValue>,
    fiber: FiberId,
    mode: Mode,
    channel: &'a Rc<UpdateChannel>,
    contexts: &'a ContextStack,
    previous_effects: Option<EffectList>,
    effects: Vec<EffectRecord>,
    dependencies: Dependencies,
}

/// What a render registered, handed back to the reconciler.
pub(crate) struct RenderOutput {
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) dependencies: Dependencies,
}

impl<'a> RenderContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        props: &'a Props,
        state: Option<StateValue>,
        fiber: FiberId,
        mode: Mode,
        channel: &'a Rc<UpdateChannel>,
        contexts: &'a ContextStack,
        previous_effects: Option<EffectList>,
    ) -> Self {
        Self {
            props,
            state,
            fiber,
            mode,
            channel,
            contexts,
            previous_effects,
            effects: Vec::new(),
            dependencies: Dependencies::new(),
        }
    }

    pub fn props(&self) -> &Props {
        self.props
    }

    /// Current state, if it is a `T`.
    pub fn state<T: 'static>(&self) -> Option<Rc<T>> {
        self.state.clone()?.downcast::<T>().ok()
    }

    /// Handle for dispatching updates to this component.
    pub fn handle(&self) -> StateHandle {
        StateHandle::new(self.fiber, self.mode, self.channel)
    }

    pub fn is_concurrent(&self) -> bool {
        self.mode.contains(Mode::CONCURRENT)
    }

    /// Read the nearest provided value of `context` and subscribe to it.
    pub fn read_context<T: 'static>(&mut self, context: &Context<T>) -> Rc<T> {
        let id = context.id();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self.contexts
            .read(id)
            .and_then(|value| value.downcast::<T>().ok())
            .unwrap_or_else(|| context.default_value())
    }

    /// Run `create` after the commit, when `deps` changed.
    pub fn effect<F>(&mut self, deps: Deps, create: F)
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.push_effect(EffectKind::Passive, deps, Box::new(create));
    }

    /// Run `create` synchronously in the layout pass, when `deps` changed.
    pub fn layout_effect<F>(&mut self, deps: Deps, create: F)
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.push_effect(EffectKind::Layout, deps, Box::new(create));
    }

    /// Run `create` before the host tree is mutated, when `deps` changed.
    pub fn snapshot_effect<F>(&mut self, deps: Deps, create: F)
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.push_effect(EffectKind::Snapshot, deps, Box::new(create));
    }

    fn push_effect(&mut self, kind: EffectKind, deps: Deps, create: crate::effects::EffectFn) {
        let index = self.effects.len();
        let previous = self
            .previous_effects
            .as_ref()
            .and_then(|list| list.get(index));
        let record = EffectRecord::new(kind, deps, create, previous);
        self.effects.push(record);
    }

    pub(crate) fn finish(self) -> RenderOutput {
        RenderOutput {
            effects: self.effects,
            dependencies: self.dependencies,
        }
    }
}
