#![forbid(unsafe_code)]

//! The descending half of a unit of work.
//!
//! `begin_work` either bails out (the fiber and, when possible, its whole
//! subtree are reused from the current tree) or re-renders the fiber and
//! reconciles its children. It returns the next fiber to begin, or `None`
//! when the fiber has no children to work on.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::component::{Component, RenderContext, RenderOutput};
use crate::context::ContextId;
use crate::effects::{EffectKind, EffectList};
use crate::element::{Element, ElementType, FALLBACK_PROP, PropValue, Props, VALUE_PROP};
use crate::error::{Interrupt, invariant_violation};
use crate::fiber::{Fiber, FiberId, FiberState, Flags, Mode, WorkTag};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;
use crate::update_queue::{Processed, StateValue, UpdateQueue, empty_state};

/// Prop holding an offscreen fiber's visibility.
pub(crate) const MODE_PROP: &str = "mode";
const HIDDEN: &str = "hidden";
const VISIBLE: &str = "visible";

fn offscreen_props(hidden: bool, children: Vec<Element>) -> Props {
    let mut attrs = BTreeMap::new();
    let mode = if hidden { HIDDEN } else { VISIBLE };
    attrs.insert(Rc::from(MODE_PROP), PropValue::from(mode));
    Props::from_parts(attrs, children)
}

/// Value a provider's props carry.
pub(crate) fn provider_value(props: &Props) -> Rc<dyn Any> {
    match props.get(VALUE_PROP) {
        Some(PropValue::Data(value)) => Rc::clone(value),
        _ => Rc::new(()),
    }
}

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Result<Option<FiberId>, Interrupt> {
        if let Some(cur) = current {
            let props_changed = match &self.node(cur).memoized_props {
                Some(old) => !Props::same(old, &self.node(wip).pending_props),
                None => true,
            };
            let has_scheduled_work = self.node(cur).lanes.intersects(lanes);
            let did_capture = self.node(wip).flags.contains(Flags::DID_CAPTURE);
            if !props_changed && !has_scheduled_work && !did_capture {
                return Ok(self.attempt_early_bailout(wip, lanes));
            }
        }

        self.node_mut(wip).lanes = Lanes::empty();
        let tag = self.node(wip).tag;
        trace!(fiber = ?wip, ?tag, "begin");
        match tag {
            WorkTag::HostRoot => Ok(self.update_host_root(current, wip, lanes)),
            WorkTag::HostComponent => Ok(self.update_host_component(current, wip, lanes)),
            WorkTag::HostText => Ok(None),
            WorkTag::Component => self.update_component(current, wip, lanes),
            WorkTag::Fragment => {
                let children = self.node(wip).pending_props.children().to_vec();
                self.reconcile_children(current, wip, children, lanes);
                Ok(self.node(wip).child)
            }
            WorkTag::Suspense => Ok(self.update_suspense(current, wip, lanes)),
            WorkTag::Offscreen => Ok(self.update_offscreen(current, wip, lanes)),
            WorkTag::ContextProvider => Ok(self.update_context_provider(current, wip, lanes)),
        }
    }

    /// Nothing changed on this fiber. Keep the context stack balanced and
    /// skip it.
    fn attempt_early_bailout(&mut self, wip: FiberId, lanes: Lanes) -> Option<FiberId> {
        if let ElementType::Provider(context) = self.node(wip).element_type {
            let value = self
                .node(wip)
                .memoized_props
                .as_ref()
                .map_or_else(|| Rc::new(()) as Rc<dyn Any>, provider_value);
            self.contexts.push(context, value);
        }
        self.bailout_on_already_finished_work(wip, lanes)
    }

    /// Reuse the fiber. Its children are cloned only if some descendant
    /// has work in `lanes`; otherwise the whole subtree is skipped.
    pub(crate) fn bailout_on_already_finished_work(
        &mut self,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        self.render.skipped_lanes |= self.node(wip).lanes;
        if !lanes.intersects(self.node(wip).child_lanes) {
            return None;
        }
        self.clone_child_fibers(wip);
        self.node(wip).child
    }

    fn clone_child_fibers(&mut self, wip: FiberId) {
        let Some(first) = self.node(wip).child else {
            return;
        };
        let props = self.node(first).pending_props.clone();
        let mut new_child = self.create_work_in_progress(first, props);
        self.node_mut(wip).child = Some(new_child);
        self.node_mut(new_child).ret = Some(wip);

        let mut current_child = first;
        while let Some(next) = self.node(current_child).sibling {
            current_child = next;
            let props = self.node(next).pending_props.clone();
            let new_sibling = self.create_work_in_progress(next, props);
            self.node_mut(new_child).sibling = Some(new_sibling);
            self.node_mut(new_sibling).ret = Some(wip);
            new_child = new_sibling;
        }
        self.node_mut(new_child).sibling = None;
    }

    /// Move newly dispatched updates onto both generations and fold the
    /// ones in `lanes` into state.
    fn process_update_queue(&mut self, wip: FiberId, lanes: Lanes) -> Processed {
        let Some(mut queue) = self.node_mut(wip).update_queue.take() else {
            invariant_violation("processing a fiber without an update queue");
        };
        let pending = queue.take_pending();
        if !pending.is_empty() {
            if let Some(alternate) = self.node(wip).alternate {
                if let Some(alt_queue) = self
                    .fibers
                    .get_mut(alternate)
                    .and_then(|f| f.update_queue.as_mut())
                {
                    alt_queue.base_updates.extend(pending.iter().cloned());
                }
            }
            queue.base_updates.extend(pending);
        }

        let props = self.node(wip).pending_props.clone();
        let processed = queue.process(&props, lanes);
        self.render.skipped_lanes |= processed.remaining;

        let f = self.node_mut(wip);
        f.update_queue = Some(queue);
        f.lanes = processed.remaining;
        if processed.has_callbacks {
            f.flags |= Flags::CALLBACK;
        }
        processed
    }

    fn update_host_root(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let prev_element = self
            .node(wip)
            .memoized_state
            .state()
            .and_then(|s| s.downcast_ref::<Element>().cloned());
        let processed = self.process_update_queue(wip, lanes);
        let next_element = processed
            .state
            .downcast_ref::<Element>()
            .cloned()
            .unwrap_or_default();
        self.node_mut(wip).memoized_state = FiberState::State(processed.state);

        if prev_element.is_some_and(|prev| prev.same(&next_element)) && !processed.did_capture {
            return self.bailout_on_already_finished_work(wip, lanes);
        }
        self.reconcile_children(current, wip, next_element.into_children(), lanes);
        self.node(wip).child
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let kind = match &self.node(wip).element_type {
            ElementType::Host(kind) => Rc::clone(kind),
            _ => invariant_violation("host component without a host kind"),
        };
        let next_props = self.node(wip).pending_props.clone();
        let mut children = next_props.children().to_vec();
        if self.host.should_set_text_content(&kind, &next_props) {
            // The host renders the text itself.
            children.clear();
        } else if let Some(prev) = current.and_then(|c| self.node(c).memoized_props.clone()) {
            if self.host.should_set_text_content(&kind, &prev) {
                self.node_mut(wip).flags |= Flags::CONTENT_RESET;
            }
        }
        self.mark_ref(current, wip);
        self.reconcile_children(current, wip, children, lanes);
        self.node(wip).child
    }

    fn mark_ref(&mut self, current: Option<FiberId>, wip: FiberId) {
        let new_ref = self.node(wip).node_ref.as_ref();
        let changed = match current {
            None => new_ref.is_some(),
            Some(cur) => match (self.node(cur).node_ref.as_ref(), new_ref) {
                (None, None) => false,
                (Some(a), Some(b)) => !crate::element::NodeRef::same(a, b),
                _ => true,
            },
        };
        if changed {
            self.node_mut(wip).flags |= Flags::REF;
        }
    }

    fn update_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Result<Option<FiberId>, Interrupt> {
        let component = match &self.node(wip).element_type {
            ElementType::Component(ty) => Rc::clone(ty.get()),
            _ => invariant_violation("component fiber without a component type"),
        };
        let props = self.node(wip).pending_props.clone();

        if self.node(wip).update_queue.is_none() {
            let initial = component.initial_state(&props).unwrap_or_else(empty_state);
            let f = self.node_mut(wip);
            f.update_queue = Some(UpdateQueue::new(Rc::clone(&initial)));
            f.memoized_state = FiberState::State(initial);
        }
        let processed = self.process_update_queue(wip, lanes);
        let did_capture = self.node(wip).flags.contains(Flags::DID_CAPTURE) || processed.did_capture;
        let state = processed.state;
        self.node_mut(wip).memoized_state = FiberState::State(Rc::clone(&state));

        if !processed.has_force_update && !did_capture {
            if let Some(cur) = current {
                let cur = self.node(cur);
                let unchanged = cur.dependencies.as_ref().is_none_or(|d| d.is_empty())
                    && cur.memoized_props.as_ref().is_some_and(|old| Props::same(old, &props))
                    && cur.memoized_state.state().is_some_and(|prev| Rc::ptr_eq(prev, &state));
                if unchanged {
                    trace!(fiber = ?wip, "state unchanged, render skipped");
                    return Ok(self.bailout_on_already_finished_work(wip, lanes));
                }
            }
        }

        let mode = self.node(wip).mode;
        let previous_effects = current.and_then(|c| self.node(c).effects.clone());
        if mode.contains(Mode::STRICT) {
            // Render twice; the first result is thrown away.
            self.call_render(&component, &props, Rc::clone(&state), wip, mode, previous_effects.clone())?;
        }
        let (element, output) =
            self.call_render(&component, &props, state, wip, mode, previous_effects)?;

        let mut flags = Flags::PERFORMED_WORK;
        for effect in output.effects.iter().filter(|e| e.has_effect) {
            flags |= match effect.kind {
                EffectKind::Passive => Flags::PASSIVE,
                EffectKind::Layout => Flags::UPDATE,
                EffectKind::Snapshot => Flags::SNAPSHOT,
            };
        }
        let f = self.node_mut(wip);
        f.flags |= flags;
        f.effects = Some(EffectList::new(output.effects));
        f.dependencies = Some(output.dependencies);

        match current {
            Some(cur) if did_capture => {
                // Remount the children: nothing from the failed subtree is
                // reused.
                let current_first = self.node(cur).child;
                self.reconcile_child_fibers(wip, current_first, Vec::new(), lanes, true);
                let first = self.reconcile_child_fibers(wip, None, element.into_children(), lanes, true);
                self.node_mut(wip).child = first;
            }
            _ => self.reconcile_children(current, wip, element.into_children(), lanes),
        }
        Ok(self.node(wip).child)
    }

    fn call_render(
        &self,
        component: &Rc<dyn Component>,
        props: &Props,
        state: StateValue,
        wip: FiberId,
        mode: Mode,
        previous_effects: Option<EffectList>,
    ) -> Result<(Element, RenderOutput), Interrupt> {
        let mut cx = RenderContext::new(
            props,
            Some(state),
            wip,
            mode,
            &self.channel,
            &self.contexts,
            previous_effects,
        );
        let element = component.render(&mut cx)?;
        Ok((element, cx.finish()))
    }

    fn update_context_provider(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let ElementType::Provider(context) = self.node(wip).element_type else {
            invariant_violation("provider fiber without a context");
        };
        let props = self.node(wip).pending_props.clone();
        let value = provider_value(&props);
        let old_value = self.node(wip).memoized_props.as_ref().map(provider_value);
        self.contexts.push(context, Rc::clone(&value));
        if let Some(old) = old_value {
            if !Rc::ptr_eq(&old, &value) {
                self.propagate_context_change(wip, context, lanes);
            }
        }
        self.reconcile_children(current, wip, props.children().to_vec(), lanes);
        self.node(wip).child
    }

    /// Schedule `lanes` on every fiber below `provider` that read `context`,
    /// so bailouts between the provider and the reader do not skip it.
    fn propagate_context_change(&mut self, provider: FiberId, context: ContextId, lanes: Lanes) {
        let mut stack: Vec<(FiberId, FiberId)> = Vec::new();
        if let Some(child) = self.node(provider).child {
            stack.push((child, provider));
        }
        while let Some((fiber, parent)) = stack.pop() {
            {
                let f = self.node_mut(fiber);
                f.ret = Some(parent);
                if let Some(sibling) = f.sibling {
                    stack.push((sibling, parent));
                }
            }
            let reads = self
                .node(fiber)
                .dependencies
                .as_ref()
                .is_some_and(|deps| deps.contains(&context));
            if reads {
                self.schedule_context_work(fiber, provider, lanes);
            }
            let nested_same_provider = matches!(
                self.node(fiber).element_type,
                ElementType::Provider(id) if id == context
            );
            if !nested_same_provider {
                if let Some(child) = self.node(fiber).child {
                    stack.push((child, fiber));
                }
            }
        }
    }

    fn schedule_context_work(&mut self, fiber: FiberId, provider: FiberId, lanes: Lanes) {
        self.mark_lanes(fiber, lanes, false);
        let mut node = self.node(fiber).ret;
        while let Some(id) = node {
            if id == provider {
                break;
            }
            self.mark_lanes(id, lanes, true);
            node = self.node(id).ret;
        }
    }

    fn mark_lanes(&mut self, fiber: FiberId, lanes: Lanes, child: bool) {
        let apply = |f: &mut Fiber| {
            if child {
                f.child_lanes |= lanes;
            } else {
                f.lanes |= lanes;
            }
        };
        let alternate = self.node(fiber).alternate;
        apply(self.node_mut(fiber));
        if let Some(alt) = alternate.and_then(|a| self.fibers.get_mut(a)) {
            apply(alt);
        }
    }

    fn update_suspense(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let props = self.node(wip).pending_props.clone();
        let show_fallback = {
            let f = self.node_mut(wip);
            let captured = f.flags.contains(Flags::DID_CAPTURE);
            f.flags.remove(Flags::DID_CAPTURE);
            captured
        };
        let primary_children = props.children().to_vec();
        let fallback_children = props
            .element(FALLBACK_PROP)
            .cloned()
            .unwrap_or_default()
            .into_children();

        let Some(cur) = current else {
            let primary = self.mount_offscreen(wip, show_fallback, primary_children, lanes);
            self.node_mut(wip).child = Some(primary);
            if !show_fallback {
                self.node_mut(wip).memoized_state = FiberState::None;
                return Some(primary);
            }
            let fallback = self.new_fallback_fragment(wip, fallback_children);
            self.node_mut(primary).sibling = Some(fallback);
            self.node_mut(wip).memoized_state = FiberState::SuspenseFallback;
            return Some(fallback);
        };

        let Some(current_primary) = self.node(cur).child else {
            invariant_violation("suspense boundary without primary content");
        };
        let current_fallback = self.node(current_primary).sibling;

        if show_fallback {
            let primary =
                self.create_work_in_progress(current_primary, offscreen_props(true, primary_children));
            {
                let f = self.node_mut(primary);
                f.lanes = Lanes::empty();
                f.child_lanes = Lanes::empty();
                f.memoized_state = FiberState::Offscreen { hidden: true };
                f.memoized_props = Some(f.pending_props.clone());
                f.ret = Some(wip);
                f.index = 0;
            }
            let fallback = match current_fallback {
                Some(existing) => {
                    let fallback =
                        self.create_work_in_progress(existing, Props::with_children(fallback_children));
                    self.node_mut(fallback).ret = Some(wip);
                    fallback
                }
                None => {
                    let fallback = self.new_fallback_fragment(wip, fallback_children);
                    self.node_mut(fallback).flags |= Flags::PLACEMENT;
                    fallback
                }
            };
            {
                let f = self.node_mut(fallback);
                f.index = 1;
                f.sibling = None;
            }
            self.node_mut(primary).sibling = Some(fallback);
            let f = self.node_mut(wip);
            f.child = Some(primary);
            f.memoized_state = FiberState::SuspenseFallback;
            trace!(boundary = ?wip, "showing fallback");
            return Some(fallback);
        }

        let primary =
            self.create_work_in_progress(current_primary, offscreen_props(false, primary_children));
        {
            let f = self.node_mut(primary);
            f.ret = Some(wip);
            f.sibling = None;
            f.index = 0;
        }
        if let Some(fallback) = current_fallback {
            self.delete_child(wip, fallback, true);
        }
        let f = self.node_mut(wip);
        f.child = Some(primary);
        f.memoized_state = FiberState::None;
        Some(primary)
    }

    fn mount_offscreen(
        &mut self,
        parent: FiberId,
        hidden: bool,
        children: Vec<Element>,
        lanes: Lanes,
    ) -> FiberId {
        let props = offscreen_props(hidden, children);
        let mode = self.node(parent).mode;
        let mut fiber = Fiber::new(ElementType::Offscreen, props.clone(), None, mode);
        fiber.ret = Some(parent);
        if hidden {
            // Never begun: its content waits for the retry.
            fiber.memoized_props = Some(props);
            fiber.memoized_state = FiberState::Offscreen { hidden: true };
        } else {
            fiber.lanes = lanes;
        }
        self.alloc_fiber(fiber)
    }

    fn new_fallback_fragment(&mut self, parent: FiberId, children: Vec<Element>) -> FiberId {
        let mode = self.node(parent).mode;
        let mut fiber = Fiber::new(
            ElementType::Fragment,
            Props::with_children(children),
            None,
            mode,
        );
        fiber.ret = Some(parent);
        fiber.index = 1;
        self.alloc_fiber(fiber)
    }

    fn update_offscreen(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let props = self.node(wip).pending_props.clone();
        let hidden = props.str(MODE_PROP) == Some(HIDDEN);
        self.node_mut(wip).memoized_state = FiberState::Offscreen { hidden };
        if hidden {
            return None;
        }
        self.reconcile_children(current, wip, props.children().to_vec(), lanes);
        self.node(wip).child
    }
}
