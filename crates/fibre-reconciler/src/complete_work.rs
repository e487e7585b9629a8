#![forbid(unsafe_code)]

//! The ascending half of a unit of work.
//!
//! Completing a fiber creates or diffs its host node and bubbles the lanes
//! and effect flags of its children up into it, so the commit can skip
//! subtrees with nothing to do.

use std::rc::Rc;

use crate::element::{ElementType, Props};
use crate::error::{HostResult, Interrupt, invariant_violation};
use crate::fiber::{FiberId, Flags, Mode, WorkTag};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn complete_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<(), Interrupt> {
        match self.node(wip).tag {
            WorkTag::HostRoot => {
                if current.is_none_or(|c| self.node(c).child.is_none()) {
                    // First commit into this container.
                    self.node_mut(wip).flags |= Flags::SNAPSHOT;
                }
            }
            WorkTag::HostComponent => self.complete_host_component(current, wip)?,
            WorkTag::HostText => self.complete_host_text(current, wip)?,
            WorkTag::Suspense => self.complete_suspense(current, wip),
            WorkTag::Offscreen => {
                let hidden = self.node(wip).memoized_state.is_hidden();
                let was_hidden = current.is_some_and(|c| self.node(c).memoized_state.is_hidden());
                if current.is_some() && hidden != was_hidden {
                    self.node_mut(wip).flags |= Flags::VISIBILITY;
                }
                if hidden {
                    // Hidden work is deferred until the content is revealed.
                    self.node_mut(wip).child_lanes = Lanes::empty();
                    return Ok(());
                }
            }
            WorkTag::ContextProvider => {
                if let ElementType::Provider(context) = self.node(wip).element_type {
                    self.contexts.pop(context);
                }
            }
            WorkTag::Component | WorkTag::Fragment => {}
        }
        self.bubble_properties(wip);
        Ok(())
    }

    fn complete_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<(), Interrupt> {
        let kind = match &self.node(wip).element_type {
            ElementType::Host(kind) => Rc::clone(kind),
            _ => invariant_violation("host component without a host kind"),
        };
        let new_props = self.node(wip).pending_props.clone();
        let existing = current.and_then(|c| self.instances.get(wip).cloned().map(|i| (c, i)));

        match existing {
            Some((cur, instance)) => {
                let old_props = self.node(cur).memoized_props.clone().unwrap_or_default();
                if !Props::same(&old_props, &new_props) {
                    match self.host.prepare_update(&instance, &kind, &old_props, &new_props) {
                        Some(payload) => {
                            self.payloads.insert(wip, payload);
                            self.node_mut(wip).flags |= Flags::UPDATE;
                        }
                        None => {
                            self.payloads.remove(wip);
                        }
                    }
                }
            }
            None => {
                let instance = self.host.create_instance(&kind, &new_props)?;
                self.append_all_children(&instance, wip)?;
                self.host.finalize_initial_children(&instance, &kind, &new_props)?;
                self.instances.insert(wip, instance);
            }
        }
        Ok(())
    }

    /// Attach the top-level host nodes below `fiber` to a new `parent`.
    fn append_all_children(&mut self, parent: &H::Instance, fiber: FiberId) -> HostResult<()> {
        let mut child = self.node(fiber).child;
        while let Some(id) = child {
            if self.node(id).tag.is_host() {
                if let Some(instance) = self.instances.get(id).cloned() {
                    self.host.append_initial_child(parent, &instance)?;
                }
            } else {
                self.append_all_children(parent, id)?;
            }
            child = self.node(id).sibling;
        }
        Ok(())
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<(), Interrupt> {
        let new_text = self
            .node(wip)
            .pending_props
            .text_content()
            .unwrap_or_default()
            .to_string();
        match current {
            Some(cur) if self.instances.contains_key(wip) => {
                let old_text = self
                    .node(cur)
                    .memoized_props
                    .as_ref()
                    .and_then(Props::text_content)
                    .map(str::to_string);
                if old_text.as_deref() != Some(new_text.as_str()) {
                    self.node_mut(wip).flags |= Flags::UPDATE;
                }
            }
            _ => {
                let instance = self.host.create_text_instance(&new_text)?;
                self.instances.insert(wip, instance);
            }
        }
        Ok(())
    }

    fn complete_suspense(&mut self, current: Option<FiberId>, wip: FiberId) {
        let showing = self.node(wip).memoized_state.is_suspense_fallback();
        let was_showing = current.is_some_and(|c| self.node(c).memoized_state.is_suspense_fallback());
        if showing && !was_showing {
            if let Some(offscreen) = self.node(wip).child {
                self.node_mut(offscreen).flags |= Flags::VISIBILITY;
            }
            if self.node(wip).mode.contains(Mode::CONCURRENT) {
                if current.is_none() {
                    self.render_did_suspend();
                } else {
                    self.render_did_suspend_delay_if_possible();
                }
            }
        }
        if !self.node(wip).retries.is_empty() {
            // Retry listeners are attached at commit.
            self.node_mut(wip).flags |= Flags::UPDATE;
        }
    }

    /// Merge the children's lanes and flags into `wip`.
    fn bubble_properties(&mut self, wip: FiberId) {
        let child = self.node(wip).child;
        let did_bailout = child.is_some()
            && self
                .node(wip)
                .alternate
                .and_then(|a| self.fibers.get(a))
                .is_some_and(|a| a.child == child);

        let mut child_lanes = Lanes::empty();
        let mut subtree_flags = Flags::empty();
        let mut next = child;
        while let Some(id) = next {
            let c = self.node_mut(id);
            child_lanes |= c.lanes | c.child_lanes;
            if !did_bailout {
                subtree_flags |= c.subtree_flags | c.flags;
            }
            c.ret = Some(wip);
            next = c.sibling;
        }
        let f = self.node_mut(wip);
        f.child_lanes = child_lanes;
        f.subtree_flags |= subtree_flags;
    }
}
