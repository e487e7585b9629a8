#![forbid(unsafe_code)]

//! Committing a finished tree.
//!
//! A commit runs three synchronous passes over the fibers whose flags (or
//! subtree flags) ask for them:
//!
//! 1. **before mutation**: snapshot effects read the old host tree; a root
//!    committing for the first time clears its container.
//! 2. **mutation**: deletions, then insertions and moves, then host
//!    updates and visibility changes. The root's `current` pointer is
//!    swapped right after this pass.
//! 3. **layout**: layout effects, update callbacks and refs, children
//!    before parents.
//!
//! Passive effects run later from a `Normal` scheduler task, or earlier if
//! anything needs the tree to be settled first. Errors raised by effects
//! and host operations in any pass are captured per fiber and turned into
//! synchronous updates on the nearest boundary; the pass keeps going.

use std::rc::Rc;

use fibre_scheduler::{PriorityLevel, TaskStatus};
use tracing::{debug, debug_span, warn};

use crate::channel::Message;
use crate::effects::EffectKind;
use crate::element::{ElementType, Props};
use crate::error::{
    CapturedError, HostResult, ReconcileError, ReconcileResult, RenderError, invariant_violation,
};
use crate::fiber::{FiberId, Flags, WorkTag};
use crate::host::HostConfig;
use crate::lane::{EventPriority, Lanes};
use crate::reconciler::{ExecutionContext, HostParent, Reconciler, task_error};
use crate::root::{RootId, RootTag};
use crate::throw::component_stack;
use crate::update_queue::Update;

impl<H: HostConfig> Reconciler<H> {
    /// Commit the finished work of `root`, if any.
    pub(crate) fn commit_root(&mut self, root: RootId) -> ReconcileResult<()> {
        let previous = self.channel.set_update_priority(Some(EventPriority::Discrete));
        let result = self.commit_root_impl(root);
        self.channel.set_update_priority(previous);
        result
    }

    /// Commit the tree a finished render left on `root`, if there is one.
    ///
    /// Returns whether a tree was committed. With nothing finished this is a
    /// no-op apart from flushing pending passive effects.
    pub fn commit_finished_work(&mut self, root: RootId) -> ReconcileResult<bool> {
        let finished = self.roots.get(root).is_some_and(|r| r.finished_work.is_some());
        self.commit_root(root)?;
        Ok(finished)
    }

    fn commit_root_impl(&mut self, root: RootId) -> ReconcileResult<()> {
        while self.flush_passive_effects()? {}
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            invariant_violation("commit started while already working");
        }
        let Some(r) = self.roots.get_mut(root) else {
            return Ok(());
        };
        let Some(finished) = r.finished_work.take() else {
            return Ok(());
        };
        let lanes = std::mem::take(&mut r.finished_lanes);
        if finished == r.current {
            invariant_violation("committing the tree that is already current");
        }
        r.callback_node = None;
        r.callback_priority = Lanes::empty();

        let (flags, subtree_flags, remaining) = {
            let f = self.node(finished);
            (f.flags, f.subtree_flags, f.lanes | f.child_lanes)
        };
        self.root_mut(root).lanes.mark_finished(remaining);
        if self.render.root == Some(root) {
            self.discard_render();
        }

        let all_flags = flags | subtree_flags;
        if all_flags.intersects(Flags::PASSIVE_MASK) && !self.root_does_have_passive_effects {
            self.root_does_have_passive_effects = true;
            self.schedule_passive_flush();
        }

        let has_effects = all_flags.intersects(
            Flags::BEFORE_MUTATION_MASK
                | Flags::MUTATION_MASK
                | Flags::LAYOUT_MASK
                | Flags::PASSIVE_MASK,
        );
        {
            let _span = debug_span!("commit_root", lanes = lanes.label()).entered();
            let previous = self.execution_context;
            self.execution_context |= ExecutionContext::COMMIT;
            if has_effects {
                self.commit_before_mutation_effects(root, finished);
                let container = self.root_ref(root).container.clone();
                self.host.prepare_for_commit(&container);
                self.commit_mutation_effects(finished);
                self.host.reset_after_commit(&container);
                self.root_mut(root).current = finished;
                self.commit_layout_effects(finished);
            } else {
                self.root_mut(root).current = finished;
            }
            self.execution_context = previous;
        }

        if std::mem::take(&mut self.root_does_have_passive_effects) {
            self.root_with_pending_passive_effects = Some(root);
            self.pending_passive_effects_lanes = lanes;
        } else {
            self.reset_committed_flags(finished);
        }

        self.process_inbox()?;
        let now = self.now();
        self.ensure_root_is_scheduled(root, now);

        for error in std::mem::take(&mut self.recoverable_errors) {
            warn!(error = %error.error, "recovered from render error");
            if let Some(hook) = &self.config.on_recoverable_error {
                hook(&error);
            }
        }
        let uncaught: Vec<CapturedError> = self.uncaught.borrow_mut().drain(..).collect();
        self.uncaught_log.extend(uncaught.iter().cloned());

        if self.pending_passive_effects_lanes.contains(Lanes::SYNC)
            && self.root_ref(root).tag != RootTag::Legacy
        {
            self.flush_passive_effects()?;
        }

        if self.root_ref(root).lanes.pending.contains(Lanes::SYNC) {
            if self.root_with_nested_updates == Some(root) {
                self.nested_update_count += 1;
            } else {
                self.nested_update_count = 0;
                self.root_with_nested_updates = Some(root);
            }
        } else {
            self.nested_update_count = 0;
        }

        self.sweep_orphans();
        debug!(?root, lanes = lanes.label(), "committed");
        if let Some(first) = uncaught.into_iter().next() {
            return Err(ReconcileError::Uncaught(first));
        }
        self.flush_sync_callbacks()
    }

    fn schedule_passive_flush(&mut self) {
        let handle = self
            .scheduler
            .schedule_callback(PriorityLevel::Normal, |r: &mut Self, _| {
                r.passive_task = None;
                r.flush_passive_effects().map_err(task_error)?;
                Ok(TaskStatus::Complete)
            });
        self.passive_task = Some(handle);
    }

    // ---- before mutation --------------------------------------------------

    fn commit_before_mutation_effects(&mut self, root: RootId, fiber: FiberId) {
        if self.node(fiber).subtree_flags.intersects(Flags::BEFORE_MUTATION_MASK) {
            for child in self.children(fiber) {
                self.commit_before_mutation_effects(root, child);
            }
        }
        if !self.node(fiber).flags.contains(Flags::SNAPSHOT) {
            return;
        }
        match self.node(fiber).tag {
            WorkTag::Component => {
                self.unmount_effects(fiber, EffectKind::Snapshot, true);
                self.mount_effects(fiber, EffectKind::Snapshot);
            }
            WorkTag::HostRoot => {
                let container = self.root_ref(root).container.clone();
                if let Err(err) = self.host.clear_container(&container) {
                    self.capture_commit_phase_error(fiber, err.into());
                }
            }
            _ => {}
        }
    }

    // ---- mutation ---------------------------------------------------------

    fn commit_mutation_effects(&mut self, fiber: FiberId) {
        let (flags, subtree_flags) = {
            let f = self.node(fiber);
            (f.flags, f.subtree_flags)
        };
        if flags.contains(Flags::CHILD_DELETION) {
            let deletions = self.node(fiber).deletions.clone();
            for deleted in deletions {
                self.commit_deletion(fiber, deleted);
            }
        }
        if subtree_flags.intersects(Flags::MUTATION_MASK) {
            for child in self.children(fiber) {
                self.commit_mutation_effects(child);
            }
        }
        if flags.contains(Flags::PLACEMENT) {
            if let Err(err) = self.commit_placement(fiber) {
                self.capture_commit_phase_error(fiber, err.into());
            }
            self.node_mut(fiber).flags.remove(Flags::PLACEMENT);
        }

        let current = self.node(fiber).alternate;
        match self.node(fiber).tag {
            WorkTag::Component => {
                if flags.contains(Flags::UPDATE) {
                    self.unmount_effects(fiber, EffectKind::Layout, true);
                }
            }
            WorkTag::HostComponent => {
                if let Err(err) = self.commit_host_component_mutation(fiber, current, flags) {
                    self.capture_commit_phase_error(fiber, err.into());
                }
            }
            WorkTag::HostText => {
                if flags.contains(Flags::UPDATE) {
                    if let Err(err) = self.commit_text_mutation(fiber, current) {
                        self.capture_commit_phase_error(fiber, err.into());
                    }
                }
            }
            WorkTag::Suspense => {
                let offscreen = self.node(fiber).child;
                let now_hidden = offscreen.is_some_and(|o| {
                    let o = self.node(o);
                    o.flags.contains(Flags::VISIBILITY) && o.memoized_state.is_hidden()
                });
                if now_hidden {
                    self.most_recent_fallback_time = self.now();
                }
                if flags.contains(Flags::UPDATE) {
                    self.attach_retry_listeners(fiber);
                }
            }
            WorkTag::Offscreen => {
                if flags.contains(Flags::VISIBILITY) {
                    let hidden = self.node(fiber).memoized_state.is_hidden();
                    self.toggle_host_children(fiber, hidden);
                }
            }
            WorkTag::HostRoot | WorkTag::Fragment | WorkTag::ContextProvider => {}
        }
    }

    fn commit_host_component_mutation(
        &mut self,
        fiber: FiberId,
        current: Option<FiberId>,
        flags: Flags,
    ) -> HostResult<()> {
        if flags.contains(Flags::REF) {
            if let Some(old) = current.and_then(|c| self.fibers.get(c)).and_then(|c| c.node_ref.clone()) {
                old.detach();
            }
        }
        let Some(instance) = self.instances.get(fiber).cloned() else {
            return Ok(());
        };
        // A placed child may already have reset the content and cleared
        // the flag.
        if self.node(fiber).flags.contains(Flags::CONTENT_RESET) {
            self.node_mut(fiber).flags.remove(Flags::CONTENT_RESET);
            self.host.reset_text_content(&instance)?;
        }
        if flags.contains(Flags::UPDATE) {
            if let Some(payload) = self.payloads.remove(fiber) {
                let new_props = self.node(fiber).memoized_props.clone().unwrap_or_default();
                let old_props = current
                    .and_then(|c| self.fibers.get(c))
                    .and_then(|c| c.memoized_props.clone())
                    .unwrap_or_else(|| new_props.clone());
                let kind = self.node(fiber).element_type.host_kind().unwrap_or_default().to_string();
                self.host
                    .commit_update(&instance, payload, &kind, &old_props, &new_props)?;
            }
        }
        Ok(())
    }

    fn commit_text_mutation(&mut self, fiber: FiberId, current: Option<FiberId>) -> HostResult<()> {
        let Some(instance) = self.instances.get(fiber).cloned() else {
            return Ok(());
        };
        let text_of = |props: Option<&Props>| {
            props
                .and_then(Props::text_content)
                .unwrap_or_default()
                .to_string()
        };
        let new_text = text_of(self.node(fiber).memoized_props.as_ref());
        let old_text = match current.and_then(|c| self.fibers.get(c)) {
            Some(c) => text_of(c.memoized_props.as_ref()),
            None => new_text.clone(),
        };
        self.host.commit_text_update(&instance, &old_text, &new_text)
    }

    /// Subscribe the boundary to the wakeables it is waiting on.
    fn attach_retry_listeners(&mut self, boundary: FiberId) {
        let retries = std::mem::take(&mut self.node_mut(boundary).retries);
        for wakeable in retries {
            let id = wakeable.id();
            if !self.retry_listeners.insert((boundary, id)) {
                continue;
            }
            let channel = Rc::downgrade(&self.channel);
            wakeable.subscribe(Box::new(move || {
                if let Some(channel) = channel.upgrade() {
                    channel.push(Message::Retry {
                        boundary,
                        wakeable: id,
                    });
                }
            }));
        }
    }

    /// Hide or reveal the top-level host nodes of an offscreen subtree.
    fn toggle_host_children(&mut self, fiber: FiberId, hidden: bool) {
        for child in self.children(fiber) {
            let tag = self.node(child).tag;
            let result = match tag {
                WorkTag::HostComponent => match self.instances.get(child).cloned() {
                    Some(instance) if hidden => self.host.hide_instance(&instance),
                    Some(instance) => {
                        let props = self.node(child).memoized_props.clone().unwrap_or_default();
                        self.host.unhide_instance(&instance, &props)
                    }
                    None => Ok(()),
                },
                WorkTag::HostText => match self.instances.get(child).cloned() {
                    Some(instance) if hidden => self.host.hide_text_instance(&instance),
                    Some(instance) => {
                        let text = self
                            .node(child)
                            .memoized_props
                            .as_ref()
                            .and_then(Props::text_content)
                            .unwrap_or_default()
                            .to_string();
                        self.host.unhide_text_instance(&instance, &text)
                    }
                    None => Ok(()),
                },
                WorkTag::Offscreen if self.node(child).memoized_state.is_hidden() => Ok(()),
                _ => {
                    self.toggle_host_children(child, hidden);
                    Ok(())
                }
            };
            if let Err(err) = result {
                self.capture_commit_phase_error(child, err.into());
            }
        }
    }

    // ---- placement --------------------------------------------------------

    fn commit_placement(&mut self, fiber: FiberId) -> HostResult<()> {
        let parent_fiber = self.host_parent_fiber(fiber);
        let parent = self.host_parent(parent_fiber);
        if self.node(parent_fiber).flags.contains(Flags::CONTENT_RESET) {
            if let HostParent::Instance(instance) = &parent {
                self.host.reset_text_content(instance)?;
            }
            self.node_mut(parent_fiber).flags.remove(Flags::CONTENT_RESET);
        }
        let before = self.host_sibling(fiber);
        self.insert_or_append_placement_node(fiber, before.as_ref(), &parent)
    }

    fn is_host_parent(&self, fiber: FiberId) -> bool {
        matches!(self.node(fiber).tag, WorkTag::HostComponent | WorkTag::HostRoot)
    }

    fn host_parent_fiber(&self, fiber: FiberId) -> FiberId {
        let mut node = self.node(fiber).ret;
        while let Some(id) = node {
            if self.is_host_parent(id) {
                return id;
            }
            node = self.node(id).ret;
        }
        invariant_violation("placed fiber has no host parent")
    }

    fn host_parent(&self, parent_fiber: FiberId) -> HostParent<H> {
        let f = self.node(parent_fiber);
        match (f.tag, f.root) {
            (WorkTag::HostRoot, Some(root)) => {
                HostParent::Container(self.root_ref(root).container.clone())
            }
            (WorkTag::HostComponent, _) => match self.instances.get(parent_fiber) {
                Some(instance) => HostParent::Instance(instance.clone()),
                None => invariant_violation("host parent without an instance"),
            },
            _ => invariant_violation("invalid host parent"),
        }
    }

    /// The host node `fiber`'s nodes must be inserted before: the first
    /// host node after it in tree order that is not itself being placed.
    fn host_sibling(&mut self, fiber: FiberId) -> Option<H::Instance> {
        let mut node = fiber;
        'siblings: loop {
            while self.node(node).sibling.is_none() {
                match self.node(node).ret {
                    None => return None,
                    Some(parent) if self.is_host_parent(parent) => return None,
                    Some(parent) => node = parent,
                }
            }
            let ret = self.node(node).ret;
            let Some(sibling) = self.node(node).sibling else {
                return None;
            };
            self.node_mut(sibling).ret = ret;
            node = sibling;
            while !self.node(node).tag.is_host() {
                if self.node(node).flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                match self.node(node).child {
                    Some(child) => {
                        self.node_mut(child).ret = Some(node);
                        node = child;
                    }
                    None => continue 'siblings,
                }
            }
            if !self.node(node).flags.contains(Flags::PLACEMENT) {
                return self.instances.get(node).cloned();
            }
        }
    }

    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        before: Option<&H::Instance>,
        parent: &HostParent<H>,
    ) -> HostResult<()> {
        if self.node(fiber).tag.is_host() {
            let Some(instance) = self.instances.get(fiber).cloned() else {
                return Ok(());
            };
            return match (parent, before) {
                (HostParent::Instance(p), Some(b)) => self.host.insert_before(p, &instance, b),
                (HostParent::Instance(p), None) => self.host.append_child(p, &instance),
                (HostParent::Container(c), Some(b)) => {
                    self.host.insert_in_container_before(c, &instance, b)
                }
                (HostParent::Container(c), None) => {
                    self.host.append_child_to_container(c, &instance)
                }
            };
        }
        for child in self.children(fiber) {
            self.insert_or_append_placement_node(child, before, parent)?;
        }
        Ok(())
    }

    // ---- deletion ---------------------------------------------------------

    fn commit_deletion(&mut self, parent: FiberId, deleted: FiberId) {
        if !self.fibers.contains_key(deleted) {
            return;
        }
        let host_parent = if self.is_host_parent(parent) {
            parent
        } else {
            self.host_parent_fiber(parent)
        };
        let host_parent = self.host_parent(host_parent);
        self.commit_deletion_effects(Some(&host_parent), deleted);

        let alternate = self.node(deleted).alternate;
        self.node_mut(deleted).ret = None;
        if let Some(alt) = alternate.and_then(|a| self.fibers.get_mut(a)) {
            alt.ret = None;
        }
    }

    /// Run unmount work for `fiber` and its subtree. Only the top-most host
    /// nodes are removed from `host_parent`.
    fn commit_deletion_effects(&mut self, host_parent: Option<&HostParent<H>>, fiber: FiberId) {
        match self.node(fiber).tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                if let Some(node_ref) = self.node(fiber).node_ref.clone() {
                    node_ref.detach();
                }
                for child in self.children(fiber) {
                    self.commit_deletion_effects(None, child);
                }
                let Some(parent) = host_parent else {
                    return;
                };
                let Some(instance) = self.instances.get(fiber).cloned() else {
                    return;
                };
                let removed = match parent {
                    HostParent::Instance(p) => self.host.remove_child(p, &instance),
                    HostParent::Container(c) => self.host.remove_child_from_container(c, &instance),
                };
                if let Err(err) = removed {
                    self.capture_commit_phase_error(fiber, err.into());
                }
            }
            WorkTag::Component => {
                self.unmount_effects(fiber, EffectKind::Snapshot, false);
                self.unmount_effects(fiber, EffectKind::Layout, false);
                for child in self.children(fiber) {
                    self.commit_deletion_effects(host_parent, child);
                }
            }
            _ => {
                for child in self.children(fiber) {
                    self.commit_deletion_effects(host_parent, child);
                }
            }
        }
    }

    // ---- layout -----------------------------------------------------------

    fn commit_layout_effects(&mut self, fiber: FiberId) {
        if self.node(fiber).subtree_flags.intersects(Flags::LAYOUT_MASK) {
            for child in self.children(fiber) {
                self.commit_layout_effects(child);
            }
        }
        let flags = self.node(fiber).flags;
        match self.node(fiber).tag {
            WorkTag::Component => {
                if flags.contains(Flags::UPDATE) {
                    self.mount_effects(fiber, EffectKind::Layout);
                }
                if flags.contains(Flags::CALLBACK) {
                    self.run_update_callbacks(fiber);
                }
            }
            WorkTag::HostRoot => {
                if flags.contains(Flags::CALLBACK) {
                    self.run_update_callbacks(fiber);
                }
            }
            WorkTag::HostComponent => {
                if flags.contains(Flags::REF) {
                    let node_ref = self.node(fiber).node_ref.clone();
                    if let (Some(node_ref), Some(instance)) = (node_ref, self.instances.get(fiber)) {
                        node_ref.attach(Rc::new(instance.clone()));
                    }
                }
            }
            _ => {}
        }
    }

    fn run_update_callbacks(&mut self, fiber: FiberId) {
        let callbacks = self
            .node_mut(fiber)
            .update_queue
            .as_mut()
            .map(|q| q.take_callbacks())
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    // ---- effects ----------------------------------------------------------

    /// Run the create functions of `kind` effects whose deps changed.
    fn mount_effects(&mut self, fiber: FiberId, kind: EffectKind) {
        let Some(effects) = self.node(fiber).effects.clone() else {
            return;
        };
        for record in effects.iter().filter(|r| r.kind == kind && r.has_effect) {
            let Some(create) = record.take_create() else {
                continue;
            };
            match create() {
                Ok(cleanup) => record.inst.set_destroy(cleanup),
                Err(err) => self.capture_commit_phase_error(fiber, err),
            }
        }
    }

    /// Run the cleanups of `kind` effects; with `only_changed`, only of the
    /// ones about to re-run.
    fn unmount_effects(&mut self, fiber: FiberId, kind: EffectKind, only_changed: bool) {
        let Some(effects) = self.fibers.get(fiber).and_then(|f| f.effects.clone()) else {
            return;
        };
        for record in effects
            .iter()
            .filter(|r| r.kind == kind && (r.has_effect || !only_changed))
        {
            if let Some(destroy) = record.inst.take_destroy() {
                destroy();
            }
        }
    }

    /// Turn an error raised during commit into a synchronous capture update
    /// on the nearest boundary above `source`.
    fn capture_commit_phase_error(&mut self, source: FiberId, error: RenderError) {
        let captured = CapturedError::new(error, component_stack(self, source));
        warn!(error = %captured.error, "error during commit");
        let now = self.now();
        let mut node = self.fibers.get(source).and_then(|f| f.ret);
        while let Some(id) = node {
            let Some(f) = self.fibers.get(id) else {
                break;
            };
            let update = match &f.element_type {
                ElementType::Root => Some(self.root_error_update(captured.clone(), Lanes::SYNC)),
                ElementType::Component(ty) if ty.get().is_error_boundary() => Some(
                    self.boundary_error_update(Rc::clone(ty.get()), captured.clone(), Lanes::SYNC),
                ),
                _ => None,
            };
            if let Some(update) = update {
                self.schedule_capture(id, update, now);
                return;
            }
            node = f.ret;
        }
        warn!("commit error had no boundary to report to");
    }

    fn schedule_capture(&mut self, fiber: FiberId, update: Update, now: f64) {
        let lane = update.lane;
        if let Some(root) = self.enqueue_update(fiber, update) {
            self.root_mut(root).lanes.mark_updated(lane, now);
            self.ensure_root_is_scheduled(root, now);
        }
    }

    // ---- passive effects --------------------------------------------------

    /// Run pending passive effects now. Returns whether there were any.
    pub fn flush_passive_effects(&mut self) -> ReconcileResult<bool> {
        let Some(root) = self.root_with_pending_passive_effects.take() else {
            return Ok(false);
        };
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            invariant_violation("passive effects flushed while already working");
        }
        let lanes = std::mem::take(&mut self.pending_passive_effects_lanes);
        if let Some(task) = self.passive_task.take() {
            self.scheduler.cancel_callback(task);
        }

        let priority = EventPriority::Default.lower(EventPriority::from_lanes(lanes));
        let previous_priority = self.channel.set_update_priority(Some(priority));
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::COMMIT;
        {
            let _span = debug_span!("passive_effects", lanes = lanes.label()).entered();
            if let Some(current) = self.roots.get(root).map(|r| r.current) {
                self.commit_passive_unmount_effects(current);
                self.commit_passive_mount_effects(current);
                self.reset_committed_flags(current);
            }
        }
        self.execution_context = previous_context;
        self.channel.set_update_priority(previous_priority);

        self.process_inbox()?;
        self.flush_sync_callbacks()?;
        Ok(true)
    }

    /// Parents before children; deleted subtrees first.
    fn commit_passive_unmount_effects(&mut self, fiber: FiberId) {
        let (flags, subtree_flags) = {
            let f = self.node(fiber);
            (f.flags, f.subtree_flags)
        };
        if flags.contains(Flags::CHILD_DELETION) {
            let deletions = std::mem::take(&mut self.node_mut(fiber).deletions);
            for deleted in deletions {
                self.commit_passive_unmount_deleted(deleted);
            }
        }
        if self.node(fiber).tag == WorkTag::Component && flags.contains(Flags::PASSIVE) {
            self.unmount_effects(fiber, EffectKind::Passive, true);
        }
        if subtree_flags.intersects(Flags::PASSIVE_MASK) {
            for child in self.children(fiber) {
                self.commit_passive_unmount_effects(child);
            }
        }
    }

    /// Run every passive cleanup in a deleted subtree, then free its fibers.
    fn commit_passive_unmount_deleted(&mut self, deleted: FiberId) {
        let mut stack = vec![deleted];
        let mut visited = Vec::new();
        while let Some(id) = stack.pop() {
            let Some(f) = self.fibers.get(id) else {
                continue;
            };
            let is_component = f.tag == WorkTag::Component;
            let children = self.children(id);
            if is_component {
                self.unmount_effects(id, EffectKind::Passive, false);
            }
            stack.extend(children.into_iter().rev());
            visited.push(id);
        }
        for id in visited {
            let alternate = self.fibers.get(id).and_then(|f| f.alternate);
            self.release_fiber(id);
            if let Some(alt) = alternate {
                self.release_fiber(alt);
            }
        }
    }

    /// Children before parents.
    fn commit_passive_mount_effects(&mut self, fiber: FiberId) {
        if self.node(fiber).subtree_flags.contains(Flags::PASSIVE) {
            for child in self.children(fiber) {
                self.commit_passive_mount_effects(child);
            }
        }
        let f = self.node(fiber);
        if f.tag == WorkTag::Component && f.flags.contains(Flags::PASSIVE) {
            self.mount_effects(fiber, EffectKind::Passive);
        }
    }

    /// Clear the effect flags of a tree whose commit has fully run, so the
    /// committed tree owes nothing.
    fn reset_committed_flags(&mut self, fiber: FiberId) {
        if !self.node(fiber).subtree_flags.is_empty() {
            for child in self.children(fiber) {
                self.reset_committed_flags(child);
            }
        }
        let f = self.node_mut(fiber);
        f.flags = Flags::empty();
        f.subtree_flags = Flags::empty();
    }

    /// Child list of `fiber`, in order.
    pub(crate) fn children(&self, fiber: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut child = self.fibers.get(fiber).and_then(|f| f.child);
        while let Some(id) = child {
            out.push(id);
            child = self.fibers.get(id).and_then(|f| f.sibling);
        }
        out
    }
}
