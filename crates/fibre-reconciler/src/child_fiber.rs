#![forbid(unsafe_code)]

//! Child reconciliation: diff a parent's current children against new
//! elements, reusing fibers by key and type.
//!
//! Lists go through two passes. The first walks old and new in lockstep
//! while keys line up. Whatever is left of the old list goes into a map by
//! key (or index, for unkeyed children) and the rest of the new list is
//! matched against it. A reused fiber keeps its host node; it is flagged
//! for placement only if it now sits before a fiber that did not move.

use std::collections::HashMap;
use std::rc::Rc;

use crate::element::{Element, ElementNode, ElementType, Key, Props};
use crate::fiber::{Fiber, FiberId, Flags, WorkTag};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Key(Key),
    Index(usize),
}

/// Old children by key, in sibling order.
struct ExistingChildren {
    map: HashMap<ChildKey, FiberId>,
    order: Vec<ChildKey>,
}

impl ExistingChildren {
    fn get(&self, key: &ChildKey) -> Option<FiberId> {
        self.map.get(key).copied()
    }

    fn remove(&mut self, key: &ChildKey) {
        self.map.remove(key);
    }

    fn remaining(self) -> impl Iterator<Item = FiberId> {
        let ExistingChildren { mut map, order } = self;
        order.into_iter().filter_map(move |k| map.remove(&k))
    }
}

/// New children linked as they are produced.
#[derive(Default)]
struct NewChildren {
    first: Option<FiberId>,
    last: Option<FiberId>,
}

impl NewChildren {
    fn push<H: HostConfig>(&mut self, reconciler: &mut Reconciler<H>, fiber: FiberId) {
        match self.last {
            None => self.first = Some(fiber),
            Some(prev) => reconciler.node_mut(prev).sibling = Some(fiber),
        }
        self.last = Some(fiber);
    }
}

impl<H: HostConfig> Reconciler<H> {
    /// Reconcile `children` under `wip`, diffing against `current`'s
    /// children when there is a current.
    pub(crate) fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: Vec<Element>,
        lanes: Lanes,
    ) {
        let current_first = current.and_then(|c| self.node(c).child);
        let track = current.is_some();
        let first = self.reconcile_child_fibers(wip, current_first, children, lanes, track);
        self.node_mut(wip).child = first;
    }

    /// Returns the new first child. With `track` off (mount), nothing is
    /// flagged: the whole subtree is inserted by its placed ancestor.
    pub(crate) fn reconcile_child_fibers(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        children: Vec<Element>,
        lanes: Lanes,
        track: bool,
    ) -> Option<FiberId> {
        let mut children = children;
        if children.len() == 1 {
            if let Some(only) = children.pop() {
                children = only.into_children();
            }
        }
        match children.len() {
            0 => {
                self.delete_remaining_children(parent, current_first, track);
                None
            }
            1 => {
                let only = children.pop()?;
                let child = match only {
                    Element::Empty => {
                        self.delete_remaining_children(parent, current_first, track);
                        return None;
                    }
                    Element::Text(text) => {
                        self.reconcile_single_text(parent, current_first, text, lanes, track)
                    }
                    Element::Node(node) => {
                        self.reconcile_single_element(parent, current_first, &node, lanes, track)
                    }
                };
                if track && self.node(child).alternate.is_none() {
                    self.node_mut(child).flags |= Flags::PLACEMENT;
                }
                Some(child)
            }
            _ => self.reconcile_children_array(parent, current_first, &children, lanes, track),
        }
    }

    pub(crate) fn delete_child(&mut self, parent: FiberId, child: FiberId, track: bool) {
        if !track {
            return;
        }
        let p = self.node_mut(parent);
        p.deletions.push(child);
        p.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, parent: FiberId, first: Option<FiberId>, track: bool) {
        if !track {
            return;
        }
        let mut child = first;
        while let Some(c) = child {
            self.delete_child(parent, c, track);
            child = self.node(c).sibling;
        }
    }

    /// Reuse `fiber` with new props as an only child.
    fn use_fiber(&mut self, fiber: FiberId, props: Props) -> FiberId {
        let wip = self.create_work_in_progress(fiber, props);
        let f = self.node_mut(wip);
        f.index = 0;
        f.sibling = None;
        wip
    }

    fn create_fiber_from_element(&mut self, parent: FiberId, node: &ElementNode, lanes: Lanes) -> FiberId {
        let mode = self.node(parent).mode;
        let mut fiber = Fiber::new(node.ty.clone(), node.props.clone(), node.key.clone(), mode);
        fiber.lanes = lanes;
        fiber.node_ref = node.node_ref.clone();
        fiber.ret = Some(parent);
        self.alloc_fiber(fiber)
    }

    fn create_fiber_from_text(&mut self, parent: FiberId, text: Rc<str>, lanes: Lanes) -> FiberId {
        let mode = self.node(parent).mode;
        let mut fiber = Fiber::new(ElementType::Text, Props::text(text), None, mode);
        fiber.lanes = lanes;
        fiber.ret = Some(parent);
        self.alloc_fiber(fiber)
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        text: Rc<str>,
        lanes: Lanes,
        track: bool,
    ) -> FiberId {
        if let Some(first) = current_first {
            if self.node(first).tag == WorkTag::HostText {
                let rest = self.node(first).sibling;
                self.delete_remaining_children(parent, rest, track);
                let existing = self.use_fiber(first, Props::text(text));
                self.node_mut(existing).ret = Some(parent);
                return existing;
            }
        }
        self.delete_remaining_children(parent, current_first, track);
        self.create_fiber_from_text(parent, text, lanes)
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        node: &ElementNode,
        lanes: Lanes,
        track: bool,
    ) -> FiberId {
        let mut child = current_first;
        while let Some(c) = child {
            let next = self.node(c).sibling;
            if self.node(c).key == node.key {
                if self.node(c).element_type == node.ty {
                    self.delete_remaining_children(parent, next, track);
                    let existing = self.use_fiber(c, node.props.clone());
                    let f = self.node_mut(existing);
                    f.node_ref = node.node_ref.clone();
                    f.ret = Some(parent);
                    return existing;
                }
                // Same key, different type: nothing after it can match.
                self.delete_remaining_children(parent, Some(c), track);
                break;
            }
            self.delete_child(parent, c, track);
            child = next;
        }
        self.create_fiber_from_element(parent, node, lanes)
    }

    /// Fiber for `element` at slot `old`, or `None` when the keys differ
    /// (or the slot is a hole).
    fn update_slot(
        &mut self,
        parent: FiberId,
        old: Option<FiberId>,
        element: &Element,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let old_key = old.and_then(|o| self.node(o).key.clone());
        match element {
            Element::Empty => None,
            Element::Text(text) => {
                if old_key.is_some() {
                    return None;
                }
                Some(self.update_text_node(parent, old, Rc::clone(text), lanes))
            }
            Element::Node(node) => {
                if node.key != old_key {
                    return None;
                }
                Some(self.update_element(parent, old, node, lanes))
            }
        }
    }

    fn update_text_node(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        text: Rc<str>,
        lanes: Lanes,
    ) -> FiberId {
        match current {
            Some(c) if self.node(c).tag == WorkTag::HostText => {
                let existing = self.use_fiber(c, Props::text(text));
                self.node_mut(existing).ret = Some(parent);
                existing
            }
            _ => self.create_fiber_from_text(parent, text, lanes),
        }
    }

    fn update_element(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        node: &ElementNode,
        lanes: Lanes,
    ) -> FiberId {
        match current {
            Some(c) if self.node(c).element_type == node.ty => {
                let existing = self.use_fiber(c, node.props.clone());
                let f = self.node_mut(existing);
                f.node_ref = node.node_ref.clone();
                f.ret = Some(parent);
                existing
            }
            _ => self.create_fiber_from_element(parent, node, lanes),
        }
    }

    fn create_child(&mut self, parent: FiberId, element: &Element, lanes: Lanes) -> Option<FiberId> {
        match element {
            Element::Empty => None,
            Element::Text(text) => Some(self.create_fiber_from_text(parent, Rc::clone(text), lanes)),
            Element::Node(node) => Some(self.create_fiber_from_element(parent, node, lanes)),
        }
    }

    fn update_from_map(
        &mut self,
        existing: &mut ExistingChildren,
        parent: FiberId,
        index: usize,
        element: &Element,
        lanes: Lanes,
    ) -> Option<FiberId> {
        match element {
            Element::Empty => None,
            Element::Text(text) => {
                let matched = existing.get(&ChildKey::Index(index));
                Some(self.update_text_node(parent, matched, Rc::clone(text), lanes))
            }
            Element::Node(node) => {
                let key = match &node.key {
                    Some(k) => ChildKey::Key(Rc::clone(k)),
                    None => ChildKey::Index(index),
                };
                let matched = existing.get(&key);
                Some(self.update_element(parent, matched, node, lanes))
            }
        }
    }

    /// Record the new index and decide whether the fiber moves. Returns the
    /// new last placed index.
    fn place_child(&mut self, child: FiberId, last_placed_index: usize, new_index: usize, track: bool) -> usize {
        self.node_mut(child).index = new_index;
        if !track {
            return last_placed_index;
        }
        match self.node(child).alternate {
            Some(current) => {
                let old_index = self.node(current).index;
                if old_index < last_placed_index {
                    self.node_mut(child).flags |= Flags::PLACEMENT;
                    last_placed_index
                } else {
                    old_index
                }
            }
            None => {
                self.node_mut(child).flags |= Flags::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn map_remaining_children(&self, first: FiberId) -> ExistingChildren {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        let mut child = Some(first);
        while let Some(c) = child {
            let f = self.node(c);
            let key = match &f.key {
                Some(k) => ChildKey::Key(Rc::clone(k)),
                None => ChildKey::Index(f.index),
            };
            map.insert(key.clone(), c);
            order.push(key);
            child = f.sibling;
        }
        ExistingChildren { map, order }
    }

    fn reconcile_children_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        children: &[Element],
        lanes: Lanes,
        track: bool,
    ) -> Option<FiberId> {
        let mut list = NewChildren::default();

        let mut old_fiber = current_first;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        while new_index < children.len() {
            let Some(old) = old_fiber else {
                break;
            };
            let (slot, next_old) = if self.node(old).index > new_index {
                (None, Some(old))
            } else {
                (Some(old), self.node(old).sibling)
            };
            let Some(new_fiber) = self.update_slot(parent, slot, &children[new_index], lanes) else {
                if slot.is_none() {
                    old_fiber = next_old;
                }
                break;
            };
            if track {
                if let Some(slot) = slot {
                    if self.node(new_fiber).alternate.is_none() {
                        self.delete_child(parent, slot, track);
                    }
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_index, track);
            list.push(self, new_fiber);
            old_fiber = next_old;
            new_index += 1;
        }

        if new_index == children.len() {
            self.delete_remaining_children(parent, old_fiber, track);
            return list.first;
        }

        let Some(old_start) = old_fiber else {
            for element in &children[new_index..] {
                if let Some(new_fiber) = self.create_child(parent, element, lanes) {
                    last_placed_index = self.place_child(new_fiber, last_placed_index, new_index, track);
                    list.push(self, new_fiber);
                }
                new_index += 1;
            }
            return list.first;
        };

        let mut existing = self.map_remaining_children(old_start);
        for (offset, element) in children[new_index..].iter().enumerate() {
            let index = new_index + offset;
            let Some(new_fiber) = self.update_from_map(&mut existing, parent, index, element, lanes) else {
                continue;
            };
            if track && self.node(new_fiber).alternate.is_some() {
                let key = match &self.node(new_fiber).key {
                    Some(k) => ChildKey::Key(Rc::clone(k)),
                    None => ChildKey::Index(index),
                };
                existing.remove(&key);
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, index, track);
            list.push(self, new_fiber);
        }
        if track {
            for leftover in existing.remaining() {
                self.delete_child(parent, leftover, track);
            }
        }
        list.first
    }
}
