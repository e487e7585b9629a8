#![forbid(unsafe_code)]

//! An in-memory host tree.
//!
//! [`MemoryHost`] implements [`HostConfig`] over a flat node arena and
//! records every call it receives as a [`HostOp`]. Tests assert on the
//! serialized tree, on the operation log, or on both.
//!
//! Host nodes keep their scalar attributes as strings. A node with a
//! `text` attribute manages its own text content, so the reconciler does
//! not build children for it.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use fibre_reconciler::{HostConfig, HostError, HostResult, Props};
use tracing::trace;

/// Attribute a host node renders as its own text content.
pub const TEXT_ATTR: &str = "text";

const CONTAINER_KIND: &str = "#container";
const TEXT_KIND: &str = "#text";

/// Handle to a node in a [`MemoryHost`]. Instances and containers share
/// one id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attribute changes computed by `prepare_update`: `None` removes.
pub type AttrDiff = Vec<(String, Option<String>)>;

/// One call the reconciler made on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Create { node: NodeId, kind: String },
    CreateText { node: NodeId, text: String },
    /// Render-phase append into a node that is not attached yet.
    AppendInitial { parent: NodeId, child: NodeId },
    Append { parent: NodeId, child: NodeId },
    InsertBefore {
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    },
    Remove { parent: NodeId, child: NodeId },
    Update { node: NodeId, changes: AttrDiff },
    UpdateText { node: NodeId, text: String },
    ResetText { node: NodeId },
    Hide { node: NodeId },
    Unhide { node: NodeId },
    ClearContainer { container: NodeId },
    Detach { node: NodeId },
}

impl HostOp {
    /// True for operations that change what is attached or visible.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            HostOp::Create { .. }
                | HostOp::CreateText { .. }
                | HostOp::AppendInitial { .. }
                | HostOp::Detach { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: String,
    attrs: BTreeMap<String, String>,
    /// Content of a text node.
    text: Option<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    hidden: bool,
    detached: bool,
}

impl Node {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            attrs: BTreeMap::new(),
            text: None,
            children: Vec::new(),
            parent: None,
            hidden: false,
            detached: false,
        }
    }
}

/// Scalar attributes of `props`, as strings.
fn scalar_attrs(props: &Props) -> BTreeMap<String, String> {
    props
        .attrs()
        .filter_map(|(name, value)| value.as_text().map(|text| (name.to_string(), text)))
        .collect()
}

/// Host tree kept in memory, with an operation log.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: Vec<Node>,
    ops: Vec<HostOp>,
    fail_next: Option<&'static str>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh container to mount a root into.
    pub fn create_container(&mut self) -> NodeId {
        self.alloc(Node::new(CONTAINER_KIND))
    }

    /// Make the next call to `operation` (a [`HostConfig`] method name, for
    /// example `"append_child"`) fail.
    pub fn fail_next(&mut self, operation: &'static str) {
        self.fail_next = Some(operation);
    }

    /// Every operation recorded so far, oldest first.
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Recorded operations that changed the attached tree.
    pub fn mutations(&self) -> Vec<HostOp> {
        self.ops.iter().filter(|op| op.is_mutation()).cloned().collect()
    }

    /// Drain the operation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of nodes ever created, containers included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.index()).map(|n| n.kind.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(id.index())
            .and_then(|n| n.attrs.get(name))
            .map(String::as_str)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| n.hidden)
    }

    /// True once the reconciler released the fiber owning this node.
    pub fn is_detached(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| n.detached)
    }

    /// Markup for everything under `container`, hidden nodes included and
    /// marked with a `hidden` attribute.
    pub fn serialize(&self, container: NodeId) -> String {
        self.serialize_children(container, true)
    }

    /// Markup for what a user would see under `container`.
    pub fn serialize_visible(&self, container: NodeId) -> String {
        self.serialize_children(container, false)
    }

    fn serialize_children(&self, parent: NodeId, include_hidden: bool) -> String {
        let mut out = String::new();
        for &child in self.children(parent) {
            self.write_node(&mut out, child, include_hidden);
        }
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId, include_hidden: bool) {
        let Some(node) = self.nodes.get(id.index()) else {
            return;
        };
        if node.hidden && !include_hidden {
            return;
        }
        if node.kind == TEXT_KIND {
            let text = node.text.as_deref().unwrap_or_default();
            if node.hidden {
                let _ = write!(out, "[hidden:{text}]");
            } else {
                out.push_str(text);
            }
            return;
        }
        let _ = write!(out, "<{}", node.kind);
        for (name, value) in node.attrs.iter().filter(|(name, _)| name.as_str() != TEXT_ATTR) {
            let _ = write!(out, " {name}=\"{value}\"");
        }
        if node.hidden {
            out.push_str(" hidden");
        }
        let content = node.attrs.get(TEXT_ATTR);
        if content.is_none() && node.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(content) = content {
            out.push_str(content);
        }
        for &child in &node.children {
            self.write_node(out, child, include_hidden);
        }
        let _ = write!(out, "</{}>", node.kind);
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn check(&mut self, operation: &'static str) -> HostResult<()> {
        if self.fail_next == Some(operation) {
            self.fail_next = None;
            return Err(HostError::new(operation, "injected failure"));
        }
        Ok(())
    }

    fn node_mut(&mut self, operation: &'static str, id: NodeId) -> HostResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| HostError::new(operation, format!("unknown node {id}")))
    }

    fn detach_from_parent(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent.index()) {
            p.children.retain(|&c| c != child);
        }
        if let Some(c) = self.nodes.get_mut(child.index()) {
            c.parent = None;
        }
    }

    fn append(&mut self, operation: &'static str, parent: NodeId, child: NodeId) -> HostResult<()> {
        self.check(operation)?;
        self.node_mut(operation, child)?;
        self.detach_from_parent(child);
        self.node_mut(operation, parent)?.children.push(child);
        self.node_mut(operation, child)?.parent = Some(parent);
        Ok(())
    }

    fn insert(
        &mut self,
        operation: &'static str,
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    ) -> HostResult<()> {
        self.check(operation)?;
        self.node_mut(operation, child)?;
        self.detach_from_parent(child);
        let p = self.node_mut(operation, parent)?;
        let Some(at) = p.children.iter().position(|&c| c == before) else {
            return Err(HostError::new(
                operation,
                format!("{before} is not a child of {parent}"),
            ));
        };
        p.children.insert(at, child);
        self.node_mut(operation, child)?.parent = Some(parent);
        Ok(())
    }

    fn remove(&mut self, operation: &'static str, parent: NodeId, child: NodeId) -> HostResult<()> {
        self.check(operation)?;
        let p = self.node_mut(operation, parent)?;
        let Some(at) = p.children.iter().position(|&c| c == child) else {
            return Err(HostError::new(
                operation,
                format!("{child} is not a child of {parent}"),
            ));
        };
        p.children.remove(at);
        self.node_mut(operation, child)?.parent = None;
        Ok(())
    }

    fn set_hidden(&mut self, operation: &'static str, id: NodeId, hidden: bool) -> HostResult<()> {
        self.check(operation)?;
        self.node_mut(operation, id)?.hidden = hidden;
        self.ops.push(if hidden {
            HostOp::Hide { node: id }
        } else {
            HostOp::Unhide { node: id }
        });
        Ok(())
    }
}

impl HostConfig for MemoryHost {
    type Instance = NodeId;
    type Container = NodeId;
    type UpdatePayload = AttrDiff;

    fn create_instance(&mut self, kind: &str, props: &Props) -> HostResult<NodeId> {
        self.check("create_instance")?;
        let mut node = Node::new(kind);
        node.attrs = scalar_attrs(props);
        let id = self.alloc(node);
        trace!(node = %id, kind, "create");
        self.ops.push(HostOp::Create {
            node: id,
            kind: kind.to_string(),
        });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> HostResult<NodeId> {
        self.check("create_text_instance")?;
        let mut node = Node::new(TEXT_KIND);
        node.text = Some(text.to_string());
        let id = self.alloc(node);
        self.ops.push(HostOp::CreateText {
            node: id,
            text: text.to_string(),
        });
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: &NodeId) -> HostResult<()> {
        self.append("append_initial_child", *parent, *child)?;
        self.ops.push(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn prepare_update(
        &self,
        _instance: &NodeId,
        _kind: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<AttrDiff> {
        let old = scalar_attrs(old_props);
        let new = scalar_attrs(new_props);
        let mut diff: AttrDiff = new
            .iter()
            .filter(|(name, value)| old.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), Some(value.clone())))
            .collect();
        diff.extend(
            old.keys()
                .filter(|name| !new.contains_key(*name))
                .map(|name| (name.clone(), None)),
        );
        diff.sort();
        (!diff.is_empty()).then_some(diff)
    }

    fn should_set_text_content(&self, _kind: &str, props: &Props) -> bool {
        props.get(TEXT_ATTR).is_some()
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> HostResult<()> {
        self.append("append_child", *parent, *child)?;
        self.ops.push(HostOp::Append {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn append_child_to_container(&mut self, container: &NodeId, child: &NodeId) -> HostResult<()> {
        self.append("append_child_to_container", *container, *child)?;
        self.ops.push(HostOp::Append {
            parent: *container,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, before: &NodeId) -> HostResult<()> {
        self.insert("insert_before", *parent, *child, *before)?;
        self.ops.push(HostOp::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn insert_in_container_before(
        &mut self,
        container: &NodeId,
        child: &NodeId,
        before: &NodeId,
    ) -> HostResult<()> {
        self.insert("insert_in_container_before", *container, *child, *before)?;
        self.ops.push(HostOp::InsertBefore {
            parent: *container,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: &NodeId, child: &NodeId) -> HostResult<()> {
        self.remove("remove_child", *parent, *child)?;
        self.ops.push(HostOp::Remove {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn remove_child_from_container(&mut self, container: &NodeId, child: &NodeId) -> HostResult<()> {
        self.remove("remove_child_from_container", *container, *child)?;
        self.ops.push(HostOp::Remove {
            parent: *container,
            child: *child,
        });
        Ok(())
    }

    fn commit_update(
        &mut self,
        instance: &NodeId,
        payload: AttrDiff,
        _kind: &str,
        _old_props: &Props,
        _new_props: &Props,
    ) -> HostResult<()> {
        self.check("commit_update")?;
        let node = self.node_mut("commit_update", *instance)?;
        for (name, value) in &payload {
            match value {
                Some(value) => {
                    node.attrs.insert(name.clone(), value.clone());
                }
                None => {
                    node.attrs.remove(name);
                }
            }
        }
        self.ops.push(HostOp::Update {
            node: *instance,
            changes: payload,
        });
        Ok(())
    }

    fn commit_text_update(&mut self, instance: &NodeId, _old_text: &str, new_text: &str) -> HostResult<()> {
        self.check("commit_text_update")?;
        self.node_mut("commit_text_update", *instance)?.text = Some(new_text.to_string());
        self.ops.push(HostOp::UpdateText {
            node: *instance,
            text: new_text.to_string(),
        });
        Ok(())
    }

    fn reset_text_content(&mut self, instance: &NodeId) -> HostResult<()> {
        self.check("reset_text_content")?;
        self.node_mut("reset_text_content", *instance)?
            .attrs
            .remove(TEXT_ATTR);
        self.ops.push(HostOp::ResetText { node: *instance });
        Ok(())
    }

    fn hide_instance(&mut self, instance: &NodeId) -> HostResult<()> {
        self.set_hidden("hide_instance", *instance, true)
    }

    fn unhide_instance(&mut self, instance: &NodeId, _props: &Props) -> HostResult<()> {
        self.set_hidden("unhide_instance", *instance, false)
    }

    fn clear_container(&mut self, container: &NodeId) -> HostResult<()> {
        self.check("clear_container")?;
        let children = std::mem::take(&mut self.node_mut("clear_container", *container)?.children);
        for child in children {
            if let Some(node) = self.nodes.get_mut(child.index()) {
                node.parent = None;
            }
        }
        self.ops.push(HostOp::ClearContainer {
            container: *container,
        });
        Ok(())
    }

    fn detach_deleted_instance(&mut self, instance: &NodeId) {
        // Both fiber generations share the node; report it once.
        if let Some(node) = self.nodes.get_mut(instance.index()) {
            if !node.detached {
                node.detached = true;
                self.ops.push(HostOp::Detach { node: *instance });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibre_reconciler::{Element, host};

    fn props(element: Element) -> Props {
        match element {
            Element::Node(node) => node.props().clone(),
            other => panic!("expected a node, got {other:?}"),
        }
    }

    #[test]
    fn builds_and_serializes_a_tree() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let div = h
            .create_instance("div", &props(host("div").attr("id", "a").build()))
            .unwrap();
        let text = h.create_text_instance("hi").unwrap();
        h.append_initial_child(&div, &text).unwrap();
        h.append_child_to_container(&root, &div).unwrap();
        assert_eq!(h.serialize(root), "<div id=\"a\">hi</div>");
        assert_eq!(h.parent(div), Some(root));
        assert_eq!(
            h.mutations(),
            vec![HostOp::Append {
                parent: root,
                child: div
            }]
        );
    }

    #[test]
    fn insert_before_moves_an_attached_child() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let empty = Props::empty();
        let a = h.create_instance("a", &empty).unwrap();
        let b = h.create_instance("b", &empty).unwrap();
        h.append_child_to_container(&root, &a).unwrap();
        h.append_child_to_container(&root, &b).unwrap();
        h.insert_in_container_before(&root, &b, &a).unwrap();
        assert_eq!(h.children(root), &[b, a]);
        assert_eq!(h.serialize(root), "<b/><a/>");
    }

    #[test]
    fn removing_a_stranger_is_an_error() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let a = h.create_instance("a", &Props::empty()).unwrap();
        let err = h.remove_child_from_container(&root, &a).unwrap_err();
        assert!(err.to_string().contains("remove_child_from_container"));
    }

    #[test]
    fn prepare_update_diffs_scalar_attrs() {
        let h = MemoryHost::new();
        let old = props(host("div").attr("a", 1).attr("b", "x").build());
        let same = props(host("div").attr("a", 1).attr("b", "x").build());
        let new = props(host("div").attr("a", 2).attr("c", true).build());
        let node = NodeId(0);
        assert_eq!(h.prepare_update(&node, "div", &old, &same), None);
        assert_eq!(
            h.prepare_update(&node, "div", &old, &new),
            Some(vec![
                ("a".to_string(), Some("2".to_string())),
                ("b".to_string(), None),
                ("c".to_string(), Some("true".to_string())),
            ])
        );
    }

    #[test]
    fn hidden_nodes_only_show_in_full_serialization() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let a = h.create_instance("a", &Props::empty()).unwrap();
        let t = h.create_text_instance("t").unwrap();
        h.append_child_to_container(&root, &a).unwrap();
        h.append_child_to_container(&root, &t).unwrap();
        h.hide_instance(&a).unwrap();
        h.hide_text_instance(&t).unwrap();
        assert_eq!(h.serialize(root), "<a hidden/>[hidden:t]");
        assert_eq!(h.serialize_visible(root), "");
        h.unhide_instance(&a, &Props::empty()).unwrap();
        assert_eq!(h.serialize_visible(root), "<a/>");
    }

    #[test]
    fn text_attr_is_rendered_as_content() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let p = props(host("p").attr(TEXT_ATTR, "hello").build());
        assert!(h.should_set_text_content("p", &p));
        let node = h.create_instance("p", &p).unwrap();
        h.append_child_to_container(&root, &node).unwrap();
        assert_eq!(h.serialize(root), "<p>hello</p>");
        h.reset_text_content(&node).unwrap();
        assert_eq!(h.serialize(root), "<p/>");
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let a = h.create_instance("a", &Props::empty()).unwrap();
        h.fail_next("append_child_to_container");
        assert!(h.append_child_to_container(&root, &a).is_err());
        assert!(h.append_child_to_container(&root, &a).is_ok());
        assert!(h.ops().iter().all(|op| !matches!(op, HostOp::Remove { .. })));
    }

    #[test]
    fn detach_is_reported_once() {
        let mut h = MemoryHost::new();
        let a = h.create_instance("a", &Props::empty()).unwrap();
        h.detach_deleted_instance(&a);
        h.detach_deleted_instance(&a);
        assert!(h.is_detached(a));
        let detaches = h
            .ops()
            .iter()
            .filter(|op| matches!(op, HostOp::Detach { .. }))
            .count();
        assert_eq!(detaches, 1);
    }

    #[test]
    fn clear_container_drops_children() {
        let mut h = MemoryHost::new();
        let root = h.create_container();
        let a = h.create_instance("a", &Props::empty()).unwrap();
        h.append_child_to_container(&root, &a).unwrap();
        h.clear_container(&root).unwrap();
        assert!(h.children(root).is_empty());
        assert_eq!(h.parent(a), None);
        assert_eq!(h.kind(root), Some(CONTAINER_KIND));
    }
}
