#![forbid(unsafe_code)]

//! Elements: the immutable description a render produces.
//!
//! An [`Element`] is cheap to clone (reference counted). Identity matters:
//! a fiber whose props are the *same* [`Props`] allocation as last time is
//! a bailout candidate, so reusing an element (or its props) is how callers
//! say "nothing changed here".

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::component::ComponentType;
use crate::context::ContextId;

/// Reconciliation key among siblings.
pub type Key = Rc<str>;

/// What kind of node an element (or fiber) describes.
#[derive(Clone)]
pub enum ElementType {
    /// The root of a tree (fibers only).
    Root,
    /// A text leaf (fibers only; elements use [`Element::Text`]).
    Text,
    /// A host node such as `"div"`.
    Host(Rc<str>),
    /// A user component.
    Component(ComponentType),
    /// Transparent grouping.
    Fragment,
    /// A boundary that shows `fallback` while its children suspend.
    Suspense,
    /// A subtree that can be hidden without being unmounted (fibers only).
    Offscreen,
    /// Provides a context value to its subtree.
    Provider(ContextId),
}

impl ElementType {
    /// Short name used in logs and component stacks.
    pub fn name(&self) -> String {
        match self {
            ElementType::Root => "Root".into(),
            ElementType::Text => "#text".into(),
            ElementType::Host(kind) => kind.to_string(),
            ElementType::Component(c) => c.name().to_string(),
            ElementType::Fragment => "Fragment".into(),
            ElementType::Suspense => "Suspense".into(),
            ElementType::Offscreen => "Offscreen".into(),
            ElementType::Provider(id) => format!("Provider({})", id.get()),
        }
    }

    /// Host kind, when this is a host node.
    pub fn host_kind(&self) -> Option<&str> {
        match self {
            ElementType::Host(kind) => Some(kind),
            _ => None,
        }
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ElementType::Root, ElementType::Root)
            | (ElementType::Text, ElementType::Text)
            | (ElementType::Fragment, ElementType::Fragment)
            | (ElementType::Suspense, ElementType::Suspense)
            | (ElementType::Offscreen, ElementType::Offscreen) => true,
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Component(a), ElementType::Component(b)) => a == b,
            (ElementType::Provider(a), ElementType::Provider(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// One prop value.
#[derive(Clone)]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A nested element (for example a suspense fallback).
    Element(Element),
    /// Arbitrary shared data, compared by identity.
    Data(Rc<dyn Any>),
}

impl PropValue {
    /// Identity-aware equality: data and elements compare by pointer.
    pub fn same(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Element(a), PropValue::Element(b)) => a.same(b),
            (PropValue::Data(a), PropValue::Data(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Render scalar values as text; nested elements and data have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            PropValue::Str(s) => Some(s.to_string()),
            PropValue::Int(i) => Some(i.to_string()),
            PropValue::Float(x) => Some(x.to_string()),
            PropValue::Bool(b) => Some(b.to_string()),
            PropValue::Element(_) | PropValue::Data(_) => None,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(s) => write!(f, "{s:?}"),
            PropValue::Int(i) => write!(f, "{i}"),
            PropValue::Float(x) => write!(f, "{x}"),
            PropValue::Bool(b) => write!(f, "{b}"),
            PropValue::Element(e) => write!(f, "{e:?}"),
            PropValue::Data(_) => f.write_str("<data>"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(i64::from(value))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<Element> for PropValue {
    fn from(value: Element) -> Self {
        PropValue::Element(value)
    }
}

#[derive(Default)]
struct PropsData {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Vec<Element>,
    text: Option<Rc<str>>,
}

/// Immutable, shared props.
///
/// Clones share the allocation; [`Props::same`] tests that identity.
#[derive(Clone)]
pub struct Props(Rc<PropsData>);

impl Props {
    /// Props with nothing in them.
    pub fn empty() -> Self {
        Props(Rc::new(PropsData::default()))
    }

    /// Props carrying only text (text fibers).
    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Props(Rc::new(PropsData {
            text: Some(text.into()),
            ..PropsData::default()
        }))
    }

    /// Props carrying only children.
    pub fn with_children(children: Vec<Element>) -> Self {
        Props(Rc::new(PropsData {
            children,
            ..PropsData::default()
        }))
    }

    pub(crate) fn from_parts(attrs: BTreeMap<Rc<str>, PropValue>, children: Vec<Element>) -> Self {
        Props(Rc::new(PropsData {
            attrs,
            children,
            text: None,
        }))
    }

    /// Same allocation?
    pub fn same(a: &Props, b: &Props) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.attrs.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        match self.get(name)? {
            PropValue::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Typed shared data stored under `name`.
    pub fn data<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        match self.get(name)? {
            PropValue::Data(d) => Rc::clone(d).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// All attributes, sorted by name.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.attrs.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn children(&self) -> &[Element] {
        &self.0.children
    }

    /// Text content of a text fiber.
    pub fn text_content(&self) -> Option<&str> {
        self.0.text.as_deref()
    }
}

impl Default for Props {
    fn default() -> Self {
        Props::empty()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.attrs() {
            map.entry(&k, v);
        }
        if let Some(text) = self.text_content() {
            map.entry(&"#text", &text);
        }
        map.finish()
    }
}

/// Handle filled in with the host instance of the element it is attached to.
///
/// Set during the layout pass, cleared when the node is removed or the ref
/// moves elsewhere.
#[derive(Clone, Default)]
pub struct NodeRef(Rc<RefCell<Option<Rc<dyn Any>>>>);

impl NodeRef {
    pub fn new() -> Self {
        NodeRef::default()
    }

    /// The attached instance, if it is of type `T`.
    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.0.borrow().clone()?.downcast::<T>().ok()
    }

    pub fn is_attached(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub(crate) fn attach(&self, instance: Rc<dyn Any>) {
        *self.0.borrow_mut() = Some(instance);
    }

    pub(crate) fn detach(&self) {
        *self.0.borrow_mut() = None;
    }

    pub fn same(a: &NodeRef, b: &NodeRef) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.is_attached()).finish()
    }
}

/// A described node.
pub struct ElementNode {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) node_ref: Option<NodeRef>,
}

impl ElementNode {
    pub fn ty(&self) -> &ElementType {
        &self.ty
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }
}

/// Output of a render.
#[derive(Clone, Default)]
pub enum Element {
    /// Renders nothing.
    #[default]
    Empty,
    /// A text leaf.
    Text(Rc<str>),
    /// A host node, component, fragment, boundary or provider.
    Node(Rc<ElementNode>),
}

impl Element {
    /// Same allocation (or both empty, or equal text)?
    pub fn same(&self, other: &Element) -> bool {
        match (self, other) {
            (Element::Empty, Element::Empty) => true,
            (Element::Text(a), Element::Text(b)) => a == b,
            (Element::Node(a), Element::Node(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Element::Node(node) => node.key(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Element::Empty)
    }

    /// Children to reconcile for this element when it is the whole output
    /// of a render: an unkeyed fragment is unwrapped, empty means none.
    pub(crate) fn into_children(self) -> Vec<Element> {
        match self {
            Element::Empty => Vec::new(),
            Element::Node(node) if node.ty == ElementType::Fragment && node.key.is_none() => {
                node.props.children().to_vec()
            }
            other => vec![other],
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Empty => f.write_str("Empty"),
            Element::Text(t) => write!(f, "{t:?}"),
            Element::Node(node) => {
                let mut s = f.debug_struct(&node.ty.name());
                if let Some(key) = &node.key {
                    s.field("key", key);
                }
                s.field("props", &node.props);
                if !node.props.children().is_empty() {
                    s.field("children", &node.props.children());
                }
                s.finish()
            }
        }
    }
}

impl From<&str> for Element {
    fn from(text: &str) -> Self {
        Element::Text(Rc::from(text))
    }
}

impl From<String> for Element {
    fn from(text: String) -> Self {
        Element::Text(Rc::from(text))
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(value: Option<T>) -> Self {
        value.map_or(Element::Empty, Into::into)
    }
}

/// Builder for [`Element::Node`].
#[must_use]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Vec<Element>,
    node_ref: Option<NodeRef>,
}

impl ElementBuilder {
    pub fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
            node_ref: None,
        }
    }

    pub fn key(mut self, key: impl Into<Rc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(Rc::from(name), value.into());
        self
    }

    /// Attach arbitrary shared data, compared by identity.
    pub fn data<T: 'static>(mut self, name: &str, value: Rc<T>) -> Self {
        self.attrs.insert(Rc::from(name), PropValue::Data(value));
        self
    }

    pub fn child(mut self, child: impl Into<Element>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Element>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn node_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    pub fn build(self) -> Element {
        Element::Node(Rc::new(ElementNode {
            ty: self.ty,
            key: self.key,
            props: Props::from_parts(self.attrs, self.children),
            node_ref: self.node_ref,
        }))
    }
}

impl From<ElementBuilder> for Element {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

/// Start a host node of `kind`.
pub fn host(kind: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(Rc::from(kind)))
}

/// A text leaf.
pub fn text(content: impl Into<Rc<str>>) -> Element {
    Element::Text(content.into())
}

/// Group children without a host node.
pub fn fragment<I>(children: I) -> Element
where
    I: IntoIterator,
    I::Item: Into<Element>,
{
    ElementBuilder::new(ElementType::Fragment)
        .children(children)
        .build()
}

/// Suspense boundary: shows `fallback` while `children` are suspended.
pub fn suspense<I>(fallback: impl Into<Element>, children: I) -> ElementBuilder
where
    I: IntoIterator,
    I::Item: Into<Element>,
{
    ElementBuilder::new(ElementType::Suspense)
        .attr(FALLBACK_PROP, PropValue::Element(fallback.into()))
        .children(children)
}

pub(crate) const FALLBACK_PROP: &str = "fallback";
pub(crate) const VALUE_PROP: &str = "value";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_attrs_and_children() {
        let el = host("div")
            .key("a")
            .attr("id", "main")
            .attr("count", 3)
            .child("hello")
            .child(host("span"))
            .build();
        let Element::Node(node) = &el else {
            panic!("expected node");
        };
        assert_eq!(node.key(), Some("a"));
        assert_eq!(node.props().str("id"), Some("main"));
        assert_eq!(node.props().int("count"), Some(3));
        assert_eq!(node.props().children().len(), 2);
        assert_eq!(node.ty().host_kind(), Some("div"));
    }

    #[test]
    fn identity_is_by_allocation() {
        let a = host("div").build();
        let b = host("div").build();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(text("x").same(&text("x")));
        assert!(Element::Empty.same(&Element::Empty));
    }

    #[test]
    fn unkeyed_fragment_is_unwrapped() {
        let children = fragment(["a", "b"]).into_children();
        assert_eq!(children.len(), 2);
        let keyed = ElementBuilder::new(ElementType::Fragment)
            .key("k")
            .child("a")
            .build();
        assert_eq!(keyed.into_children().len(), 1);
        assert!(Element::Empty.into_children().is_empty());
    }

    #[test]
    fn data_props_downcast() {
        let el = host("div").data("payload", Rc::new(42u32)).build();
        let Element::Node(node) = &el else {
            panic!("expected node");
        };
        assert_eq!(node.props().data::<u32>("payload").as_deref(), Some(&42));
        assert!(node.props().data::<String>("payload").is_none());
    }

    #[test]
    fn node_ref_attach_and_detach() {
        let node_ref = NodeRef::new();
        assert!(!node_ref.is_attached());
        node_ref.attach(Rc::new(7u64));
        assert_eq!(node_ref.get::<u64>().as_deref(), Some(&7));
        node_ref.detach();
        assert!(node_ref.get::<u64>().is_none());
    }

    #[test]
    fn prop_value_same_uses_identity_for_data() {
        let shared: Rc<dyn Any> = Rc::new(1u8);
        assert!(PropValue::Data(Rc::clone(&shared)).same(&PropValue::Data(shared)));
        assert!(!PropValue::Data(Rc::new(1u8)).same(&PropValue::Data(Rc::new(1u8))));
        assert!(PropValue::from("a").same(&PropValue::from("a")));
    }
}
