//! Child descriptions consumed by the reconciler.
//!
//! A render pass produces a [`VNode`] describing the next children of a
//! fiber. Descriptions are cheap, immutable, and disposable; the reconciler
//! matches them against the existing fiber chain and throws them away.
//! Payloads (`props`, handlers, container handles) cross the reconciler as
//! opaque [`Rc`]s; identity is the only equality it ever needs.

pub(crate) use crate::coroutine::{Coroutine, YieldNode};
use crate::fiber::FiberId;
use crate::refs::CallbackRef;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Opaque component props. The reconciler stores these on fibers verbatim;
/// only the component layer ever looks inside.
pub type Props = Rc<dyn Any>;

/// The type of an element description.
///
/// Host types are tag names and compare by value. Component types are opaque
/// handles and compare by identity, so two renders of the same component
/// share a type while distinct components never collide.
#[derive(Clone)]
pub enum ElementType {
    /// A host-level element, named by tag.
    Host(Arc<str>),
    /// A user component, identified by handle.
    Component(Rc<dyn Any>),
}

impl ElementType {
    /// A host element type with the given tag name.
    pub fn host(tag: impl Into<Arc<str>>) -> Self {
        ElementType::Host(tag.into())
    }

    /// A component element type identified by the given handle.
    pub fn component(handle: Rc<dyn Any>) -> Self {
        ElementType::Component(handle)
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Component(a), ElementType::Component(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Host(tag) => f.debug_tuple("Host").field(tag).finish(),
            ElementType::Component(_) => f.write_str("Component(..)"),
        }
    }
}

/// A ref as it appears on an element description: either already callable,
/// or a string naming a slot in the owner instance's `refs` table. The
/// reconciler coerces the string form into a callable before storing it on
/// the fiber.
#[derive(Clone)]
pub enum RefValue {
    /// A callable ref, stored on the fiber as-is.
    Callback(CallbackRef),
    /// A string ref, resolved against the element's owner.
    Named(Arc<str>),
}

/// An element description: the input half of a [`FiberKind::HostComponent`]
/// or [`FiberKind::ClassComponent`] fiber.
///
/// [`FiberKind::HostComponent`]: crate::FiberKind::HostComponent
/// [`FiberKind::ClassComponent`]: crate::FiberKind::ClassComponent
#[derive(Clone)]
pub struct Element {
    /// Host tag or component identity; the reuse predicate for elements.
    pub element_type: ElementType,
    /// Optional identity among siblings. `None` matches positionally.
    pub key: Option<Arc<str>>,
    /// Next props to apply.
    pub props: Props,
    /// Optional ref to the element's host output or instance.
    pub ref_value: Option<RefValue>,
    /// The fiber whose render produced this element. String refs resolve
    /// against this fiber's public instance.
    pub owner: Option<FiberId>,
}

impl Element {
    /// Creates an unkeyed element description.
    pub fn new(element_type: ElementType, props: Props) -> Self {
        Element {
            element_type,
            key: None,
            props,
            ref_value: None,
            owner: None,
        }
    }

    /// Sets the sibling identity key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches a ref.
    pub fn with_ref(mut self, ref_value: RefValue) -> Self {
        self.ref_value = Some(ref_value);
        self
    }

    /// Declares the owner fiber whose render produced this element.
    pub fn with_owner(mut self, owner: FiberId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("element_type", &self.element_type)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A portal description: children rendered into a host container outside the
/// parent's subtree. `container_info` and `implementation` are opaque host
/// handles compared by identity for reuse.
#[derive(Clone)]
pub struct Portal {
    /// Optional identity among siblings.
    pub key: Option<Arc<str>>,
    /// Opaque handle to the target host container.
    pub container_info: Rc<dyn Any>,
    /// Opaque handle to the host renderer implementation.
    pub implementation: Rc<dyn Any>,
    /// The children to render inside the container.
    pub children: ChildSeq,
}

impl Portal {
    /// Creates an unkeyed portal description.
    pub fn new(
        container_info: Rc<dyn Any>,
        implementation: Rc<dyn Any>,
        children: ChildSeq,
    ) -> Self {
        Portal {
            key: None,
            container_info,
            implementation,
            children,
        }
    }

    /// Sets the sibling identity key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal").field("key", &self.key).finish_non_exhaustive()
    }
}

/// The iterator produced by a [`LazySeq`].
pub type ChildIter = Box<dyn Iterator<Item = VNode>>;

/// A lazy child sequence: an iterator factory.
///
/// The factory is asked for a fresh iterator at the start of each pass over
/// the sequence; returning `None` is the "declared iterable produced no
/// iterator" condition and aborts reconciliation. In development builds the
/// duplicate-key scan consumes one extra pass, so one-shot factories cannot
/// be validated there.
#[derive(Clone)]
pub struct LazySeq(Rc<dyn Fn() -> Option<ChildIter>>);

impl LazySeq {
    /// Wraps an iterator factory.
    pub fn new(factory: impl Fn() -> Option<ChildIter> + 'static) -> Self {
        LazySeq(Rc::new(factory))
    }

    /// A factory that replays the given children on every pass.
    pub fn of(children: Vec<VNode>) -> Self {
        LazySeq::new(move || {
            Some(Box::new(children.clone().into_iter()) as ChildIter)
        })
    }

    /// A one-shot factory: the first request yields the children, every
    /// later request yields no iterator.
    pub fn once(children: Vec<VNode>) -> Self {
        let remaining = RefCell::new(Some(children));
        LazySeq::new(move || {
            let children = remaining.borrow_mut().take()?;
            Some(Box::new(children.into_iter()) as ChildIter)
        })
    }

    /// Requests a fresh iterator, or `None` if the factory cannot produce
    /// one.
    pub fn iterator(&self) -> Option<ChildIter> {
        (self.0)()
    }
}

impl fmt::Debug for LazySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazySeq(..)")
    }
}

/// A sequence of children: either random-access or lazy.
///
/// At the top level of a reconciliation both forms describe the parent's
/// child *set*; nested inside another sequence they describe a single
/// fragment child.
#[derive(Clone, Debug)]
pub enum ChildSeq {
    /// An indexed sequence, scanned with cheap lookahead.
    Indexed(Rc<[VNode]>),
    /// A lazy sequence, scanned strictly forward.
    Lazy(LazySeq),
}

/// A child description: the closed set of values a render can produce for
/// one child slot.
#[derive(Clone)]
pub enum VNode {
    /// Nothing to render. Null-like and unrecognized inputs collapse here
    /// and reconcile to an empty slot.
    Empty,
    /// Text content. Text has no key and matches positionally.
    Text(Arc<str>),
    /// A host or component element.
    Element(Element),
    /// A coroutine control-flow node.
    Coroutine(Coroutine),
    /// A yield inside a coroutine.
    Yield(YieldNode),
    /// Children rendered into another host container.
    Portal(Portal),
    /// A sequence of further children.
    Fragment(ChildSeq),
}

impl VNode {
    /// Text content from anything string-like.
    pub fn text(content: impl Into<Arc<str>>) -> Self {
        VNode::Text(content.into())
    }

    /// An indexed fragment of the given children.
    pub fn fragment(children: Vec<VNode>) -> Self {
        VNode::Fragment(ChildSeq::Indexed(children.into()))
    }

    /// A lazy fragment driven by the given sequence.
    pub fn lazy(sequence: LazySeq) -> Self {
        VNode::Fragment(ChildSeq::Lazy(sequence))
    }

    /// The sibling identity key, if this kind of child carries one.
    pub fn key(&self) -> Option<&Arc<str>> {
        match self {
            VNode::Element(element) => element.key.as_ref(),
            VNode::Coroutine(coroutine) => coroutine.key.as_ref(),
            VNode::Yield(yield_node) => yield_node.key.as_ref(),
            VNode::Portal(portal) => portal.key.as_ref(),
            VNode::Empty | VNode::Text(_) | VNode::Fragment(_) => None,
        }
    }
}

impl From<&str> for VNode {
    fn from(content: &str) -> Self {
        VNode::text(content)
    }
}

impl From<String> for VNode {
    fn from(content: String) -> Self {
        VNode::text(content)
    }
}

impl From<i64> for VNode {
    fn from(value: i64) -> Self {
        VNode::text(value.to_string())
    }
}

impl From<f64> for VNode {
    fn from(value: f64) -> Self {
        VNode::text(value.to_string())
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNode::Empty => f.write_str("Empty"),
            VNode::Text(content) => f.debug_tuple("Text").field(content).finish(),
            VNode::Element(element) => element.fmt(f),
            VNode::Coroutine(coroutine) => {
                f.debug_struct("Coroutine").field("key", &coroutine.key).finish_non_exhaustive()
            }
            VNode::Yield(yield_node) => {
                f.debug_struct("Yield").field("key", &yield_node.key).finish_non_exhaustive()
            }
            VNode::Portal(portal) => portal.fmt(f),
            VNode::Fragment(seq) => f.debug_tuple("Fragment").field(seq).finish(),
        }
    }
}
