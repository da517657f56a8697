//! Fiber nodes and the arena that owns them.
//!
//! A [`Fiber`] is one position in the UI tree. Fibers persist across frames
//! and are double-buffered: the committed tree and the work-in-progress tree
//! pair up node-for-node through the `alternate` link. All edges between
//! fibers (`parent`, `sibling`, `child`, `alternate`, and the deletion
//! chain) are [`FiberId`] handles into a [`FiberArena`], never owned
//! pointers, which keeps the cyclic structure safe and makes dropping a
//! subtree a matter of removing slots.

use crate::coroutine::{CoroutineHandler, ReifiedYield, create_reified_yield};
use crate::refs::{CallbackRef, HostHandle};
use crate::vnode::{ChildSeq, Coroutine, Element, ElementType, Portal, Props, YieldNode};
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;
use std::sync::Arc;

new_key_type! {
    /// Handle to a fiber stored in a [`FiberArena`].
    pub struct FiberId;
}

bitflags! {
    /// Host-level work the committer must perform for a fiber.
    ///
    /// Empty means no effect. Stored as a bitfield; commit phases further
    /// down the pipeline add their own bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectTags: u8 {
        /// Attach or move this fiber's host output.
        const PLACEMENT = 1 << 0;
        /// Remove this fiber's host output.
        const DELETION = 1 << 1;
    }
}

/// Opaque scheduling priority. The reconciler copies priorities verbatim
/// onto the fibers it produces and never interprets them; ordering is owned
/// by the scheduler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Priority(pub u32);

impl Priority {
    /// The priority of a fiber with no scheduled work.
    pub const NO_WORK: Priority = Priority(0);
}

/// What a fiber represents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FiberKind {
    /// A user component backed by a class instance.
    ClassComponent,
    /// A host-level element, e.g. a view or a DOM node.
    HostComponent,
    /// A run of host text.
    HostText,
    /// Children rendered into another host container.
    HostPortal,
    /// A coroutine control-flow node.
    CoroutineComponent,
    /// A yield inside a coroutine.
    YieldComponent,
    /// A keyless grouping of children.
    Fragment,
}

/// Kind-specific type descriptor of a fiber.
#[derive(Clone, Default)]
pub enum TypeDesc {
    /// Text, portal, and fragment fibers carry no type.
    #[default]
    None,
    /// Element fibers: the host tag or component identity.
    Element(ElementType),
    /// Coroutine fibers: the handler.
    Handler(CoroutineHandler),
    /// Yield fibers: the reified yield.
    Reified(ReifiedYield),
}

impl TypeDesc {
    /// The element type, for element fibers.
    pub fn as_element(&self) -> Option<&ElementType> {
        match self {
            TypeDesc::Element(element_type) => Some(element_type),
            _ => None,
        }
    }

    /// The reified yield, for yield fibers.
    pub fn as_reified(&self) -> Option<&ReifiedYield> {
        match self {
            TypeDesc::Reified(reified) => Some(reified),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::None => f.write_str("None"),
            TypeDesc::Element(element_type) => f.debug_tuple("Element").field(element_type).finish(),
            TypeDesc::Handler(_) => f.write_str("Handler(..)"),
            TypeDesc::Reified(_) => f.write_str("Reified(..)"),
        }
    }
}

/// The class instance backing a [`FiberKind::ClassComponent`] fiber.
///
/// Instances publish the `refs` table that string refs resolve against. The
/// table is interior-mutable because ref callables are invoked by the
/// committer long after reconciliation returned.
#[derive(Default)]
pub struct ClassInstance {
    refs: RefCell<FxHashMap<Arc<str>, HostHandle>>,
}

impl ClassInstance {
    /// Creates an instance with an empty `refs` table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle stored under `name`, if any.
    pub fn ref_named(&self, name: &str) -> Option<HostHandle> {
        self.refs.borrow().get(name).cloned()
    }

    /// Stores `value` under `name`.
    pub fn set_ref(&self, name: Arc<str>, value: HostHandle) {
        self.refs.borrow_mut().insert(name, value);
    }

    /// Removes the entry under `name`.
    pub fn clear_ref(&self, name: &str) {
        self.refs.borrow_mut().remove(name);
    }
}

/// Host state captured by a portal fiber, the identity its reuse predicate
/// compares against.
#[derive(Clone)]
pub struct PortalState {
    /// Opaque handle to the target host container.
    pub container_info: Rc<dyn Any>,
    /// Opaque handle to the host renderer implementation.
    pub implementation: Rc<dyn Any>,
}

impl PortalState {
    /// Whether this state targets the same container through the same
    /// implementation as `portal`.
    pub fn matches(&self, portal: &Portal) -> bool {
        Rc::ptr_eq(&self.container_info, &portal.container_info)
            && Rc::ptr_eq(&self.implementation, &portal.implementation)
    }
}

/// Kind-specific backing handle of a fiber.
#[derive(Clone, Default)]
pub enum StateNode {
    /// No backing state.
    #[default]
    None,
    /// Class component instance.
    Class(Rc<ClassInstance>),
    /// Portal host state.
    Portal(PortalState),
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateNode::None => f.write_str("None"),
            StateNode::Class(_) => f.write_str("Class(..)"),
            StateNode::Portal(_) => f.write_str("Portal(..)"),
        }
    }
}

/// The next input a fiber should apply, shaped by its kind.
#[derive(Clone, Default)]
pub enum PendingProps {
    /// No pending input.
    #[default]
    None,
    /// Text fibers: the content.
    Text(Arc<str>),
    /// Element and yield fibers: the opaque payload.
    Props(Props),
    /// Coroutine fibers: the whole description.
    Coroutine(Coroutine),
    /// Fragment and portal fibers: the child sequence.
    Children(ChildSeq),
}

impl PendingProps {
    /// The pending text content, for text fibers.
    pub fn as_text(&self) -> Option<&Arc<str>> {
        match self {
            PendingProps::Text(content) => Some(content),
            _ => None,
        }
    }

    /// The pending opaque payload, for element and yield fibers.
    pub fn as_props(&self) -> Option<&Props> {
        match self {
            PendingProps::Props(props) => Some(props),
            _ => None,
        }
    }

    /// The pending child sequence, for fragment and portal fibers.
    pub fn as_children(&self) -> Option<&ChildSeq> {
        match self {
            PendingProps::Children(children) => Some(children),
            _ => None,
        }
    }
}

impl fmt::Debug for PendingProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingProps::None => f.write_str("None"),
            PendingProps::Text(content) => f.debug_tuple("Text").field(content).finish(),
            PendingProps::Props(_) => f.write_str("Props(..)"),
            PendingProps::Coroutine(_) => f.write_str("Coroutine(..)"),
            PendingProps::Children(_) => f.write_str("Children(..)"),
        }
    }
}

/// One position in the UI tree.
pub struct Fiber {
    /// What this fiber represents.
    pub kind: FiberKind,
    /// Optional identity among siblings. `None` matches positionally.
    pub key: Option<Arc<str>>,
    /// Position among siblings, assigned during reconciliation.
    pub index: usize,
    /// Kind-specific type descriptor.
    pub type_desc: TypeDesc,
    /// Next input to apply.
    pub pending_props: PendingProps,
    /// Kind-specific backing handle.
    pub state_node: StateNode,
    /// Callable ref attached to this fiber's host output.
    pub ref_handle: Option<CallbackRef>,
    /// The parent fiber.
    pub parent: Option<FiberId>,
    /// The next sibling.
    pub sibling: Option<FiberId>,
    /// The first child.
    pub child: Option<FiberId>,
    /// This fiber's counterpart in the other tree.
    pub alternate: Option<FiberId>,
    /// Host work the committer must perform for this fiber.
    pub effect_tag: EffectTags,
    /// The next fiber in the chain this fiber was queued on.
    pub next_effect: Option<FiberId>,
    /// Scheduling priority of the pending work.
    pub pending_work_priority: Priority,
    /// Head of the deletions queued on this fiber while reconciling its
    /// children.
    pub first_deletion: Option<FiberId>,
    /// Tail of the queued deletions.
    pub last_deletion: Option<FiberId>,
}

impl Fiber {
    fn new(kind: FiberKind, key: Option<Arc<str>>) -> Self {
        Fiber {
            kind,
            key,
            index: 0,
            type_desc: TypeDesc::None,
            pending_props: PendingProps::None,
            state_node: StateNode::None,
            ref_handle: None,
            parent: None,
            sibling: None,
            child: None,
            alternate: None,
            effect_tag: EffectTags::empty(),
            next_effect: None,
            pending_work_priority: Priority::NO_WORK,
            first_deletion: None,
            last_deletion: None,
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("index", &self.index)
            .field("effect_tag", &self.effect_tag)
            .field("pending_work_priority", &self.pending_work_priority)
            .finish_non_exhaustive()
    }
}

/// Storage for all fibers of one tree pair.
///
/// Both the current and the work-in-progress tree live in the same arena;
/// they are distinguished only by which roots the caller holds.
#[derive(Default)]
pub struct FiberArena {
    fibers: SlotMap<FiberId, Fiber>,
}

impl FiberArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bare fiber of the given kind and key.
    pub fn create_fiber(&mut self, kind: FiberKind, key: Option<Arc<str>>) -> FiberId {
        self.fibers.insert(Fiber::new(kind, key))
    }

    /// The fiber behind `id`, if it is still live.
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    /// Mutable access to the fiber behind `id`, if it is still live.
    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    /// Whether `id` refers to a live fiber.
    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    /// Number of live fibers.
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    /// Whether the arena holds no fibers.
    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Removes a fiber from the arena, returning it. Links held by other
    /// fibers are not repaired; this is for committer-side cleanup after a
    /// deletion effect has been applied.
    pub fn remove(&mut self, id: FiberId) -> Option<Fiber> {
        self.fibers.remove(id)
    }

    /// Creates a fiber from an element description. Host-typed elements
    /// become host component fibers; component-typed elements become class
    /// component fibers backed by a fresh instance.
    pub fn create_from_element(&mut self, element: &Element, priority: Priority) -> FiberId {
        let kind = match element.element_type {
            ElementType::Host(_) => FiberKind::HostComponent,
            ElementType::Component(_) => FiberKind::ClassComponent,
        };
        let id = self.create_fiber(kind, element.key.clone());
        let fiber = &mut self[id];
        fiber.type_desc = TypeDesc::Element(element.element_type.clone());
        fiber.pending_props = PendingProps::Props(element.props.clone());
        if kind == FiberKind::ClassComponent {
            fiber.state_node = StateNode::Class(Rc::new(ClassInstance::new()));
        }
        fiber.pending_work_priority = priority;
        id
    }

    /// Creates a text fiber.
    pub fn create_from_text(&mut self, content: Arc<str>, priority: Priority) -> FiberId {
        let id = self.create_fiber(FiberKind::HostText, None);
        let fiber = &mut self[id];
        fiber.pending_props = PendingProps::Text(content);
        fiber.pending_work_priority = priority;
        id
    }

    /// Creates a fragment fiber holding the given child sequence.
    pub fn create_from_fragment(&mut self, children: ChildSeq, priority: Priority) -> FiberId {
        let id = self.create_fiber(FiberKind::Fragment, None);
        let fiber = &mut self[id];
        fiber.pending_props = PendingProps::Children(children);
        fiber.pending_work_priority = priority;
        id
    }

    /// Creates a coroutine fiber.
    pub fn create_from_coroutine(&mut self, coroutine: &Coroutine, priority: Priority) -> FiberId {
        let id = self.create_fiber(FiberKind::CoroutineComponent, coroutine.key.clone());
        let fiber = &mut self[id];
        fiber.type_desc = TypeDesc::Handler(coroutine.handler.clone());
        fiber.pending_props = PendingProps::Coroutine(coroutine.clone());
        fiber.pending_work_priority = priority;
        id
    }

    /// Creates a yield fiber, reifying the yield into its type descriptor.
    pub fn create_from_yield(&mut self, yield_node: &YieldNode, priority: Priority) -> FiberId {
        let id = self.create_fiber(FiberKind::YieldComponent, yield_node.key.clone());
        let fiber = &mut self[id];
        fiber.type_desc = TypeDesc::Reified(create_reified_yield(yield_node));
        fiber.pending_props = PendingProps::Props(yield_node.value.clone());
        fiber.pending_work_priority = priority;
        id
    }

    /// Creates a portal fiber, capturing the container and implementation
    /// handles into its state node.
    pub fn create_from_portal(&mut self, portal: &Portal, priority: Priority) -> FiberId {
        let id = self.create_fiber(FiberKind::HostPortal, portal.key.clone());
        let fiber = &mut self[id];
        fiber.state_node = StateNode::Portal(PortalState {
            container_info: portal.container_info.clone(),
            implementation: portal.implementation.clone(),
        });
        fiber.pending_props = PendingProps::Children(portal.children.clone());
        fiber.pending_work_priority = priority;
        id
    }

    /// Produces the work-in-progress counterpart of `fiber`.
    ///
    /// At most two versions of a tree are ever needed, so the counterpart is
    /// pooled through the `alternate` link: an existing alternate is reset
    /// and reused, otherwise a blank fiber of the same kind and key is
    /// created and cross-linked. Shared fields are copied from the source;
    /// `sibling` and `index` are copied for symmetry but callers always
    /// overwrite them.
    pub fn clone_fiber(&mut self, fiber: FiberId, priority: Priority) -> FiberId {
        let alternate = match self[fiber].alternate {
            Some(alternate) => {
                let reused = &mut self[alternate];
                reused.effect_tag = EffectTags::empty();
                reused.next_effect = None;
                reused.first_deletion = None;
                reused.last_deletion = None;
                alternate
            }
            None => {
                let (kind, key) = {
                    let source = &self[fiber];
                    (source.kind, source.key.clone())
                };
                let alternate = self.create_fiber(kind, key);
                self[alternate].alternate = Some(fiber);
                self[fiber].alternate = Some(alternate);
                alternate
            }
        };

        let (type_desc, pending_props, state_node, ref_handle, child, sibling, index) = {
            let source = &self[fiber];
            (
                source.type_desc.clone(),
                source.pending_props.clone(),
                source.state_node.clone(),
                source.ref_handle.clone(),
                source.child,
                source.sibling,
                source.index,
            )
        };
        let target = &mut self[alternate];
        target.type_desc = type_desc;
        target.pending_props = pending_props;
        target.state_node = state_node;
        target.ref_handle = ref_handle;
        target.child = child;
        target.sibling = sibling;
        target.index = index;
        target.pending_work_priority = priority;
        alternate
    }

    /// Iterates a sibling chain starting from `first`.
    pub fn siblings(&self, first: Option<FiberId>) -> Siblings<'_> {
        Siblings {
            arena: self,
            next: first,
        }
    }

    /// Iterates the deletions queued on `parent`, in the order they were
    /// queued.
    pub fn deletions(&self, parent: FiberId) -> Deletions<'_> {
        Deletions {
            arena: self,
            next: self[parent].first_deletion,
        }
    }

    /// Checks the structural invariants of `parent`'s child chain: parent
    /// back-links, monotonically increasing indices, and alternate
    /// symmetry. Indices are contiguous from zero unless the input sequence
    /// had empty slots.
    #[cfg(debug_assertions)]
    pub fn debug_validate_children(&self, parent: FiberId) {
        let mut next_index = 0usize;
        for child in self.siblings(self[parent].child) {
            let fiber = &self[child];
            debug_assert_eq!(
                fiber.parent,
                Some(parent),
                "child {child:?} does not point back at {parent:?}"
            );
            debug_assert!(
                fiber.index >= next_index,
                "child {child:?} index {} regressed below {next_index}",
                fiber.index
            );
            next_index = fiber.index + 1;
            if let Some(alternate) = fiber.alternate {
                debug_assert_eq!(
                    self[alternate].alternate,
                    Some(child),
                    "alternate link of {child:?} is not symmetric"
                );
            }
        }
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        &self.fibers[id]
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id]
    }
}

/// Iterator over a sibling chain.
pub struct Siblings<'a> {
    arena: &'a FiberArena,
    next: Option<FiberId>,
}

impl Iterator for Siblings<'_> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.next?;
        self.next = self.arena[id].sibling;
        Some(id)
    }
}

/// Iterator over a parent's queued deletions.
pub struct Deletions<'a> {
    arena: &'a FiberArena,
    next: Option<FiberId>,
}

impl Iterator for Deletions<'_> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.next?;
        self.next = self.arena[id].next_effect;
        Some(id)
    }
}
