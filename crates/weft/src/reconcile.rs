//! Child reconciliation.
//!
//! Given a parent fiber, the first child of its committed chain, and the
//! description of its next children, produce the work-in-progress sibling
//! chain, reusing committed fibers wherever key and shape allow.
//!
//! Multi-child inputs run a single forward scan that reuses fibers while
//! keys line up slot-for-slot, then falls back to a keyed map over the
//! remaining old children so reordered fibers are still found. Move
//! detection is the standard one-pass scheme: reused fibers whose old
//! indices form an increasing subsequence stay in place, everything else is
//! tagged [`EffectTags::PLACEMENT`]. The pass is O(n) and correct, but it
//! does not compute a minimal move set.
//!
//! Deleted children are not unlinked eagerly; they are queued on the parent
//! in scan order, tagged [`EffectTags::DELETION`], and left for the
//! committer.

use crate::coroutine::{Coroutine, YieldNode, create_reified_yield, create_updated_reified_yield};
use crate::fiber::{
    EffectTags, FiberArena, FiberId, FiberKind, PendingProps, Priority, StateNode, TypeDesc,
};
use crate::refs::coerce_ref;
use crate::vnode::{ChildSeq, Element, LazySeq, Portal, VNode};
use rustc_hash::FxHashMap;
#[cfg(debug_assertions)]
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;
use thiserror::Error;

/// Fatal conditions that abort a reconciliation. No partial chain is
/// returned; the arena may contain fibers created before the failure, which
/// the caller discards along with the work-in-progress tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A string ref was supplied on an element with no owner to bind it to.
    #[error("string ref {ref_name:?} has no owner instance to bind to")]
    MissingOwner {
        /// The string the ref was declared with.
        ref_name: Arc<str>,
    },
    /// A child declared as a lazy sequence produced no iterator.
    #[error("lazy child sequence produced no iterator")]
    NotIterable,
}

/// Reconciles `parent`'s children against `new_child`, cloning reused
/// fibers into the work-in-progress tree and recording placement and
/// deletion effects. Fibers reachable from the current tree are never
/// mutated.
///
/// Returns the first fiber of the new sibling chain; the caller links it
/// into `parent.child`.
pub fn reconcile_child_fibers(
    arena: &mut FiberArena,
    parent: FiberId,
    current_first_child: Option<FiberId>,
    new_child: &VNode,
    priority: Priority,
) -> Result<Option<FiberId>, ReconcileError> {
    Reconciler::<true, true> { arena }.reconcile(parent, current_first_child, new_child, priority)
}

/// Like [`reconcile_child_fibers`], but reuses the existing fibers by
/// mutating them directly. The caller guarantees the chain already belongs
/// to the work-in-progress tree.
pub fn reconcile_child_fibers_in_place(
    arena: &mut FiberArena,
    parent: FiberId,
    current_first_child: Option<FiberId>,
    new_child: &VNode,
    priority: Priority,
) -> Result<Option<FiberId>, ReconcileError> {
    Reconciler::<false, true> { arena }.reconcile(parent, current_first_child, new_child, priority)
}

/// Initial-mount reconciliation: no cloning and no effect tracking. Nothing
/// is queued for deletion and no placement tags are set; the committer
/// places the entire subtree unconditionally.
pub fn mount_child_fibers_in_place(
    arena: &mut FiberArena,
    parent: FiberId,
    current_first_child: Option<FiberId>,
    new_child: &VNode,
    priority: Priority,
) -> Result<Option<FiberId>, ReconcileError> {
    Reconciler::<false, false> { arena }.reconcile(parent, current_first_child, new_child, priority)
}

/// Gives `work_in_progress` its own child chain when its child pointer
/// still aliases `current`'s.
///
/// Each aliased child is shallow-cloned at its own pending priority and
/// relinked under `work_in_progress`. If the work-in-progress parent
/// already has its own chain, nothing is cloned. Either way every child's
/// parent pointer ends up at `work_in_progress`, so traversal can descend.
pub fn clone_child_fibers(
    arena: &mut FiberArena,
    current: Option<FiberId>,
    work_in_progress: FiberId,
) {
    let Some(first) = arena[work_in_progress].child else {
        return;
    };

    let aliased = current.is_some_and(|current| arena[current].child == Some(first));
    if aliased {
        let mut cloned_count = 1usize;
        let mut current_child = first;
        let priority = arena[current_child].pending_work_priority;
        let mut new_child = arena.clone_fiber(current_child, priority);
        arena[work_in_progress].child = Some(new_child);
        arena[new_child].parent = Some(work_in_progress);
        while let Some(next) = arena[current_child].sibling {
            current_child = next;
            let priority = arena[current_child].pending_work_priority;
            let cloned = arena.clone_fiber(current_child, priority);
            arena[new_child].sibling = Some(cloned);
            arena[cloned].parent = Some(work_in_progress);
            new_child = cloned;
            cloned_count += 1;
        }
        arena[new_child].sibling = None;
        log::trace!(
            "[RECONCILE] cloned {cloned_count} aliased children under {work_in_progress:?}"
        );
    }

    let mut child = arena[work_in_progress].child;
    while let Some(id) = child {
        arena[id].parent = Some(work_in_progress);
        child = arena[id].sibling;
    }
}

/// Identity of a slot in the keyed-lookup tail: explicit key when present,
/// otherwise the old fiber's position.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum SlotKey {
    Keyed(Arc<str>),
    Positional(usize),
}

/// One reconciliation pass, monomorphized per mode.
///
/// `SHOULD_CLONE` decides whether reused fibers are cloned into the
/// work-in-progress tree or adopted in place; `TRACK_SIDE_EFFECTS` decides
/// whether placement tags and deletion queues are maintained at all.
struct Reconciler<'a, const SHOULD_CLONE: bool, const TRACK_SIDE_EFFECTS: bool> {
    arena: &'a mut FiberArena,
}

impl<const SHOULD_CLONE: bool, const TRACK_SIDE_EFFECTS: bool>
    Reconciler<'_, SHOULD_CLONE, TRACK_SIDE_EFFECTS>
{
    fn reconcile(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &VNode,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        match new_child {
            VNode::Text(content) => {
                let fiber =
                    self.reconcile_single_text_node(parent, current_first_child, content, priority);
                Ok(Some(self.place_single_child(fiber)))
            }
            VNode::Element(element) => {
                let fiber =
                    self.reconcile_single_element(parent, current_first_child, element, priority)?;
                Ok(Some(self.place_single_child(fiber)))
            }
            VNode::Coroutine(coroutine) => {
                let fiber = self.reconcile_single_coroutine(
                    parent,
                    current_first_child,
                    coroutine,
                    priority,
                );
                Ok(Some(self.place_single_child(fiber)))
            }
            VNode::Yield(yield_node) => {
                let fiber = self.reconcile_single_yield(
                    parent,
                    current_first_child,
                    yield_node,
                    priority,
                );
                Ok(Some(self.place_single_child(fiber)))
            }
            VNode::Portal(portal) => {
                let fiber =
                    self.reconcile_single_portal(parent, current_first_child, portal, priority);
                Ok(Some(self.place_single_child(fiber)))
            }
            VNode::Fragment(ChildSeq::Indexed(children)) => {
                self.reconcile_children_array(parent, current_first_child, children, priority)
            }
            VNode::Fragment(ChildSeq::Lazy(children)) => {
                self.reconcile_children_iterator(parent, current_first_child, children, priority)
            }
            VNode::Empty => {
                // Nothing renderable: the child list empties out.
                self.delete_remaining_children(parent, current_first_child);
                Ok(None)
            }
        }
    }

    // === Effects ===

    /// Queues `child` on `parent`'s deletion chain and tags it. In in-place
    /// mode the chain is walking work-in-progress copies, but the committer
    /// must remove the committed copy, so the deletion is redirected to the
    /// alternate; with no alternate nothing is mounted and the deletion is
    /// elided.
    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        if !TRACK_SIDE_EFFECTS {
            return;
        }
        let mut target = child;
        if !SHOULD_CLONE {
            match self.arena[child].alternate {
                Some(alternate) => target = alternate,
                None => return,
            }
        }
        match self.arena[parent].last_deletion {
            Some(last) => self.arena[last].next_effect = Some(target),
            None => self.arena[parent].first_deletion = Some(target),
        }
        self.arena[parent].last_deletion = Some(target);
        let fiber = &mut self.arena[target];
        fiber.next_effect = None;
        fiber.effect_tag = EffectTags::DELETION;
        log::trace!("[RECONCILE] queued deletion of {target:?} on {parent:?}");
    }

    fn delete_remaining_children(&mut self, parent: FiberId, first: Option<FiberId>) {
        if !TRACK_SIDE_EFFECTS {
            return;
        }
        let mut child = first;
        while let Some(id) = child {
            child = self.arena[id].sibling;
            self.delete_child(parent, id);
        }
    }

    // === Fiber reuse and placement ===

    /// Produces the fiber to install in the work-in-progress chain for a
    /// reused `fiber`: its clone in clone mode, the fiber itself otherwise.
    /// The priority is overwritten in both cases, even downward.
    fn use_fiber(&mut self, fiber: FiberId, priority: Priority) -> FiberId {
        let reused = if SHOULD_CLONE {
            self.arena.clone_fiber(fiber, priority)
        } else {
            let fiber_mut = &mut self.arena[fiber];
            fiber_mut.pending_work_priority = priority;
            fiber_mut.effect_tag = EffectTags::empty();
            fiber
        };
        let fiber_mut = &mut self.arena[reused];
        fiber_mut.index = 0;
        fiber_mut.sibling = None;
        reused
    }

    /// Assigns `new_index` to `fiber` and decides whether it needs a
    /// placement tag, returning the new high-water mark of old indices.
    /// Reused fibers whose old index is below the mark have moved relative
    /// to the reused fibers already placed.
    fn place_child(&mut self, fiber: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        self.arena[fiber].index = new_index;
        if !TRACK_SIDE_EFFECTS {
            return last_placed_index;
        }
        match self.arena[fiber].alternate {
            Some(current) => {
                let old_index = self.arena[current].index;
                if old_index < last_placed_index {
                    self.arena[fiber].effect_tag.insert(EffectTags::PLACEMENT);
                    log::trace!(
                        "[RECONCILE] {fiber:?} moved: old index {old_index} < {last_placed_index}"
                    );
                    last_placed_index
                } else {
                    old_index
                }
            }
            None => {
                self.arena[fiber].effect_tag.insert(EffectTags::PLACEMENT);
                log::trace!("[RECONCILE] placing new fiber {fiber:?} at {new_index}");
                last_placed_index
            }
        }
    }

    /// Placement tagging for the single-child paths: only a freshly created
    /// fiber needs to be attached.
    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if TRACK_SIDE_EFFECTS && self.arena[fiber].alternate.is_none() {
            self.arena[fiber].effect_tag.insert(EffectTags::PLACEMENT);
        }
        fiber
    }

    // === Per-kind update helpers ===

    fn element_type_matches(&self, fiber: FiberId, element: &Element) -> bool {
        self.arena[fiber].type_desc.as_element() == Some(&element.element_type)
    }

    fn portal_matches(&self, fiber: FiberId, portal: &Portal) -> bool {
        let fiber = &self.arena[fiber];
        fiber.kind == FiberKind::HostPortal
            && matches!(&fiber.state_node, StateNode::Portal(state) if state.matches(portal))
    }

    fn update_text_node(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        content: &Arc<str>,
        priority: Priority,
    ) -> FiberId {
        match current {
            Some(current) if self.arena[current].kind == FiberKind::HostText => {
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.pending_props = PendingProps::Text(content.clone());
                fiber.parent = Some(parent);
                existing
            }
            _ => {
                let created = self.arena.create_from_text(content.clone(), priority);
                self.arena[created].parent = Some(parent);
                created
            }
        }
    }

    fn update_element(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        element: &Element,
        priority: Priority,
    ) -> Result<FiberId, ReconcileError> {
        match current {
            Some(current) if self.element_type_matches(current, element) => {
                let ref_handle = coerce_ref(self.arena, Some(current), element)?;
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.ref_handle = ref_handle;
                fiber.pending_props = PendingProps::Props(element.props.clone());
                fiber.parent = Some(parent);
                Ok(existing)
            }
            _ => {
                let ref_handle = coerce_ref(self.arena, current, element)?;
                let created = self.arena.create_from_element(element, priority);
                let fiber = &mut self.arena[created];
                fiber.ref_handle = ref_handle;
                fiber.parent = Some(parent);
                Ok(created)
            }
        }
    }

    fn update_coroutine(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        coroutine: &Coroutine,
        priority: Priority,
    ) -> FiberId {
        // Reuse is keyed on kind alone; handlers are not compared.
        match current {
            Some(current) if self.arena[current].kind == FiberKind::CoroutineComponent => {
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.pending_props = PendingProps::Coroutine(coroutine.clone());
                fiber.parent = Some(parent);
                existing
            }
            _ => {
                let created = self.arena.create_from_coroutine(coroutine, priority);
                self.arena[created].parent = Some(parent);
                created
            }
        }
    }

    fn update_yield(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        yield_node: &YieldNode,
        priority: Priority,
    ) -> FiberId {
        match current {
            Some(current) if self.arena[current].kind == FiberKind::YieldComponent => {
                let updated = match self.arena[current].type_desc.as_reified() {
                    Some(previous) => create_updated_reified_yield(previous, yield_node),
                    None => create_reified_yield(yield_node),
                };
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.type_desc = TypeDesc::Reified(updated);
                fiber.pending_props = PendingProps::Props(yield_node.value.clone());
                fiber.parent = Some(parent);
                existing
            }
            _ => {
                let created = self.arena.create_from_yield(yield_node, priority);
                self.arena[created].parent = Some(parent);
                created
            }
        }
    }

    fn update_portal(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        portal: &Portal,
        priority: Priority,
    ) -> FiberId {
        match current {
            Some(current) if self.portal_matches(current, portal) => {
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.pending_props = PendingProps::Children(portal.children.clone());
                fiber.parent = Some(parent);
                existing
            }
            _ => {
                let created = self.arena.create_from_portal(portal, priority);
                self.arena[created].parent = Some(parent);
                created
            }
        }
    }

    fn update_fragment(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        children: &ChildSeq,
        priority: Priority,
    ) -> FiberId {
        match current {
            Some(current) if self.arena[current].kind == FiberKind::Fragment => {
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.pending_props = PendingProps::Children(children.clone());
                fiber.parent = Some(parent);
                existing
            }
            _ => {
                let created = self.arena.create_from_fragment(children.clone(), priority);
                self.arena[created].parent = Some(parent);
                created
            }
        }
    }

    /// Builds a fresh fiber for `new_child`, or `None` for empty slots.
    fn create_child(
        &mut self,
        parent: FiberId,
        new_child: &VNode,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let created = match new_child {
            VNode::Empty => return Ok(None),
            VNode::Text(content) => self.arena.create_from_text(content.clone(), priority),
            VNode::Element(element) => {
                let ref_handle = coerce_ref(self.arena, None, element)?;
                let created = self.arena.create_from_element(element, priority);
                self.arena[created].ref_handle = ref_handle;
                created
            }
            VNode::Coroutine(coroutine) => self.arena.create_from_coroutine(coroutine, priority),
            VNode::Yield(yield_node) => self.arena.create_from_yield(yield_node, priority),
            VNode::Portal(portal) => self.arena.create_from_portal(portal, priority),
            VNode::Fragment(children) => {
                self.arena.create_from_fragment(children.clone(), priority)
            }
        };
        self.arena[created].parent = Some(parent);
        Ok(Some(created))
    }

    /// Matches `new_child` against `old_fiber` slot-for-slot. Returns a
    /// fiber only when keys agree (text and fragments are implicitly
    /// unkeyed, so they match only an unkeyed old fiber); a key mismatch
    /// ends the forward scan.
    fn update_slot(
        &mut self,
        parent: FiberId,
        old_fiber: Option<FiberId>,
        new_child: &VNode,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let old_key = old_fiber.and_then(|old| self.arena[old].key.clone());
        match new_child {
            VNode::Text(content) => {
                if old_key.is_some() {
                    return Ok(None);
                }
                Ok(Some(self.update_text_node(parent, old_fiber, content, priority)))
            }
            VNode::Element(element) => {
                if element.key == old_key {
                    Ok(Some(self.update_element(parent, old_fiber, element, priority)?))
                } else {
                    Ok(None)
                }
            }
            VNode::Coroutine(coroutine) => {
                if coroutine.key == old_key {
                    Ok(Some(self.update_coroutine(parent, old_fiber, coroutine, priority)))
                } else {
                    Ok(None)
                }
            }
            VNode::Yield(yield_node) => {
                if yield_node.key == old_key {
                    Ok(Some(self.update_yield(parent, old_fiber, yield_node, priority)))
                } else {
                    Ok(None)
                }
            }
            VNode::Portal(portal) => {
                if portal.key == old_key {
                    Ok(Some(self.update_portal(parent, old_fiber, portal, priority)))
                } else {
                    Ok(None)
                }
            }
            VNode::Fragment(children) => {
                if old_key.is_some() {
                    return Ok(None);
                }
                Ok(Some(self.update_fragment(parent, old_fiber, children, priority)))
            }
            VNode::Empty => Ok(None),
        }
    }

    /// Looks `new_child` up among the remaining old fibers by key, or by
    /// its slot position for implicitly keyed kinds, then updates or
    /// creates as usual.
    fn update_from_map(
        &mut self,
        existing_children: &FxHashMap<SlotKey, FiberId>,
        parent: FiberId,
        new_idx: usize,
        new_child: &VNode,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        match new_child {
            VNode::Text(content) => {
                let matched = existing_children.get(&SlotKey::Positional(new_idx)).copied();
                Ok(Some(self.update_text_node(parent, matched, content, priority)))
            }
            VNode::Element(element) => {
                let matched = existing_children
                    .get(&Self::slot_key(element.key.as_ref(), new_idx))
                    .copied();
                Ok(Some(self.update_element(parent, matched, element, priority)?))
            }
            VNode::Coroutine(coroutine) => {
                let matched = existing_children
                    .get(&Self::slot_key(coroutine.key.as_ref(), new_idx))
                    .copied();
                Ok(Some(self.update_coroutine(parent, matched, coroutine, priority)))
            }
            VNode::Yield(yield_node) => {
                let matched = existing_children
                    .get(&Self::slot_key(yield_node.key.as_ref(), new_idx))
                    .copied();
                Ok(Some(self.update_yield(parent, matched, yield_node, priority)))
            }
            VNode::Portal(portal) => {
                let matched = existing_children
                    .get(&Self::slot_key(portal.key.as_ref(), new_idx))
                    .copied();
                Ok(Some(self.update_portal(parent, matched, portal, priority)))
            }
            VNode::Fragment(children) => {
                let matched = existing_children.get(&SlotKey::Positional(new_idx)).copied();
                Ok(Some(self.update_fragment(parent, matched, children, priority)))
            }
            VNode::Empty => Ok(None),
        }
    }

    fn slot_key(key: Option<&Arc<str>>, index: usize) -> SlotKey {
        match key {
            Some(key) => SlotKey::Keyed(key.clone()),
            None => SlotKey::Positional(index),
        }
    }

    /// Indexes the remaining old children for out-of-order lookup: by key
    /// where present, by old index otherwise.
    fn map_remaining_children(&self, first: Option<FiberId>) -> FxHashMap<SlotKey, FiberId> {
        let mut existing_children = FxHashMap::default();
        for id in self.arena.siblings(first) {
            let fiber = &self.arena[id];
            let slot = match &fiber.key {
                Some(key) => SlotKey::Keyed(key.clone()),
                None => SlotKey::Positional(fiber.index),
            };
            existing_children.insert(slot, id);
        }
        existing_children
    }

    // === Single-child reconciliation ===

    /// Text carries no key, so only the first existing child can be reused,
    /// and only if it is already text.
    fn reconcile_single_text_node(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        content: &Arc<str>,
        priority: Priority,
    ) -> FiberId {
        if let Some(current) = current_first_child {
            if self.arena[current].kind == FiberKind::HostText {
                let rest = self.arena[current].sibling;
                self.delete_remaining_children(parent, rest);
                let existing = self.use_fiber(current, priority);
                let fiber = &mut self.arena[existing];
                fiber.pending_props = PendingProps::Text(content.clone());
                fiber.parent = Some(parent);
                return existing;
            }
        }
        self.delete_remaining_children(parent, current_first_child);
        let created = self.arena.create_from_text(content.clone(), priority);
        self.arena[created].parent = Some(parent);
        created
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
        priority: Priority,
    ) -> Result<FiberId, ReconcileError> {
        let mut child = current_first_child;
        while let Some(id) = child {
            if self.arena[id].key == element.key {
                if self.element_type_matches(id, element) {
                    let rest = self.arena[id].sibling;
                    self.delete_remaining_children(parent, rest);
                    let ref_handle = coerce_ref(self.arena, Some(id), element)?;
                    let existing = self.use_fiber(id, priority);
                    let fiber = &mut self.arena[existing];
                    fiber.ref_handle = ref_handle;
                    fiber.pending_props = PendingProps::Props(element.props.clone());
                    fiber.parent = Some(parent);
                    return Ok(existing);
                }
                // Same key, wrong shape: nothing further down can match.
                self.delete_remaining_children(parent, Some(id));
                break;
            }
            self.delete_child(parent, id);
            child = self.arena[id].sibling;
        }
        let ref_handle = coerce_ref(self.arena, current_first_child, element)?;
        let created = self.arena.create_from_element(element, priority);
        let fiber = &mut self.arena[created];
        fiber.ref_handle = ref_handle;
        fiber.parent = Some(parent);
        Ok(created)
    }

    fn reconcile_single_coroutine(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        coroutine: &Coroutine,
        priority: Priority,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if self.arena[id].key == coroutine.key {
                if self.arena[id].kind == FiberKind::CoroutineComponent {
                    let rest = self.arena[id].sibling;
                    self.delete_remaining_children(parent, rest);
                    let existing = self.use_fiber(id, priority);
                    let fiber = &mut self.arena[existing];
                    fiber.pending_props = PendingProps::Coroutine(coroutine.clone());
                    fiber.parent = Some(parent);
                    return existing;
                }
                self.delete_remaining_children(parent, Some(id));
                break;
            }
            self.delete_child(parent, id);
            child = self.arena[id].sibling;
        }
        let created = self.arena.create_from_coroutine(coroutine, priority);
        self.arena[created].parent = Some(parent);
        created
    }

    fn reconcile_single_yield(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        yield_node: &YieldNode,
        priority: Priority,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if self.arena[id].key == yield_node.key {
                if self.arena[id].kind == FiberKind::YieldComponent {
                    let rest = self.arena[id].sibling;
                    self.delete_remaining_children(parent, rest);
                    let updated = match self.arena[id].type_desc.as_reified() {
                        Some(previous) => create_updated_reified_yield(previous, yield_node),
                        None => create_reified_yield(yield_node),
                    };
                    let existing = self.use_fiber(id, priority);
                    let fiber = &mut self.arena[existing];
                    fiber.type_desc = TypeDesc::Reified(updated);
                    fiber.pending_props = PendingProps::Props(yield_node.value.clone());
                    fiber.parent = Some(parent);
                    return existing;
                }
                self.delete_remaining_children(parent, Some(id));
                break;
            }
            self.delete_child(parent, id);
            child = self.arena[id].sibling;
        }
        let created = self.arena.create_from_yield(yield_node, priority);
        self.arena[created].parent = Some(parent);
        created
    }

    fn reconcile_single_portal(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        portal: &Portal,
        priority: Priority,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if self.arena[id].key == portal.key {
                if self.portal_matches(id, portal) {
                    let rest = self.arena[id].sibling;
                    self.delete_remaining_children(parent, rest);
                    let existing = self.use_fiber(id, priority);
                    let fiber = &mut self.arena[existing];
                    fiber.pending_props = PendingProps::Children(portal.children.clone());
                    fiber.parent = Some(parent);
                    return existing;
                }
                self.delete_remaining_children(parent, Some(id));
                break;
            }
            self.delete_child(parent, id);
            child = self.arena[id].sibling;
        }
        let created = self.arena.create_from_portal(portal, priority);
        self.arena[created].parent = Some(parent);
        created
    }

    // === Multi-child reconciliation ===

    fn reconcile_children_array(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[VNode],
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        #[cfg(debug_assertions)]
        warn_on_duplicate_keys(new_children.iter().filter_map(|child| child.key().cloned()));

        let mut resulting_first_child: Option<FiberId> = None;
        let mut previous_new_fiber: Option<FiberId> = None;
        let mut old_fiber = current_first_child;
        let mut next_old_fiber: Option<FiberId> = None;
        let mut last_placed_index = 0usize;
        let mut new_idx = 0usize;

        // Forward scan: reuse while keys line up slot-for-slot.
        while new_idx < new_children.len() {
            let Some(old) = old_fiber else { break };
            if self.arena[old].index > new_idx {
                // A sparse previous pass skipped this slot; treat it as an
                // insertion and hold the old fiber for the next slot.
                next_old_fiber = old_fiber;
                old_fiber = None;
            } else {
                next_old_fiber = self.arena[old].sibling;
            }

            let Some(new_fiber) =
                self.update_slot(parent, old_fiber, &new_children[new_idx], priority)?
            else {
                if old_fiber.is_none() {
                    old_fiber = next_old_fiber;
                }
                break;
            };

            if TRACK_SIDE_EFFECTS {
                if let Some(old) = old_fiber {
                    if self.arena[new_fiber].alternate.is_none() {
                        // Key matched but the shape did not, so the slot was
                        // rebuilt instead of reused.
                        self.delete_child(parent, old);
                    }
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
            match previous_new_fiber {
                Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                None => resulting_first_child = Some(new_fiber),
            }
            previous_new_fiber = Some(new_fiber);
            old_fiber = next_old_fiber;
            new_idx += 1;
        }

        if new_idx == new_children.len() {
            // New children exhausted; whatever is left of the old chain
            // goes away.
            self.delete_remaining_children(parent, old_fiber);
            return Ok(resulting_first_child);
        }

        if old_fiber.is_none() {
            // Old chain exhausted; everything left is an insertion.
            while new_idx < new_children.len() {
                if let Some(new_fiber) =
                    self.create_child(parent, &new_children[new_idx], priority)?
                {
                    last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
                    match previous_new_fiber {
                        Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                        None => resulting_first_child = Some(new_fiber),
                    }
                    previous_new_fiber = Some(new_fiber);
                }
                new_idx += 1;
            }
            return Ok(resulting_first_child);
        }

        // Keyed tail: the rest of the old chain is reachable only by key or
        // by old position.
        let mut existing_children = self.map_remaining_children(old_fiber);
        while new_idx < new_children.len() {
            if let Some(new_fiber) = self.update_from_map(
                &existing_children,
                parent,
                new_idx,
                &new_children[new_idx],
                priority,
            )? {
                if TRACK_SIDE_EFFECTS && self.arena[new_fiber].alternate.is_some() {
                    // Reused: drop it from the map so the cleanup below does
                    // not delete it.
                    let slot = match &self.arena[new_fiber].key {
                        Some(key) => SlotKey::Keyed(key.clone()),
                        None => SlotKey::Positional(new_idx),
                    };
                    existing_children.remove(&slot);
                }
                last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
                match previous_new_fiber {
                    Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                    None => resulting_first_child = Some(new_fiber),
                }
                previous_new_fiber = Some(new_fiber);
            }
            new_idx += 1;
        }

        self.delete_unmatched_children(parent, existing_children);
        Ok(resulting_first_child)
    }

    fn reconcile_children_iterator(
        &mut self,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &LazySeq,
        priority: Priority,
    ) -> Result<Option<FiberId>, ReconcileError> {
        // The validation pass consumes one iterator; the main pass below
        // requests a fresh one. One-shot sequences fail the second request.
        #[cfg(debug_assertions)]
        if let Some(children) = new_children.iterator() {
            warn_on_duplicate_keys(children.filter_map(|child| child.key().cloned()));
        }

        let mut iter = new_children.iterator().ok_or(ReconcileError::NotIterable)?;

        let mut resulting_first_child: Option<FiberId> = None;
        let mut previous_new_fiber: Option<FiberId> = None;
        let mut old_fiber = current_first_child;
        let mut next_old_fiber: Option<FiberId> = None;
        let mut last_placed_index = 0usize;
        let mut new_idx = 0usize;
        let mut step = iter.next();

        // Forward scan, strictly in step with the iterator.
        loop {
            let Some(new_child) = step.take() else { break };
            let Some(old) = old_fiber else {
                step = Some(new_child);
                break;
            };
            if self.arena[old].index > new_idx {
                next_old_fiber = old_fiber;
                old_fiber = None;
            } else {
                next_old_fiber = self.arena[old].sibling;
            }

            let Some(new_fiber) = self.update_slot(parent, old_fiber, &new_child, priority)? else {
                if old_fiber.is_none() {
                    old_fiber = next_old_fiber;
                }
                step = Some(new_child);
                break;
            };

            if TRACK_SIDE_EFFECTS {
                if let Some(old) = old_fiber {
                    if self.arena[new_fiber].alternate.is_none() {
                        self.delete_child(parent, old);
                    }
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
            match previous_new_fiber {
                Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                None => resulting_first_child = Some(new_fiber),
            }
            previous_new_fiber = Some(new_fiber);
            old_fiber = next_old_fiber;
            new_idx += 1;
            step = iter.next();
        }

        if step.is_none() {
            self.delete_remaining_children(parent, old_fiber);
            return Ok(resulting_first_child);
        }

        if old_fiber.is_none() {
            loop {
                let Some(new_child) = step.take() else { break };
                if let Some(new_fiber) = self.create_child(parent, &new_child, priority)? {
                    last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
                    match previous_new_fiber {
                        Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                        None => resulting_first_child = Some(new_fiber),
                    }
                    previous_new_fiber = Some(new_fiber);
                }
                new_idx += 1;
                step = iter.next();
            }
            return Ok(resulting_first_child);
        }

        let mut existing_children = self.map_remaining_children(old_fiber);
        loop {
            let Some(new_child) = step.take() else { break };
            if let Some(new_fiber) =
                self.update_from_map(&existing_children, parent, new_idx, &new_child, priority)?
            {
                if TRACK_SIDE_EFFECTS && self.arena[new_fiber].alternate.is_some() {
                    let slot = match &self.arena[new_fiber].key {
                        Some(key) => SlotKey::Keyed(key.clone()),
                        None => SlotKey::Positional(new_idx),
                    };
                    existing_children.remove(&slot);
                }
                last_placed_index = self.place_child(new_fiber, last_placed_index, new_idx);
                match previous_new_fiber {
                    Some(previous) => self.arena[previous].sibling = Some(new_fiber),
                    None => resulting_first_child = Some(new_fiber),
                }
                previous_new_fiber = Some(new_fiber);
            }
            new_idx += 1;
            step = iter.next();
        }

        self.delete_unmatched_children(parent, existing_children);
        Ok(resulting_first_child)
    }

    /// Deletes the old children that no new child claimed, in old-chain
    /// order. The map iterates in arbitrary order, so order is recovered
    /// from the fibers' old indices, which unclaimed fibers still carry.
    fn delete_unmatched_children(
        &mut self,
        parent: FiberId,
        existing_children: FxHashMap<SlotKey, FiberId>,
    ) {
        if !TRACK_SIDE_EFFECTS {
            return;
        }
        let mut unmatched: SmallVec<[FiberId; 8]> = existing_children.into_values().collect();
        unmatched.sort_unstable_by_key(|id| self.arena[*id].index);
        for child in unmatched {
            self.delete_child(parent, child);
        }
    }
}

/// Reports the second and later occurrences of each key. First occurrence
/// wins during reconciliation; duplicates fall through to the insertion
/// path.
#[cfg(debug_assertions)]
fn warn_on_duplicate_keys(keys: impl Iterator<Item = Arc<str>>) {
    let mut seen = FxHashSet::default();
    for key in keys {
        if !seen.insert(key.clone()) {
            log::warn!(
                "[RECONCILE] duplicate child key {key:?}; the first keyed child wins and \
                 later duplicates are treated as insertions"
            );
        }
    }
}

#[cfg(test)]
mod tests;
