//! Callable refs.
//!
//! A ref gives a component access to the host output (or class instance) of
//! one of the elements it rendered. By the time a ref is stored on a fiber
//! it is always callable: the committer invokes it with the attached value
//! on mount and with `None` on unmount. String refs are coerced into
//! callables here, bound to the owning instance's `refs` table.

use crate::fiber::{FiberArena, FiberId, StateNode};
use crate::reconcile::ReconcileError;
use crate::vnode::{Element, RefValue};
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Opaque handle to a mounted host node or class instance, as passed to
/// refs by the committer.
pub type HostHandle = Rc<dyn Any>;

/// A callable ref.
///
/// Refs synthesized from a string carry the original string as a
/// retrievable tag so a later reconciliation of the same element can keep
/// the same callable instead of minting a fresh one.
#[derive(Clone)]
pub struct CallbackRef {
    handler: Rc<dyn Fn(Option<HostHandle>)>,
    string_tag: Option<Arc<str>>,
}

impl CallbackRef {
    /// Wraps a user-supplied ref callback.
    pub fn new(handler: impl Fn(Option<HostHandle>) + 'static) -> Self {
        CallbackRef {
            handler: Rc::new(handler),
            string_tag: None,
        }
    }

    fn tagged(tag: Arc<str>, handler: impl Fn(Option<HostHandle>) + 'static) -> Self {
        CallbackRef {
            handler: Rc::new(handler),
            string_tag: Some(tag),
        }
    }

    /// Invokes the ref with the attached value, or with `None` to detach.
    pub fn invoke(&self, value: Option<HostHandle>) {
        (self.handler)(value);
    }

    /// The string this ref was synthesized from, if any.
    pub fn string_tag(&self) -> Option<&Arc<str>> {
        self.string_tag.as_ref()
    }

    /// Whether two refs share the same underlying callable.
    pub fn ptr_eq(&self, other: &CallbackRef) -> bool {
        Rc::ptr_eq(&self.handler, &other.handler)
    }
}

impl fmt::Debug for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRef").field("string_tag", &self.string_tag).finish_non_exhaustive()
    }
}

/// Coerces an element's ref into callable form.
///
/// Callable and absent refs pass through unchanged. A string ref resolves
/// the owner fiber's public instance and binds the string to its `refs`
/// table: invoking the result with a value stores it under the string,
/// invoking with `None` removes the entry. If `current` already carries a
/// callable synthesized from the same string, that callable is returned so
/// the committer sees a stable identity across updates.
///
/// Fails with [`ReconcileError::MissingOwner`] when a string ref has no
/// owner, or an owner that publishes no instance.
pub fn coerce_ref(
    arena: &FiberArena,
    current: Option<FiberId>,
    element: &Element,
) -> Result<Option<CallbackRef>, ReconcileError> {
    let name = match &element.ref_value {
        None => return Ok(None),
        Some(RefValue::Callback(callback)) => return Ok(Some(callback.clone())),
        Some(RefValue::Named(name)) => name.clone(),
    };

    let owner = element.owner.ok_or_else(|| ReconcileError::MissingOwner {
        ref_name: name.clone(),
    })?;
    let instance = match &arena[owner].state_node {
        StateNode::Class(instance) => instance.clone(),
        _ => {
            return Err(ReconcileError::MissingOwner {
                ref_name: name.clone(),
            });
        }
    };

    if let Some(current) = current {
        if let Some(existing) = &arena[current].ref_handle {
            if existing.string_tag() == Some(&name) {
                return Ok(Some(existing.clone()));
            }
        }
    }

    let slot = name.clone();
    Ok(Some(CallbackRef::tagged(name, move |value| match value {
        Some(value) => instance.set_ref(slot.clone(), value),
        None => instance.clear_ref(&slot),
    })))
}
