//! Coroutine and yield control flow.
//!
//! A coroutine renders children that may yield values back to the
//! coroutine's handler; the handler decides what to do with them. The
//! reconciler treats both forms structurally: it never calls the handler or
//! the continuation, it only keeps them flowing through the tree.

use crate::vnode::Props;
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

/// Opaque handler a coroutine's yielded values are fed to.
pub type CoroutineHandler = Rc<dyn Any>;

/// Opaque continuation carried by a yield.
pub type Continuation = Rc<dyn Any>;

/// A coroutine description.
#[derive(Clone)]
pub struct Coroutine {
    /// Optional identity among siblings.
    pub key: Option<Arc<str>>,
    /// The handler yielded values are fed to.
    pub handler: CoroutineHandler,
    /// Next props to apply.
    pub props: Props,
}

impl Coroutine {
    /// Creates an unkeyed coroutine description.
    pub fn new(handler: CoroutineHandler, props: Props) -> Self {
        Coroutine {
            key: None,
            handler,
            props,
        }
    }

    /// Sets the sibling identity key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A yield description.
#[derive(Clone)]
pub struct YieldNode {
    /// Optional identity among siblings.
    pub key: Option<Arc<str>>,
    /// The continuation the enclosing coroutine resumes with.
    pub continuation: Continuation,
    /// The yielded value.
    pub value: Props,
}

impl YieldNode {
    /// Creates an unkeyed yield description.
    pub fn new(continuation: Continuation, value: Props) -> Self {
        YieldNode {
            key: None,
            continuation,
            value,
        }
    }

    /// Sets the sibling identity key.
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// The reified form of a yield, stored as the type descriptor of a yield
/// fiber and consumed by the coroutine machinery.
#[derive(Clone)]
pub struct ReifiedYield {
    /// The continuation captured from the yield description.
    pub continuation: Continuation,
    /// The yielded value at reification time.
    pub props: Props,
}

/// Reifies a fresh yield.
pub fn create_reified_yield(yield_node: &YieldNode) -> ReifiedYield {
    ReifiedYield {
        continuation: yield_node.continuation.clone(),
        props: yield_node.value.clone(),
    }
}

/// Reifies an updated yield: the previous continuation is preserved, the
/// value is refreshed from the new description.
pub fn create_updated_reified_yield(
    previous: &ReifiedYield,
    yield_node: &YieldNode,
) -> ReifiedYield {
    ReifiedYield {
        continuation: previous.continuation.clone(),
        props: yield_node.value.clone(),
    }
}
