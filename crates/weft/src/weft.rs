//! weft keeps a retained tree of [`Fiber`] nodes alive across frames and
//! reconciles each parent's children against the description produced by the
//! next render. Descriptions ([`VNode`]) are ephemeral plain data; fibers are
//! persistent and double-buffered between a *current* tree (the committed,
//! visible one) and a *work-in-progress* tree being prepared for the next
//! commit.
//!
//! The reconciler matches new children against the existing sibling chain by
//! key, by position, and by shape, reusing mounted fibers where it can. It
//! does not touch the host: instead it records effect tags ([`EffectTags`])
//! and a per-parent deletion chain that a downstream committer consumes to
//! perform the actual host insertions, moves, and removals.
//!
//! Three entry points share one algorithm and differ only in whether reused
//! fibers are cloned into the work-in-progress tree and whether effects are
//! recorded at all:
//!
//! - [`reconcile_child_fibers`]: clone reused fibers, record effects.
//! - [`reconcile_child_fibers_in_place`]: mutate fibers directly (the caller
//!   guarantees they already belong to the work-in-progress tree), record
//!   effects.
//! - [`mount_child_fibers_in_place`]: initial mount, no cloning and no
//!   effects; the committer places the entire subtree unconditionally.
//!
//! [`clone_child_fibers`] is the separate entry point used when a parent
//! bails out of rendering but its child pointer still aliases the current
//! tree.

mod coroutine;
mod fiber;
mod reconcile;
mod refs;
mod vnode;

pub use coroutine::*;
pub use fiber::*;
pub use reconcile::*;
pub use refs::*;
pub use vnode::*;
