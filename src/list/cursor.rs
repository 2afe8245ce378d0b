//! Filepath: src/list/cursor.rs
//!
//! Hand-over-hand traversal cursor.
//!
//! A [`Cursor`] owns exactly one node lock at rest. Moving forward acquires
//! the successor's lock *before* releasing the current one, so at every
//! instant at least one node on the path is held locked: no concurrent
//! delete can unlink a node out from under an in-flight traversal, and no
//! concurrent insert can slip in behind the cursor unobserved.
//!
//! Standing lock order (deadlock freedom by construction): the head lock is
//! acquired before any node lock, and node locks are only ever acquired in
//! forward chain order. The trailing lock is released only after the leading
//! lock is held; never the reverse.

use parking_lot::MutexGuard;

use super::{ConcurrentList, NodeInner};
use crate::pool::PoolPtr;

/// A position in the chain whose node lock is held.
///
/// The guard releases on drop, so abandoning a cursor anywhere is safe.
pub(crate) struct Cursor<'l> {
    /// Handle of the locked node.
    pub(crate) ptr: PoolPtr,

    /// The node's lock, held for as long as the cursor lives.
    pub(crate) guard: MutexGuard<'l, NodeInner>,
}

/// Outcome of one coupled step.
pub(crate) enum Step<'l> {
    /// Moved to the successor; its lock is now held, the old one released.
    Forward(Cursor<'l>),

    /// No successor: the cursor (still holding its lock) is handed back so
    /// the caller can splice at the tail.
    Tail(Cursor<'l>),

    /// The successor handle could not be resolved against the pool. All
    /// locks released; the traversal cannot continue.
    Detached,
}

impl<'l> Cursor<'l> {
    /// Advance one node, acquiring the successor's lock before releasing the
    /// current one.
    pub(crate) fn step(self, list: &'l ConcurrentList) -> Step<'l> {
        let Some(next) = self.guard.next else {
            return Step::Tail(self);
        };
        let Some(node) = list.node(next) else {
            return Step::Detached;
        };

        // Coupling: leading lock first, then drop the trailing one.
        let next_guard: MutexGuard<'l, NodeInner> = node.lock.lock();
        drop(self.guard);

        Step::Forward(Cursor {
            ptr: next,
            guard: next_guard,
        })
    }
}
