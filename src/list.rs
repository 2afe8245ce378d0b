//! Filepath: src/list.rs
//!
//! Concurrent singly linked list backed by a [`Pool`].
//!
//! Every node's memory is a loan from the pool; the list owns the node while
//! it is linked and returns the memory the instant it is unlinked. Structural
//! access is synchronized with a head-level lock plus per-node locks acquired
//! in list order (lock coupling, see [`cursor`]).
//!
//! # Why freeing under locks is safe
//!
//! A node's lock is destroyed and its memory returned only while the lock of
//! its predecessor (or the head lock, for the first node) is held. Any thread
//! that could block on the dying node's lock must first pass through that
//! predecessor, which we hold, so no thread is ever waiting on a lock being
//! destroyed.
//!
//! # Lock order
//!
//! Head lock before any node lock; successor lock acquired before predecessor
//! lock released; the pool's internal lock is a leaf acquired last and never
//! held across a node-lock acquisition of a *linked* node. Violating this
//! order is the only way to deadlock, and no code path does.
//!
//! # Stale handles
//!
//! [`NodeRef`] is a plain handle with no liveness guarantee. Operations that
//! take one ([`ConcurrentList::insert_after`]) require the caller to ensure
//! the node is still linked, e.g. by coordinating deletions externally or by
//! working through a [`SearchGuard`], which proves liveness by holding the
//! node's lock.

use std::fmt::{self, Write as _};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::pool::{Pool, PoolError, PoolPtr, ALIGNMENT};
use crate::tracing_helpers::{error_log, trace_log, warn_log};

pub(crate) mod cursor;
use cursor::{Cursor, Step};

// ============================================================================
//  Constants
// ============================================================================

/// Capacity used when [`ConcurrentList::init`] finds an uninitialized pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64 * 1024;

/// Default hard iteration ceiling for chain traversals.
///
/// A corrupted or cyclic chain stops here with a diagnostic instead of
/// hanging; the partial result accumulated so far is returned.
pub const TRAVERSAL_CEILING: usize = 1_000_000;

// ============================================================================
//  Node
// ============================================================================

/// Fields guarded by a node's lock.
pub(crate) struct NodeInner {
    /// The node's value.
    pub(crate) data: u16,

    /// Handle of the following node, or `None` at the tail.
    pub(crate) next: Option<PoolPtr>,
}

/// A list node as stored in pool payload memory.
///
/// The mutex is the node's dedicated lock guarding `data` and `next`. It is
/// created when the node is written into its payload and destroyed exactly
/// once, by `drop_in_place` at the moment the memory is returned.
#[repr(C)]
pub(crate) struct Node {
    pub(crate) lock: Mutex<NodeInner>,
}

impl Node {
    fn new(data: u16, next: Option<PoolPtr>) -> Self {
        Self {
            lock: Mutex::new(NodeInner { data, next }),
        }
    }
}

// Pool payloads are ALIGNMENT-aligned; the node must not need more.
const _: () = assert!(mem::align_of::<Node>() <= ALIGNMENT);

// ============================================================================
//  Public handle types
// ============================================================================

/// Opaque reference to a list node.
///
/// Carries no liveness guarantee; see the module docs on stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef(pub(crate) PoolPtr);

/// Policy for what [`ConcurrentList::cleanup`] does to the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolTeardown {
    /// Leave the pool initialized; its owner controls its lifetime.
    #[default]
    Keep,

    /// Deinitialize the pool once the chain is fully freed. For owners that
    /// couple list and pool lifecycles.
    DeinitOnCleanup,
}

// ============================================================================
//  ConcurrentList
// ============================================================================

/// A thread-safe singly linked list of `u16` values allocated from a [`Pool`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use poolchain::{ConcurrentList, Pool};
///
/// let pool = Arc::new(Pool::new(4096));
/// let list = ConcurrentList::new(pool);
///
/// list.insert(5).unwrap();
/// list.insert(7).unwrap();
/// assert_eq!(list.render(), "[5, 7]");
///
/// assert!(list.delete(5));
/// assert_eq!(list.render(), "[7]");
/// ```
pub struct ConcurrentList {
    pool: Arc<Pool>,

    /// The head lock: guards the head handle itself. Taken before any node
    /// lock, released as soon as the first node's lock is held.
    head: Mutex<Option<PoolPtr>>,

    teardown: PoolTeardown,

    /// Iteration bound applied to every traversal; [`TRAVERSAL_CEILING`]
    /// unless narrowed for tests.
    ceiling: usize,

    /// Traversal-ceiling trips (cycle / unbounded chain diagnostics).
    cycle_guard: AtomicU64,
}

impl ConcurrentList {
    /// Create an empty list drawing nodes from `pool`, keeping the pool
    /// alive on cleanup.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self::with_teardown(pool, PoolTeardown::Keep)
    }

    /// Create an empty list with an explicit pool teardown policy.
    #[must_use]
    pub fn with_teardown(pool: Arc<Pool>, teardown: PoolTeardown) -> Self {
        Self {
            pool,
            head: Mutex::new(None),
            teardown,
            ceiling: TRAVERSAL_CEILING,
            cycle_guard: AtomicU64::new(0),
        }
    }

    /// Narrow the traversal ceiling so tests can exercise the cycle guard
    /// without building million-node chains.
    #[cfg(test)]
    fn set_traversal_ceiling(&mut self, ceiling: usize) {
        self.ceiling = ceiling;
    }

    /// Reset the list to empty, ensuring the pool is usable.
    ///
    /// If the list has content, a full [`cleanup`](Self::cleanup) runs first.
    /// An uninitialized pool is initialized with [`DEFAULT_POOL_CAPACITY`];
    /// owners normally size the pool explicitly before building the list.
    pub fn init(&self) {
        if !self.is_empty() {
            self.cleanup();
        }
        self.pool.ensure_init(DEFAULT_POOL_CAPACITY);
    }

    /// Whether the list currently has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.lock().is_none()
    }

    /// The pool this list allocates from.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Number of times a traversal hit the iteration ceiling
    /// ([`TRAVERSAL_CEILING`] by default).
    #[must_use]
    pub fn cycle_guard_trips(&self) -> u64 {
        self.cycle_guard.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    //  Node plumbing
    // ------------------------------------------------------------------------

    /// Resolve a handle to its node. `None` if the pool no longer backs it.
    fn node(&self, ptr: PoolPtr) -> Option<&Node> {
        let raw = self.pool.payload_raw(ptr)?;
        // SAFETY: Every handle reaching this point was produced by
        // `alloc_node`, which wrote a valid `Node` into an ALIGNMENT-aligned
        // payload of sufficient size; the node stays live until `free_node`,
        // which the locking discipline orders after all accesses.
        Some(unsafe { raw.cast::<Node>().as_ref() })
    }

    /// Lock a node and return a cursor positioned on it.
    fn lock_node(&self, ptr: PoolPtr) -> Option<Cursor<'_>> {
        let node = self.node(ptr)?;
        Some(Cursor {
            ptr,
            guard: node.lock.lock(),
        })
    }

    /// Allocate a node from the pool and write it in place.
    fn alloc_node(&self, data: u16, next: Option<PoolPtr>) -> Result<PoolPtr, PoolError> {
        let ptr = self
            .pool
            .alloc(mem::size_of::<Node>())
            .ok_or(PoolError::OutOfMemory)?;
        let Some(raw) = self.pool.payload_raw(ptr) else {
            self.pool.free(ptr);
            return Err(PoolError::Corruption);
        };
        // SAFETY: The payload is freshly allocated, ALIGNMENT-aligned, at
        // least `size_of::<Node>()` bytes, and exclusively ours until linked.
        unsafe { raw.cast::<Node>().as_ptr().write(Node::new(data, next)) };
        trace_log!(offset = ptr.offset(), data, "node allocated");
        Ok(ptr)
    }

    /// Destroy a node's lock and return its memory to the pool.
    ///
    /// Caller must guarantee the node is unlinked and no thread holds or is
    /// waiting on its lock (see the module docs).
    fn free_node(&self, ptr: PoolPtr) {
        if let Some(raw) = self.pool.payload_raw(ptr) {
            // SAFETY: The node was written by `alloc_node` and is unlinked;
            // this is the single point where its lock is destroyed.
            unsafe { raw.cast::<Node>().as_ptr().drop_in_place() };
        }
        self.pool.free(ptr);
        trace_log!(offset = ptr.offset(), "node freed");
    }

    /// Rewrite an *unlinked* node's next handle. The node is unshared, so
    /// the lock acquisition cannot contend.
    fn set_node_next(&self, ptr: PoolPtr, next: Option<PoolPtr>) {
        if let Some(node) = self.node(ptr) {
            node.lock.lock().next = next;
        }
    }

    // ------------------------------------------------------------------------
    //  Insertion
    // ------------------------------------------------------------------------

    /// Append `data` at the tail.
    ///
    /// The node is allocated before any list lock is taken; on allocation
    /// failure the list is left unmodified. An empty list installs the node
    /// directly under the head lock; otherwise the head lock is swapped for
    /// the first node's lock and the walk proceeds hand-over-hand to the
    /// tail, where the node is linked under the last node's lock.
    ///
    /// # Errors
    ///
    /// [`PoolError::OutOfMemory`] when the pool cannot supply a node.
    pub fn insert(&self, data: u16) -> Result<(), PoolError> {
        let new_ptr = self.alloc_node(data, None)?;

        let mut head = self.head.lock();
        let Some(first) = *head else {
            *head = Some(new_ptr);
            return Ok(());
        };
        let Some(mut cur) = self.lock_node(first) else {
            drop(head);
            self.free_node(new_ptr);
            error_log!("head handle no longer resolves; insert abandoned");
            return Err(PoolError::Corruption);
        };
        drop(head);

        loop {
            match cur.step(self) {
                Step::Forward(c) => cur = c,
                Step::Tail(mut tail) => {
                    tail.guard.next = Some(new_ptr);
                    return Ok(());
                }
                Step::Detached => {
                    self.free_node(new_ptr);
                    error_log!("chain detached mid-walk; insert abandoned");
                    return Err(PoolError::Corruption);
                }
            }
        }
    }

    /// Insert `data` immediately after `prev`, without walking the list.
    ///
    /// Takes no head lock, so it runs concurrently with traversals elsewhere
    /// in the chain. The caller must ensure `prev` is still linked; prefer
    /// [`SearchGuard::insert_after`], which proves that by construction.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidPointer`] if `prev` does not resolve;
    /// [`PoolError::OutOfMemory`] when the pool cannot supply a node.
    pub fn insert_after(&self, prev: NodeRef, data: u16) -> Result<(), PoolError> {
        let Some(node) = self.node(prev.0) else {
            warn_log!("insert_after on dead node handle ignored");
            return Err(PoolError::InvalidPointer);
        };
        let new_ptr = self.alloc_node(data, None)?;

        let mut guard = node.lock.lock();
        self.set_node_next(new_ptr, guard.next);
        guard.next = Some(new_ptr);
        Ok(())
    }

    /// Insert `data` immediately before the node `target`.
    ///
    /// Links are forward-only, so this walks to `target`'s predecessor under
    /// lock coupling. If `target` is the current head the new node becomes
    /// the head directly under the head lock. Returns `Ok(false)` when
    /// `target` is not found; the pre-allocated node is then returned to the
    /// pool, leaving the pool's free-byte count unchanged.
    ///
    /// # Errors
    ///
    /// [`PoolError::OutOfMemory`] when the pool cannot supply a node.
    pub fn insert_before(&self, target: NodeRef, data: u16) -> Result<bool, PoolError> {
        let new_ptr = self.alloc_node(data, None)?;

        let mut head = self.head.lock();
        let Some(first) = *head else {
            drop(head);
            self.free_node(new_ptr);
            return Ok(false);
        };
        if first == target.0 {
            self.set_node_next(new_ptr, Some(first));
            *head = Some(new_ptr);
            return Ok(true);
        }
        let Some(mut prev) = self.lock_node(first) else {
            drop(head);
            self.free_node(new_ptr);
            error_log!("head handle no longer resolves; insert_before abandoned");
            return Err(PoolError::Corruption);
        };
        drop(head);

        loop {
            match prev.guard.next {
                Some(next) if next == target.0 => {
                    self.set_node_next(new_ptr, Some(next));
                    prev.guard.next = Some(new_ptr);
                    return Ok(true);
                }
                Some(_) => match prev.step(self) {
                    Step::Forward(c) => prev = c,
                    Step::Tail(_) | Step::Detached => {
                        self.free_node(new_ptr);
                        return Ok(false);
                    }
                },
                None => {
                    drop(prev);
                    self.free_node(new_ptr);
                    return Ok(false);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    //  Deletion
    // ------------------------------------------------------------------------

    /// Unlink and free the first node whose value equals `data`.
    ///
    /// Returns `false` if the list is empty or the value is absent. The walk
    /// holds (predecessor, candidate) lock pairs, so the unlink happens with
    /// both neighbors pinned; the node's lock is destroyed and its memory
    /// returned while the predecessor is still held (see module docs).
    pub fn delete(&self, data: u16) -> bool {
        let mut head = self.head.lock();
        let Some(first) = *head else {
            return false;
        };
        let Some(first_cur) = self.lock_node(first) else {
            return false;
        };

        if first_cur.guard.data == data {
            *head = first_cur.guard.next;
            drop(head);
            drop(first_cur);
            self.free_node(first);
            return true;
        }
        drop(head);

        let mut prev = first_cur;
        loop {
            let Some(next) = prev.guard.next else {
                return false;
            };
            let Some(node) = self.node(next) else {
                error_log!("chain detached mid-walk; delete abandoned");
                return false;
            };

            let curr_guard = node.lock.lock();
            if curr_guard.data == data {
                prev.guard.next = curr_guard.next;
                drop(curr_guard);
                // Predecessor still locked: nobody can reach `next` anymore.
                self.free_node(next);
                return true;
            }
            prev = Cursor {
                ptr: next,
                guard: curr_guard,
            };
        }
    }

    /// Detach the whole chain, then free every node outside the head lock.
    ///
    /// Under [`PoolTeardown::DeinitOnCleanup`] the pool is deinitialized once
    /// the chain is fully freed.
    pub fn cleanup(&self) {
        let mut cur: Option<PoolPtr> = self.head.lock().take();

        let mut visited: usize = 0;
        while let Some(ptr) = cur {
            visited += 1;
            if visited > self.ceiling {
                self.cycle_guard.fetch_add(1, Ordering::Relaxed);
                warn_log!(visited, "traversal ceiling hit; abandoning cleanup walk");
                break;
            }
            cur = self.node(ptr).and_then(|n| n.lock.lock().next);
            self.free_node(ptr);
        }

        if self.teardown == PoolTeardown::DeinitOnCleanup {
            self.pool.deinit();
        }
    }

    // ------------------------------------------------------------------------
    //  Queries
    // ------------------------------------------------------------------------

    /// Find the first node whose value equals `data`.
    ///
    /// The returned [`SearchGuard`] holds the node's lock; the node cannot be
    /// deleted or mutated by other threads until the guard drops. Do not call
    /// whole-list operations on the same thread while holding a guard - they
    /// traverse from the head and would block on it.
    #[must_use]
    pub fn search(&self, data: u16) -> Option<SearchGuard<'_>> {
        let head = self.head.lock();
        let first = (*head)?;
        let mut cur = self.lock_node(first)?;
        drop(head);

        loop {
            if cur.guard.data == data {
                return Some(SearchGuard {
                    list: self,
                    cursor: cur,
                });
            }
            match cur.step(self) {
                Step::Forward(c) => cur = c,
                Step::Tail(_) | Step::Detached => return None,
            }
        }
    }

    /// Count the nodes in the chain.
    ///
    /// Bounded by [`TRAVERSAL_CEILING`]: a cyclic or unbounded chain stops
    /// there, records a diagnostic, and the partial count is returned rather
    /// than hanging indefinitely.
    #[must_use]
    pub fn count_nodes(&self) -> usize {
        let head = self.head.lock();
        let Some(first) = *head else {
            return 0;
        };
        let Some(mut cur) = self.lock_node(first) else {
            return 0;
        };
        drop(head);

        let mut count: usize = 1;
        loop {
            match cur.step(self) {
                Step::Forward(c) => {
                    cur = c;
                    count += 1;
                    // Trips only when more chain remains past the ceiling: a
                    // list of exactly ceiling nodes counts cleanly.
                    if count >= self.ceiling && cur.guard.next.is_some() {
                        self.cycle_guard.fetch_add(1, Ordering::Relaxed);
                        warn_log!(count, "traversal ceiling hit; returning partial count");
                        return count;
                    }
                }
                Step::Tail(_) | Step::Detached => return count,
            }
        }
    }

    /// Render the whole list, e.g. `[5, 7]`. An empty list renders as `[]`.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_range(None, None)
    }

    /// Render node values from `start` (default: head) through the inclusive
    /// `end` (default: tail).
    ///
    /// A `start` that never appears in the chain yields `[]`. Values are read
    /// under each node's lock during a coupled walk, bounded by
    /// [`TRAVERSAL_CEILING`].
    #[must_use]
    pub fn render_range(&self, start: Option<NodeRef>, end: Option<NodeRef>) -> String {
        let head = self.head.lock();
        let Some(first) = *head else {
            return String::from("[]");
        };
        let Some(mut cur) = self.lock_node(first) else {
            return String::from("[]");
        };
        drop(head);

        let mut out = String::from("[");
        let mut started: bool = start.is_none();
        let mut first_item: bool = true;
        let mut visited: usize = 0;

        loop {
            visited += 1;
            if visited > self.ceiling {
                self.cycle_guard.fetch_add(1, Ordering::Relaxed);
                warn_log!(visited, "traversal ceiling hit; truncating rendering");
                break;
            }

            if !started && start.is_some_and(|s| s.0 == cur.ptr) {
                started = true;
            }
            if started {
                if !first_item {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}", cur.guard.data);
                first_item = false;
            }
            if end.is_some_and(|e| e.0 == cur.ptr) {
                break;
            }
            match cur.step(self) {
                Step::Forward(c) => cur = c,
                Step::Tail(_) | Step::Detached => break,
            }
        }

        out.push(']');
        out
    }
}

impl Drop for ConcurrentList {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl fmt::Debug for ConcurrentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentList")
            .field("is_empty", &self.is_empty())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  SearchGuard
// ============================================================================

/// Scoped result of [`ConcurrentList::search`].
///
/// Holds the found node's lock: the node cannot be deleted or mutated by
/// other threads while the guard lives, and the lock is released
/// automatically on drop (panic-safe). This closes the "caller must unlock
/// later" hazard by enforcing the release in the type.
#[must_use = "dropping the guard immediately releases the node lock"]
pub struct SearchGuard<'l> {
    list: &'l ConcurrentList,
    cursor: Cursor<'l>,
}

impl SearchGuard<'_> {
    /// The found node's value.
    #[must_use]
    pub fn value(&self) -> u16 {
        self.cursor.guard.data
    }

    /// Overwrite the found node's value, under the held lock.
    pub fn set_value(&mut self, data: u16) {
        self.cursor.guard.data = data;
    }

    /// Handle of the found node, e.g. for a later
    /// [`ConcurrentList::insert_before`]. The handle carries no liveness
    /// guarantee once the guard drops.
    #[must_use]
    pub fn node_ref(&self) -> NodeRef {
        NodeRef(self.cursor.ptr)
    }

    /// Insert `data` immediately after the found node, splicing under the
    /// lock this guard already holds. This is the race-free form of
    /// [`ConcurrentList::insert_after`]: the held lock proves the node is
    /// still linked.
    ///
    /// # Errors
    ///
    /// [`PoolError::OutOfMemory`] when the pool cannot supply a node.
    pub fn insert_after(&mut self, data: u16) -> Result<(), PoolError> {
        let new_ptr = self.list.alloc_node(data, self.cursor.guard.next)?;
        self.cursor.guard.next = Some(new_ptr);
        Ok(())
    }
}

impl fmt::Debug for SearchGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchGuard")
            .field("value", &self.value())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================
