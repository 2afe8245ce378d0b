//! # `poolchain`
//!
//! A fixed-capacity pool allocator and a concurrent singly linked list whose
//! nodes live entirely inside that pool.
//!
//! The two pieces form one core: the list's correctness depends on the
//! allocator's contracts (no overlapping blocks, safe reuse after free), and
//! the list's concurrency strategy - hand-over-hand node locking - is the
//! genuinely hard part.
//!
//! | Component | Strategy |
//! |-----------|----------|
//! | [`Pool`] | first-fit over a free list, block splitting, full neighbor coalescing on free, realloc-style resize |
//! | [`ConcurrentList`] | head lock + per-node locks, lock-coupled traversal, scoped [`SearchGuard`] results |
//!
//! ## Thread Safety
//!
//! `Pool` serializes everything behind one mutex. `ConcurrentList` allows
//! structurally disjoint operations to proceed concurrently: an
//! `insert_after` deep in the chain does not block a delete at the head.
//! The standing lock order - head lock before node locks, successor before
//! releasing predecessor, pool lock last - makes deadlock impossible by
//! construction.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use poolchain::{ConcurrentList, Pool};
//!
//! let pool = Arc::new(Pool::new(64 * 1024));
//! let list = Arc::new(ConcurrentList::new(pool));
//!
//! let handles: Vec<_> = (0..4u16)
//!     .map(|t| {
//!         let list = Arc::clone(&list);
//!         thread::spawn(move || {
//!             for i in 0..50u16 {
//!                 list.insert(t * 100 + i).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(list.count_nodes(), 200);
//! ```
//!
//! ## Failure Model
//!
//! Nothing panics in non-test code. Allocation failure is a `None`/`Err` the
//! caller must check; bad pointers, double frees, corrupt block tables, and
//! runaway traversals are counted, logged (with the `tracing` feature), and
//! recovered locally. See [`PoolDiagnostics`].

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Traversal and splitting hot paths benefit from explicit inlining.
#![allow(clippy::inline_always)]

pub mod list;
pub mod pool;

pub(crate) mod tracing_helpers;

pub use list::{
    ConcurrentList, NodeRef, PoolTeardown, SearchGuard, DEFAULT_POOL_CAPACITY, TRAVERSAL_CEILING,
};
pub use pool::{Pool, PoolDiagnostics, PoolError, PoolPtr, ALIGNMENT, HEADER_SIZE};
