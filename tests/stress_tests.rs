//! Concurrency stress tests for the lock-coupled list.
//!
//! These drive many threads through the structural operations and verify
//! exact final state: no duplicated node, no lost node, all pool memory
//! accounted for.
//!
//! Run with:
//! ```bash
//! cargo test --test stress_tests --release
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use poolchain::{ConcurrentList, Pool};

/// Parse a rendering like `[5, 7]` back into values.
fn rendered_values(list: &ConcurrentList) -> Vec<u16> {
    let s = list.render();
    let body = s.trim_start_matches('[').trim_end_matches(']');
    if body.is_empty() {
        return Vec::new();
    }
    body.split(", ").map(|v| v.parse().unwrap()).collect()
}

// =============================================================================
// Concurrent inserts
// =============================================================================

#[test]
fn concurrent_inserts_4_threads_exact_count() {
    common::init_tracing();

    const NUM_THREADS: usize = 4;
    const PER_THREAD: usize = 500;

    let pool = Arc::new(Pool::new(1 << 20));
    let list = Arc::new(ConcurrentList::new(Arc::clone(&pool)));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let value = (t * PER_THREAD + i) as u16;
                    list.insert(value).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.count_nodes(), NUM_THREADS * PER_THREAD);

    // Every inserted value appears exactly once in a final traversal.
    let values = rendered_values(&list);
    assert_eq!(values.len(), NUM_THREADS * PER_THREAD);
    let unique: HashSet<u16> = values.iter().copied().collect();
    assert_eq!(unique.len(), NUM_THREADS * PER_THREAD, "duplicated node");
    for v in 0..(NUM_THREADS * PER_THREAD) as u16 {
        assert!(unique.contains(&v), "lost value {v}");
    }

    list.cleanup();
    assert_eq!(pool.free_bytes(), pool.capacity());
}

#[test]
fn concurrent_inserts_8_threads_exact_count() {
    common::init_tracing();

    const NUM_THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let list = Arc::new(ConcurrentList::new(Arc::new(Pool::new(1 << 20))));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    list.insert((t * PER_THREAD + i) as u16).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.count_nodes(), NUM_THREADS * PER_THREAD);
    assert_eq!(list.cycle_guard_trips(), 0);
}

// =============================================================================
// Insert/delete churn
// =============================================================================

#[test]
fn insert_delete_churn_drains_to_empty() {
    common::init_tracing();

    const NUM_THREADS: usize = 4;
    const ITERATIONS: usize = 200;

    let pool = Arc::new(Pool::new(1 << 20));
    let list = Arc::new(ConcurrentList::new(Arc::clone(&pool)));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    let value = (t * ITERATIONS + i) as u16;
                    list.insert(value).unwrap();
                    assert!(list.delete(value), "own value {value} disappeared");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.count_nodes(), 0);
    assert!(list.is_empty());
    // Every node's memory made it back to the pool.
    assert_eq!(pool.free_bytes(), pool.capacity());
    assert!(pool.verify_integrity());
}

#[test]
fn deletes_race_against_inserts() {
    common::init_tracing();

    const WRITERS: usize = 2;
    const PER_WRITER: usize = 300;

    let list = Arc::new(ConcurrentList::new(Arc::new(Pool::new(1 << 20))));

    // Writers insert disjoint ranges; a deleter chases one writer's range.
    let mut handles = Vec::new();
    for t in 0..WRITERS {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            for i in 0..PER_WRITER {
                list.insert((t * PER_WRITER + i) as u16).unwrap();
            }
        }));
    }
    {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            // Delete writer 0's values until all are gone; retry misses
            // because the deleter can outrun the writer.
            for i in 0..PER_WRITER {
                let value = i as u16;
                while !list.delete(value) {
                    thread::yield_now();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Writer 0's range fully deleted, writer 1's fully present.
    let values = rendered_values(&list);
    assert_eq!(values.len(), PER_WRITER);
    let unique: HashSet<u16> = values.iter().copied().collect();
    for v in 0..PER_WRITER as u16 {
        assert!(!unique.contains(&v), "value {v} should have been deleted");
        assert!(
            unique.contains(&(v + PER_WRITER as u16)),
            "value {} lost",
            v + PER_WRITER as u16
        );
    }
}

// =============================================================================
// Readers during writes
// =============================================================================

#[test]
fn searches_and_counts_race_against_inserts() {
    common::init_tracing();

    const PER_WRITER: usize = 400;

    let list = Arc::new(ConcurrentList::new(Arc::new(Pool::new(1 << 20))));

    let writer = {
        let list = Arc::clone(&list);
        thread::spawn(move || {
            for i in 0..PER_WRITER {
                list.insert(i as u16).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                let mut last_count = 0usize;
                while last_count < PER_WRITER {
                    let count = list.count_nodes();
                    // Counts only grow while no deletes run.
                    assert!(count >= last_count, "count went backwards");
                    last_count = count;
                    if let Some(guard) = list.search((count / 2) as u16) {
                        assert_eq!(usize::from(guard.value()), count / 2);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(list.count_nodes(), PER_WRITER);
}

// =============================================================================
// Guard-based splices
// =============================================================================

#[test]
fn guard_splices_race_without_loss() {
    common::init_tracing();

    const PIVOTS: u16 = 8;
    const NUM_THREADS: usize = 4;
    const SPLICES: usize = 50;

    let list = Arc::new(ConcurrentList::new(Arc::new(Pool::new(1 << 20))));
    for v in 0..PIVOTS {
        list.insert(v).unwrap();
    }

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for i in 0..SPLICES {
                    let pivot = ((t + i) % PIVOTS as usize) as u16;
                    let mut guard = list.search(pivot).unwrap();
                    guard.insert_after(1000 + (t * SPLICES + i) as u16).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let expected = PIVOTS as usize + NUM_THREADS * SPLICES;
    assert_eq!(list.count_nodes(), expected);

    let values = rendered_values(&list);
    let unique: HashSet<u16> = values.iter().copied().collect();
    assert_eq!(unique.len(), expected, "spliced node lost or duplicated");
}
