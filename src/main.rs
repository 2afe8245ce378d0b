//! Demo driver for the pool allocator and the concurrent list.
//!
//! Exercises the allocator's reuse-after-free layout, the basic list
//! scenario, and a multi-threaded insert storm, printing results as it goes.
//!
//! Run with:
//! ```bash
//! RUST_LOG=poolchain=debug cargo run --features tracing
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;
use std::thread;

use poolchain::{ConcurrentList, Pool, HEADER_SIZE};

#[cfg(feature = "tracing")]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_thread_ids(true)
        .compact()
        .init();
}

#[cfg(not(feature = "tracing"))]
fn init_tracing() {}

fn allocator_demo() {
    println!("=== allocator: reuse after free ===");
    let pool = Pool::new(1024);
    let p1 = pool.alloc(64).unwrap();
    let p2 = pool.alloc(64).unwrap();
    println!("p1 @ {:#06x}, p2 @ {:#06x}", p1.offset(), p2.offset());

    pool.free(p1);
    let p3 = pool.alloc(32).unwrap();
    println!("freed p1, p3 @ {:#06x}", p3.offset());
    assert!(p3.offset() >= p1.offset() && p3.offset() < p1.offset() + 64);
    println!(
        "p3 reuses p1's region; free bytes {} of {}, {} blocks",
        pool.free_bytes(),
        pool.capacity(),
        pool.block_count()
    );

    pool.free(p2);
    pool.free(p3);
    pool.free(p3); // double free: counted, ignored
    println!(
        "after teardown: free bytes {}, diagnostics {:?}",
        pool.free_bytes(),
        pool.diagnostics()
    );
    println!("header overhead per block: {HEADER_SIZE} bytes\n");
}

fn list_demo() {
    println!("=== list: insert / delete / render ===");
    let pool = Arc::new(Pool::new(4096));
    let list = ConcurrentList::new(Arc::clone(&pool));

    list.insert(5).unwrap();
    list.insert(7).unwrap();
    println!("after inserts: {}", list.render());
    assert_eq!(list.render(), "[5, 7]");

    list.delete(5);
    println!("after delete(5): {}", list.render());
    assert_eq!(list.render(), "[7]");

    list.cleanup();
    println!(
        "after cleanup: {} (pool free bytes {})\n",
        list.render(),
        pool.free_bytes()
    );
}

fn concurrent_demo() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 500;

    println!("=== list: {THREADS} threads x {PER_THREAD} inserts ===");
    let pool = Arc::new(Pool::new(1 << 20));
    let list = Arc::new(ConcurrentList::new(pool));

    let handles: Vec<_> = (0..THREADS)
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

    let count = list.count_nodes();
    println!(
        "final count: {count} (expected {}), ceiling trips: {}",
        THREADS * PER_THREAD,
        list.cycle_guard_trips()
    );
    assert_eq!(count, THREADS * PER_THREAD);
}

fn main() {
    init_tracing();
    allocator_demo();
    list_demo();
    concurrent_demo();
    println!("all scenarios passed");
}
