//! Filepath: src/pool.rs
//!
//! Fixed-capacity pool allocator.
//!
//! A [`Pool`] owns one contiguous byte buffer and serves variable-size
//! allocations from it: first-fit over a free list, block splitting, and a
//! full coalesce pass on every free. Block metadata lives in a side table
//! keyed by integer offset into the buffer, so the only raw-pointer code is
//! the narrow region that translates an offset into a real address.
//!
//! # Concurrency Model
//!
//! One `parking_lot::Mutex` guards all pool state. Every `alloc`/`free`/
//! `resize`/`init`/`deinit` is fully serialized with respect to every other.
//! This is an intentional scalability ceiling: the pool is small relative to
//! typical workloads, and the coalesce pass must never run concurrently with
//! another mutation.
//!
//! The pool lock is a leaf lock: no pool code ever acquires another lock
//! while holding it, so callers may call into the pool while holding locks
//! of their own.
//!
//! # Failure Behavior
//!
//! Nothing here panics or aborts. Allocation failure returns `None`; a bad
//! pointer, a double free, or a corrupt block table is counted, logged at
//! WARN/ERROR (with the `tracing` feature), and ignored. See
//! [`Pool::diagnostics`].

use std::alloc::Layout;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::tracing_helpers::{error_log, trace_log, warn_log};

// ============================================================================
//  Constants
// ============================================================================

/// Alignment of every block offset and payload, in bytes.
pub const ALIGNMENT: usize = 8;

/// Per-block accounting overhead, in bytes.
///
/// Every block reserves this many bytes ahead of its payload. Block
/// descriptors live in a side table rather than in the buffer itself, but the
/// reservation keeps the size arithmetic of an intrusive-header layout:
/// `block.size` always covers header plus payload, payload offsets are never
/// zero, and the sum of all block sizes equals the pool capacity.
pub const HEADER_SIZE: usize = 24;

/// Round `n` up to the next multiple of [`ALIGNMENT`].
#[inline(always)]
const fn align_up(n: usize) -> usize {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// [`align_up`] for untrusted request sizes: `None` when the rounding would
/// overflow. Such a request can never fit any pool, so callers treat it as
/// out of memory rather than panicking or wrapping to a tiny size.
#[inline(always)]
const fn checked_align_up(n: usize) -> Option<usize> {
    match n.checked_add(ALIGNMENT - 1) {
        Some(bumped) => Some(bumped & !(ALIGNMENT - 1)),
        None => None,
    }
}

// ============================================================================
//  PoolError
// ============================================================================

/// Failure categories reported by pool operations.
///
/// Every one of these is recovered locally; none aborts the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No free block large enough to satisfy the request.
    OutOfMemory,

    /// A required argument was absent or out of range (e.g. a payload copy
    /// larger than the block's usable bytes).
    InvalidArgument,

    /// The handle does not name a live block of this pool.
    InvalidPointer,

    /// The block behind the handle is already free.
    DoubleFree,

    /// The block table describes an impossible layout (zero-size block or an
    /// extent crossing the pool end).
    Corruption,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of pool memory"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::InvalidPointer => f.write_str("pointer outside pool"),
            Self::DoubleFree => f.write_str("double free"),
            Self::Corruption => f.write_str("pool corruption"),
        }
    }
}

impl std::error::Error for PoolError {}

// ============================================================================
//  PoolPtr
// ============================================================================

/// Opaque handle to an allocated payload region.
///
/// Internally this is the payload's byte offset from the pool base. Offsets
/// are always at least [`HEADER_SIZE`], so `Option<PoolPtr>` is the same size
/// as `PoolPtr` (niche optimization).
///
/// A `PoolPtr` stays valid until it is freed (directly, or by a `resize` that
/// moved the block, or by `deinit`). Using a stale handle is detected
/// best-effort and reported as [`PoolError::InvalidPointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolPtr(NonZeroUsize);

impl PoolPtr {
    /// The payload's byte offset from the pool base.
    ///
    /// Exposed for layout assertions in tests and drivers; there is no way to
    /// turn an offset back into a handle.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0.get()
    }

    /// Offset of the block owning this payload.
    #[inline]
    const fn block_offset(self) -> usize {
        self.0.get() - HEADER_SIZE
    }
}

// ============================================================================
//  Block table
// ============================================================================

/// Descriptor for one block. Blocks tile the buffer: for consecutive table
/// entries, `offset + size == next_offset`, and the last block ends at
/// `capacity`.
#[derive(Debug, Clone, Copy)]
struct Block {
    /// Total bytes spanned by the block, header accounting included.
    /// Always a multiple of [`ALIGNMENT`].
    size: usize,

    /// Whether the block is on the free list.
    free: bool,
}

/// All mutable pool state, guarded by the single pool mutex.
struct PoolInner {
    /// Base address of the buffer; `None` while uninitialized.
    base: Option<NonNull<u8>>,

    /// Buffer length in bytes. Zero while uninitialized.
    capacity: usize,

    /// Block descriptors keyed by block offset. Iteration order is physical
    /// address order.
    blocks: BTreeMap<usize, Block>,

    /// Offsets of free blocks, in free-list order (not necessarily address
    /// order between coalesce passes).
    free_list: Vec<usize>,
}

impl PoolInner {
    const fn empty() -> Self {
        Self {
            base: None,
            capacity: 0,
            blocks: BTreeMap::new(),
            free_list: Vec::new(),
        }
    }

    /// Release the buffer and reset to the uninitialized state. Idempotent.
    fn release(&mut self) {
        if let Some(base) = self.base.take() {
            // SAFETY: `base` was returned by `std::alloc::alloc` with exactly
            // this layout in `init_locked`, and `take()` ensures it is
            // deallocated exactly once.
            unsafe {
                if let Ok(layout) = Layout::from_size_align(self.capacity, ALIGNMENT) {
                    std::alloc::dealloc(base.as_ptr(), layout);
                }
            }
        }
        self.capacity = 0;
        self.blocks.clear();
        self.free_list.clear();
    }

    /// Install a fresh buffer of `capacity` bytes with one spanning free
    /// block. Releases any existing buffer first.
    fn init_locked(&mut self, capacity: usize) {
        self.release();

        let capacity: usize = align_up(capacity.max(1));
        let Ok(layout) = Layout::from_size_align(capacity, ALIGNMENT) else {
            error_log!(capacity, "pool init failed: invalid layout");
            return;
        };

        // SAFETY: `layout` has nonzero size (capacity >= ALIGNMENT after
        // rounding) and a valid power-of-two alignment.
        let raw: *mut u8 = unsafe { std::alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            error_log!(capacity, "pool init failed: system allocation failed");
            return;
        };

        self.base = Some(base);
        self.capacity = capacity;
        self.blocks.insert(
            0,
            Block {
                size: capacity,
                free: true,
            },
        );
        self.free_list.push(0);
    }

    /// Merge physically adjacent free blocks and rebuild the free list in
    /// address order.
    ///
    /// Runs under the pool lock, so it is never concurrent with an alloc or
    /// another free. Aborts early with a diagnostic if the table describes an
    /// impossible block rather than walking past the pool end.
    fn coalesce(&mut self, counters: &PoolCounters) {
        self.free_list.clear();

        let offsets: Vec<usize> = self.blocks.keys().copied().collect();
        let mut prev_free: Option<usize> = None;

        for off in offsets {
            let Some(block) = self.blocks.get(&off).copied() else {
                // Removed by an earlier merge in this pass.
                continue;
            };

            if block.size == 0 || off + block.size > self.capacity {
                counters.corruption.fetch_add(1, Ordering::Relaxed);
                error_log!(
                    offset = off,
                    size = block.size,
                    capacity = self.capacity,
                    "pool corruption detected; aborting coalesce pass"
                );
                break;
            }

            if !block.free {
                continue;
            }

            // Merge into the trailing free block when address-adjacent.
            let adjacent: Option<usize> = prev_free.filter(|&p| {
                self.blocks
                    .get(&p)
                    .is_some_and(|prev| p + prev.size == off)
            });

            if let Some(p) = adjacent {
                if let Some(prev) = self.blocks.get_mut(&p) {
                    prev.size += block.size;
                }
                self.blocks.remove(&off);
            } else {
                self.free_list.push(off);
                prev_free = Some(off);
            }
        }
    }

    /// Total bytes held by free blocks, header accounting included.
    fn free_bytes(&self) -> usize {
        self.blocks
            .values()
            .filter(|b| b.free)
            .map(|b| b.size)
            .sum()
    }

    /// Translate a payload handle into its address, if the handle names a
    /// live (used) block. Returns the address and the usable payload length.
    fn used_payload(&self, ptr: PoolPtr) -> Option<(NonNull<u8>, usize)> {
        let base: NonNull<u8> = self.base?;
        if ptr.offset() >= self.capacity {
            return None;
        }
        let block: &Block = self.blocks.get(&ptr.block_offset())?;
        if block.free {
            return None;
        }
        // SAFETY: `ptr.offset() < capacity`, so the address stays inside the
        // one live buffer allocation.
        let addr: NonNull<u8> =
            unsafe { NonNull::new_unchecked(base.as_ptr().add(ptr.offset())) };
        Some((addr, block.size - HEADER_SIZE))
    }
}

// ============================================================================
//  Diagnostics
// ============================================================================

/// Relaxed atomic counters for recoverable failures.
///
/// Kept outside the pool mutex so snapshots never contend with allocation.
#[derive(Default)]
struct PoolCounters {
    oom: AtomicU64,
    invalid_pointer: AtomicU64,
    double_free: AtomicU64,
    corruption: AtomicU64,
}

/// Snapshot of the pool's diagnostic counters.
///
/// Counts are cumulative since construction or the last
/// [`Pool::reset_diagnostics`]. Tests assert on these instead of scraping log
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolDiagnostics {
    /// Allocations that found no fitting free block.
    pub oom: u64,
    /// Frees/resizes given a handle that names no live block.
    pub invalid_pointer: u64,
    /// Frees of an already-free block.
    pub double_free: u64,
    /// Coalesce passes aborted on an impossible block descriptor.
    pub corruption: u64,
}

// ============================================================================
//  Pool
// ============================================================================

/// A fixed-capacity allocator over one pre-reserved byte buffer.
///
/// # Example
///
/// ```rust
/// use poolchain::Pool;
///
/// let pool = Pool::new(1024);
/// let p = pool.alloc(64).unwrap();
/// assert!(pool.usable_size(p).unwrap() >= 64);
/// pool.free(p);
/// assert_eq!(pool.free_bytes(), pool.capacity());
/// ```
pub struct Pool {
    inner: Mutex<PoolInner>,
    counters: PoolCounters,
}

// SAFETY: All access to `PoolInner` (including the raw base pointer) goes
// through the pool mutex, and the buffer is exclusively owned by the pool.
// `NonNull<u8>` is only `!Send`/`!Sync` as a lint against unsynchronized
// sharing, which the mutex provides.
unsafe impl Send for Pool {}
// SAFETY: See `Send` above.
unsafe impl Sync for Pool {}

impl Default for Pool {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl Pool {
    /// Create an uninitialized pool. Every `alloc` fails until
    /// [`init`](Self::init) is called.
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self {
            inner: Mutex::new(PoolInner::empty()),
            counters: PoolCounters {
                oom: AtomicU64::new(0),
                invalid_pointer: AtomicU64::new(0),
                double_free: AtomicU64::new(0),
                corruption: AtomicU64::new(0),
            },
        }
    }

    /// Create a pool backed by `capacity` bytes (rounded up to
    /// [`ALIGNMENT`]; zero is treated as one byte).
    ///
    /// If the system allocation fails, the error is logged and the pool is
    /// left uninitialized; subsequent allocs return `None`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let pool = Self::uninitialized();
        pool.init(capacity);
        pool
    }

    /// (Re)initialize the pool with a fresh buffer of `capacity` bytes.
    ///
    /// Idempotent: an existing buffer is released first, invalidating every
    /// outstanding [`PoolPtr`].
    pub fn init(&self, capacity: usize) {
        self.inner.lock().init_locked(capacity);
    }

    /// Initialize only if the pool is currently uninitialized.
    ///
    /// Check and initialization happen under one lock acquisition, so
    /// concurrent first callers race safely.
    pub fn ensure_init(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        if inner.base.is_none() {
            inner.init_locked(capacity);
        }
    }

    /// Release the buffer and reset all pool state. Idempotent; safe to call
    /// on an already-uninitialized pool. Also runs on drop.
    pub fn deinit(&self) {
        self.inner.lock().release();
    }

    /// Allocate at least `size` usable bytes, 8-byte aligned.
    ///
    /// A zero `size` is treated as one byte. Returns `None` (and counts an
    /// OutOfMemory diagnostic) when no free block fits or the request is so
    /// large its size arithmetic would overflow; the caller must check before
    /// use.
    ///
    /// First-fit: the free list is scanned in free-list order and the first
    /// block whose total size covers the request wins. If the leftover after
    /// carving out the request is at least `HEADER_SIZE + ALIGNMENT`, the
    /// block is split and the remainder spliced into the free list in place
    /// of the original; otherwise the whole block is consumed.
    pub fn alloc(&self, size: usize) -> Option<PoolPtr> {
        let size: usize = size.max(1);
        // `HEADER_SIZE` is a multiple of `ALIGNMENT`, so the sum is already
        // aligned. A request so large the arithmetic overflows cannot fit.
        let Some(required) = checked_align_up(size).and_then(|p| p.checked_add(HEADER_SIZE))
        else {
            self.counters.oom.fetch_add(1, Ordering::Relaxed);
            warn_log!(size, "pool alloc failed: request size overflows");
            return None;
        };

        let mut guard = self.inner.lock();
        let inner: &mut PoolInner = &mut guard;

        let blocks = &inner.blocks;
        let found: Option<usize> = inner
            .free_list
            .iter()
            .position(|off| blocks.get(off).is_some_and(|b| b.free && b.size >= required));
        let Some(pos) = found else {
            self.counters.oom.fetch_add(1, Ordering::Relaxed);
            warn_log!(size, required, "pool alloc failed: no fitting free block");
            return None;
        };

        let off: usize = inner.free_list[pos];
        let block_size: usize = inner.blocks.get(&off).map_or(0, |b| b.size);
        let leftover: usize = block_size - required;

        if leftover >= HEADER_SIZE + ALIGNMENT {
            // Split: shrink the block to `required`, leave the remainder as
            // a new free block spliced into the free list in place.
            if let Some(block) = inner.blocks.get_mut(&off) {
                block.size = required;
                block.free = false;
            }
            let rem_off: usize = off + required;
            inner.blocks.insert(
                rem_off,
                Block {
                    size: leftover,
                    free: true,
                },
            );
            inner.free_list[pos] = rem_off;
        } else {
            // Consume the whole block.
            if let Some(block) = inner.blocks.get_mut(&off) {
                block.free = false;
            }
            inner.free_list.remove(pos);
        }

        trace_log!(offset = off, required, "pool alloc");
        NonZeroUsize::new(off + HEADER_SIZE).map(PoolPtr)
    }

    /// Return a payload to the pool.
    ///
    /// A handle that names no live block is reported as InvalidPointer and
    /// ignored; a second free of the same block is reported as DoubleFree and
    /// ignored. A successful free triggers a full coalesce pass.
    pub fn free(&self, ptr: PoolPtr) {
        let mut guard = self.inner.lock();
        let inner: &mut PoolInner = &mut guard;

        if ptr.offset() >= inner.capacity {
            self.counters.invalid_pointer.fetch_add(1, Ordering::Relaxed);
            warn_log!(offset = ptr.offset(), "free of pointer outside pool ignored");
            return;
        }

        match inner.blocks.get_mut(&ptr.block_offset()) {
            None => {
                self.counters.invalid_pointer.fetch_add(1, Ordering::Relaxed);
                warn_log!(offset = ptr.offset(), "free of unknown block ignored");
            }
            Some(block) if block.free => {
                self.counters.double_free.fetch_add(1, Ordering::Relaxed);
                warn_log!(offset = ptr.offset(), "double free ignored");
            }
            Some(block) => {
                block.free = true;
                inner.coalesce(&self.counters);
                trace_log!(offset = ptr.offset(), "pool free");
            }
        }
    }

    /// Free, treating `None` as a no-op.
    pub fn free_opt(&self, ptr: Option<PoolPtr>) {
        if let Some(ptr) = ptr {
            self.free(ptr);
        }
    }

    /// Resize a payload, realloc-style.
    ///
    /// - `ptr == None` behaves as [`alloc`](Self::alloc).
    /// - `size == 0` behaves as [`free`](Self::free) and returns `None`.
    /// - If the current block already accommodates the new requirement, the
    ///   same handle is returned unchanged (no in-place shrink).
    /// - Otherwise a new block is allocated, `min(old payload, size)` bytes
    ///   are copied, and the old block is freed.
    ///
    /// Returns `None` if the new allocation fails; the old block then remains
    /// valid and must still be freed by the caller. Resizing an already-freed
    /// block is reported as InvalidPointer and returns `None`.
    pub fn resize(&self, ptr: Option<PoolPtr>, size: usize) -> Option<PoolPtr> {
        let Some(old) = ptr else {
            return self.alloc(size);
        };
        if size == 0 {
            self.free(old);
            return None;
        }

        let old_payload: usize = {
            let inner = self.inner.lock();
            match inner.used_payload(old) {
                Some((_, usable)) => usable,
                None => {
                    self.counters.invalid_pointer.fetch_add(1, Ordering::Relaxed);
                    warn_log!(offset = old.offset(), "resize of dead block ignored");
                    return None;
                }
            }
        };

        // Already large enough: keep the block (may waste space). An
        // overflowing size falls through to the alloc, which rejects it.
        if checked_align_up(size).is_some_and(|aligned| aligned <= old_payload) {
            return Some(old);
        }

        let new: PoolPtr = self.alloc(size)?;
        let copy_len: usize = old_payload.min(size);

        {
            let inner = self.inner.lock();
            if let (Some((src, _)), Some((dst, _))) =
                (inner.used_payload(old), inner.used_payload(new))
            {
                // SAFETY: Both regions are live, disjoint blocks of the same
                // buffer; `copy_len` does not exceed either payload; the pool
                // lock excludes concurrent table mutation.
                unsafe {
                    std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), copy_len);
                }
            }
        }

        self.free(old);
        Some(new)
    }

    // ------------------------------------------------------------------------
    //  Payload access
    // ------------------------------------------------------------------------

    /// Copy `data` into the payload, starting at its first byte.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidPointer`] if `ptr` names no live block;
    /// [`PoolError::InvalidArgument`] if `data` exceeds the usable size.
    pub fn write_payload(&self, ptr: PoolPtr, data: &[u8]) -> Result<(), PoolError> {
        let inner = self.inner.lock();
        let Some((addr, usable)) = inner.used_payload(ptr) else {
            self.counters.invalid_pointer.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::InvalidPointer);
        };
        if data.len() > usable {
            return Err(PoolError::InvalidArgument);
        }
        // SAFETY: The destination is a live payload of at least `data.len()`
        // bytes, within the buffer; the pool lock excludes table mutation.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), addr.as_ptr(), data.len());
        }
        Ok(())
    }

    /// Copy the payload's first `dst.len()` bytes into `dst`.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidPointer`] if `ptr` names no live block;
    /// [`PoolError::InvalidArgument`] if `dst` exceeds the usable size.
    pub fn read_payload(&self, ptr: PoolPtr, dst: &mut [u8]) -> Result<(), PoolError> {
        let inner = self.inner.lock();
        let Some((addr, usable)) = inner.used_payload(ptr) else {
            self.counters.invalid_pointer.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::InvalidPointer);
        };
        if dst.len() > usable {
            return Err(PoolError::InvalidArgument);
        }
        // SAFETY: The source is a live payload of at least `dst.len()` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(addr.as_ptr(), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Raw address of a live payload, for in-place structured storage.
    ///
    /// Callers own the liveness argument: the address is valid only while the
    /// block stays allocated and the pool initialized.
    pub(crate) fn payload_raw(&self, ptr: PoolPtr) -> Option<NonNull<u8>> {
        self.inner.lock().used_payload(ptr).map(|(addr, _)| addr)
    }

    // ------------------------------------------------------------------------
    //  Introspection
    // ------------------------------------------------------------------------

    /// Whether a buffer is currently installed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().base.is_some()
    }

    /// Total buffer capacity in bytes (zero while uninitialized).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Total bytes held by free blocks, header accounting included.
    ///
    /// `free_bytes() + used_bytes() == capacity()` at all times.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.inner.lock().free_bytes()
    }

    /// Total bytes held by used blocks, header accounting included.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner.capacity - inner.free_bytes()
    }

    /// Number of blocks currently tiling the buffer.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Upper bound on the largest single allocation currently satisfiable.
    #[must_use]
    pub fn largest_free_payload(&self) -> usize {
        self.inner
            .lock()
            .blocks
            .values()
            .filter(|b| b.free)
            .map(|b| b.size.saturating_sub(HEADER_SIZE))
            .max()
            .unwrap_or(0)
    }

    /// Usable payload bytes behind a live handle.
    ///
    /// `None` if the handle names no live block (no diagnostic is counted;
    /// this is a query, not a mutation).
    #[must_use]
    pub fn usable_size(&self, ptr: PoolPtr) -> Option<usize> {
        self.inner.lock().used_payload(ptr).map(|(_, usable)| usable)
    }

    /// Snapshot the diagnostic counters.
    #[must_use]
    pub fn diagnostics(&self) -> PoolDiagnostics {
        PoolDiagnostics {
            oom: self.counters.oom.load(Ordering::Relaxed),
            invalid_pointer: self.counters.invalid_pointer.load(Ordering::Relaxed),
            double_free: self.counters.double_free.load(Ordering::Relaxed),
            corruption: self.counters.corruption.load(Ordering::Relaxed),
        }
    }

    /// Zero the diagnostic counters.
    pub fn reset_diagnostics(&self) {
        self.counters.oom.store(0, Ordering::Relaxed);
        self.counters.invalid_pointer.store(0, Ordering::Relaxed);
        self.counters.double_free.store(0, Ordering::Relaxed);
        self.counters.corruption.store(0, Ordering::Relaxed);
    }

    /// Verify structural invariants of the block table.
    ///
    /// Checks that blocks tile `[0, capacity)` with aligned offsets, that the
    /// free list names exactly the free blocks, and that no two free blocks
    /// are address-adjacent (the coalesce pass would have merged them).
    /// Intended for tests and debug assertions; an uninitialized pool is
    /// trivially valid.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        let inner = self.inner.lock();
        if inner.base.is_none() {
            return inner.blocks.is_empty() && inner.free_list.is_empty();
        }

        let mut expected: usize = 0;
        let mut free_blocks: usize = 0;
        let mut prev_was_free: bool = false;

        for (&off, block) in &inner.blocks {
            if off != expected || off % ALIGNMENT != 0 || block.size == 0 {
                return false;
            }
            if block.free {
                if prev_was_free {
                    return false;
                }
                free_blocks += 1;
            }
            prev_was_free = block.free;
            expected = off + block.size;
        }
        if expected != inner.capacity {
            return false;
        }

        if inner.free_list.len() != free_blocks {
            return false;
        }
        inner
            .free_list
            .iter()
            .all(|off| inner.blocks.get(off).is_some_and(|b| b.free))
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.inner.get_mut().release();
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Pool")
            .field("capacity", &inner.capacity)
            .field("blocks", &inner.blocks.len())
            .field("free_bytes", &inner.free_bytes())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================
