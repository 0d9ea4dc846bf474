//! Spin-lock guarded ring allocator
//!
//! The core [`RingAllocator`] is unsynchronized. This wrapper puts the whole
//! instance (store, cursors and headers) behind one `spin::Mutex` so it can
//! live in a `static` and be shared between threads or installed as the
//! global allocator of a no-heap component:
//!
//! ```rust,ignore
//! use kaal_ring_allocator::LockedRingAllocator;
//!
//! #[global_allocator]
//! static HEAP: LockedRingAllocator<{ 64 * 1024 }> = LockedRingAllocator::new();
//! ```
//!
//! Payloads are only 8-byte aligned, and [`GlobalAlloc::alloc`] returns null
//! for any layout that asks for more. That suits `alloc`-only `no_std`
//! components. It does not suit std binaries: std's `HashMap` (and so the
//! libtest harness) needs 16-byte aligned allocations and aborts.
//!
//! Operations are logged only after the lock is released. Records produced
//! while a log call is already in flight are dropped, so a logger that
//! allocates from this ring cannot recurse into it.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

use crate::header::HEADER_SIZE;
use crate::ring::{AlignedBuffer, BlockHandle, OpRecord, RingAllocator};
use crate::Result;

/// Ring allocator shared through a spin lock
pub struct LockedRingAllocator<const N: usize> {
    ring: Mutex<RingAllocator<AlignedBuffer<N>>>,
    logging: AtomicBool,
}

impl<const N: usize> LockedRingAllocator<N> {
    /// Create an empty allocator with an inline `N`-byte store
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RingAllocator::new_inline()),
            logging: AtomicBool::new(false),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<BlockHandle> {
        let (result, record) = self.ring.lock().allocate_deferred(size);
        self.emit(record);
        result
    }

    pub fn free(&self, handle: BlockHandle) -> Result<()> {
        let (result, record) = self.ring.lock().free_deferred(handle);
        self.emit(record);
        result
    }

    pub fn available(&self) -> usize {
        self.ring.lock().available()
    }

    /// `(head, tail)` read under one lock acquisition
    pub fn cursors(&self) -> (usize, usize) {
        let ring = self.ring.lock();
        (ring.head(), ring.tail())
    }

    pub fn reset(&self) {
        self.ring.lock().reset();
    }

    /// Lock the ring for payload access or a sequence of operations
    ///
    /// Operations made through the guard log while it is held, so this is
    /// not for use from inside a logger.
    pub fn lock(&self) -> MutexGuard<'_, RingAllocator<AlignedBuffer<N>>> {
        self.ring.lock()
    }

    /// Log `record` unless this allocator is already inside a log call
    fn emit(&self, record: OpRecord) {
        if self
            .logging
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        record.emit();
        self.logging.store(false, Ordering::Release);
    }
}

impl<const N: usize> Default for LockedRingAllocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for LockedRingAllocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Payloads sit one header past a 16-byte block boundary
        if layout.align() > HEADER_SIZE {
            return null_mut();
        }

        let (ptr, record) = {
            let mut ring = self.ring.lock();
            let (result, record) = ring.allocate_deferred(layout.size());
            let ptr = match result {
                Ok(handle) => ring.base_ptr().add(handle.into_raw()),
                Err(_) => null_mut(),
            };
            (ptr, record)
        };

        self.emit(record);
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let record = {
            let mut ring = self.ring.lock();
            let offset = (ptr as usize).wrapping_sub(ring.base_ptr() as usize);
            ring.free_deferred(BlockHandle::from_raw(offset)).1
        };

        self.emit(record);
    }
}
