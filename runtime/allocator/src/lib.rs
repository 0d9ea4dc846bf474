//! Ring Allocator - Fixed-capacity circular memory allocation
//!
//! # Purpose
//! Serves variable-sized allocations out of one fixed byte region without
//! touching a general-purpose heap. Intended for runtime components that run
//! before (or instead of) a heap, and for bulk buffers whose lifetimes are
//! roughly first-in first-out.
//!
//! # Integration Points
//! - Depends on: nothing beyond `core` (backing storage is supplied by the caller)
//! - Provides to: Components needing a bounded scratch heap, IPC staging buffers
//! - Capabilities required: None (the backing region is ordinary memory)
//!
//! # Architecture
//! Every block starts with an 8-byte header (state tag + length) and is padded
//! to a 16-byte quantum. Allocation always happens at `head`; reclamation moves
//! `tail` forward over runs of freed blocks:
//!
//! ```text
//!        tail                              head
//!         |                                 |
//!   ------+--------+------+---------+-------+-------------
//!   free  | FREE   | GAP  | INUSE   | FREE  |    free
//!   ------+--------+------+---------+-------+-------------
//! ```
//!
//! A `GAP` block pads out the end of the store when an allocation has to wrap
//! to offset 0. Freeing a block that is not at `tail` only marks it; the space
//! comes back once every block in front of it has been freed as well.
//!
//! `head == tail` always means empty. An allocation that would fill the ring
//! exactly is refused so that the two states never collide.
//!
//! # Concurrency
//! [`RingAllocator`] is a plain value mutated through `&mut self`. Shared use
//! goes through [`LockedRingAllocator`] (feature `locked`), which wraps the
//! whole instance in a spin lock and also implements `GlobalAlloc`.
//!
//! # Testing Strategy
//! - Unit tests: header encoding, cursor accounting, wraparound, corruption
//! - Integration tests: canned allocate/free sequences with cursor checks
//! - Global allocator test: the ring serving a process with trace logging on
//! - Benchmarks: allocate/free churn (criterion)

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

mod header;
mod ring;

#[cfg(feature = "locked")]
mod locked;

pub use header::{BlockState, HEADER_SIZE};
pub use ring::{AlignedBuffer, BlockHandle, BlockInfo, Blocks, RingAllocator};

#[cfg(feature = "locked")]
pub use locked::LockedRingAllocator;

use static_assertions::const_assert;
use thiserror::Error;

/// Block size quantum, also the upper bound on the header size
pub const ALIGNMENT: usize = 16;

/// Largest supported backing store
///
/// Block lengths are stored in a 32-bit header field.
pub const MAX_CAPACITY: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(HEADER_SIZE <= ALIGNMENT);
const_assert!(HEADER_SIZE > 0);

/// Round `value` up to the next multiple of [`ALIGNMENT`]
///
/// Returns `None` on overflow.
#[inline]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Ring allocator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("Out of memory (requested: {requested} bytes, available: {available} bytes)")]
    OutOfMemory { requested: usize, available: usize },

    #[error("Invalid capacity {capacity} (must be a non-zero multiple of the block alignment)")]
    InvalidCapacity { capacity: usize },

    #[error("Invalid cursor offset {offset:#x}")]
    InvalidOffset { offset: usize },

    #[error("Invalid handle at offset {offset:#x}")]
    InvalidHandle { offset: usize },

    #[error("Double free detected at offset {offset:#x}")]
    DoubleFree { offset: usize },

    #[error("Ring metadata corrupted: {0}")]
    Corrupted(#[from] Corruption),
}

/// Metadata corruption detected while walking the block chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("unknown block state {tag:#x} at {offset:#x}")]
    UnknownState { offset: usize, tag: u8 },

    #[error("bad block length {len:#x} at {offset:#x}")]
    BadLength { offset: usize, len: usize },

    #[error("two adjacent gap blocks at {offset:#x}")]
    AdjacentGaps { offset: usize },

    #[error("gap block at {offset:#x} is not followed by a block")]
    DanglingGap { offset: usize },

    #[error("coalescing walk did not terminate after {steps} steps")]
    ScanOverrun { steps: usize },
}

pub type Result<T> = core::result::Result<T, RingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(16));
        assert_eq!(align_up(16), Some(16));
        assert_eq!(align_up(18), Some(32));
        assert_eq!(align_up(1009), Some(1024));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn test_error_messages() {
        let err = RingError::OutOfMemory { requested: 144, available: 112 };
        assert_eq!(
            format!("{}", err),
            "Out of memory (requested: 144 bytes, available: 112 bytes)"
        );

        let err = RingError::from(Corruption::AdjacentGaps { offset: 0x7f0 });
        assert_eq!(
            format!("{}", err),
            "Ring metadata corrupted: two adjacent gap blocks at 0x7f0"
        );
    }
}
