//! Ring allocator core
//!
//! Owns the backing store and the two cursors. All state lives in the
//! instance; nothing here is global or synchronized.

use core::fmt;
use core::ops::Range;

use static_assertions::const_assert_eq;

use crate::header::{BlockHeader, BlockState, HEADER_SIZE};
use crate::{align_up, Corruption, Result, RingError, ALIGNMENT, MAX_CAPACITY};

/// Inline backing store aligned to [`ALIGNMENT`]
///
/// Block starts are multiples of the alignment relative to the store, so with
/// this wrapper every payload address is aligned to [`HEADER_SIZE`] in memory.
#[repr(C, align(16))]
pub struct AlignedBuffer<const N: usize>([u8; N]);

const_assert_eq!(core::mem::align_of::<AlignedBuffer<0>>(), ALIGNMENT);

impl<const N: usize> AlignedBuffer<N> {
    /// Create a zeroed buffer
    pub const fn new() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> Default for AlignedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for AlignedBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> AsMut<[u8]> for AlignedBuffer<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Handle to a live allocation
///
/// Wraps the store-relative offset of the payload. Handles are move-only and
/// [`RingAllocator::free`] consumes them, so a block cannot be freed twice
/// through the same handle.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a dropped handle keeps its block (and every later block) from being reclaimed"]
pub struct BlockHandle {
    offset: usize,
}

impl BlockHandle {
    /// Payload offset within the backing store
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Consume the handle, returning the raw payload offset
    pub fn into_raw(self) -> usize {
        self.offset
    }

    /// Rebuild a handle from a raw payload offset
    ///
    /// The allocator validates the offset when the handle is used, so a bogus
    /// or stale offset is reported as an error rather than corrupting state.
    pub fn from_raw(offset: usize) -> Self {
        Self { offset }
    }
}

/// Description of one block in the `tail..head` chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header
    pub offset: usize,
    /// Block length including the header
    pub len: usize,
    pub state: BlockState,
}

impl BlockInfo {
    /// Bytes covered by the block (blocks never straddle the end of the store)
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Bytes usable by the owner
    pub fn payload_range(&self) -> Range<usize> {
        self.offset + HEADER_SIZE..self.offset + self.len
    }
}

/// Fixed-capacity ring-buffer allocator
///
/// # Type Parameters
/// * `S` - Backing store. [`AlignedBuffer`] for an inline array, or any owned
///   or borrowed byte slice (`Vec<u8>`, `&mut [u8]`).
///
/// # Invariants
/// - `head` and `tail` are block-aligned offsets in `[0, capacity)`
/// - `head == tail` means empty, never full
/// - Blocks from `tail` to `head` form a chain linked by their lengths
pub struct RingAllocator<S> {
    storage: S,
    capacity: usize,
    head: usize,
    tail: usize,
}

impl<const N: usize> RingAllocator<AlignedBuffer<N>> {
    /// Create an empty allocator over an inline store of `N` bytes
    ///
    /// # Panics
    /// Panics if `N` is zero, not a multiple of [`ALIGNMENT`], or above
    /// [`MAX_CAPACITY`]. In a `static` initializer this is a compile error.
    pub const fn new_inline() -> Self {
        assert!(
            N > 0 && N % ALIGNMENT == 0 && N <= MAX_CAPACITY,
            "Ring capacity must be a non-zero multiple of the alignment"
        );

        Self {
            storage: AlignedBuffer::new(),
            capacity: N,
            head: 0,
            tail: 0,
        }
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> RingAllocator<S> {
    /// Create an empty allocator over `storage`
    ///
    /// # Errors
    /// Returns `InvalidCapacity` unless the store length is a non-zero
    /// multiple of [`ALIGNMENT`] no larger than [`MAX_CAPACITY`].
    pub fn new(storage: S) -> Result<Self> {
        let capacity = storage.as_ref().len();
        if capacity == 0 || capacity % ALIGNMENT != 0 || capacity > MAX_CAPACITY {
            return Err(RingError::InvalidCapacity { capacity });
        }

        Ok(Self {
            storage,
            capacity,
            head: 0,
            tail: 0,
        })
    }

    /// Size of the backing store in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next write position
    pub fn head(&self) -> usize {
        self.head
    }

    /// Oldest unreclaimed position
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Free bytes, ignoring any padding a wraparound would need
    pub fn available(&self) -> usize {
        if self.head >= self.tail {
            self.capacity - self.head + self.tail
        } else {
            self.tail - self.head
        }
    }

    /// Bytes between `tail` and `head`, including unreclaimed blocks
    pub fn used(&self) -> usize {
        self.capacity - self.available()
    }

    /// Drop every block and move both cursors to offset 0
    ///
    /// Outstanding handles become invalid.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Drop every block and park both cursors at `offset`
    ///
    /// # Errors
    /// Returns `InvalidOffset` if `offset` is not block-aligned or lies
    /// outside the store.
    pub fn reset_at(&mut self, offset: usize) -> Result<()> {
        if offset >= self.capacity || offset % ALIGNMENT != 0 {
            return Err(RingError::InvalidOffset { offset });
        }

        self.head = offset;
        self.tail = offset;
        Ok(())
    }

    /// Allocate a block with at least `size` usable bytes
    ///
    /// The block is placed at `head`. If the space left before the end of the
    /// store is too small, that space is covered by a gap block and the
    /// allocation wraps to offset 0.
    ///
    /// # Errors
    /// Returns `OutOfMemory` if the block does not fit. An allocation that
    /// would leave exactly zero bytes free is refused too, since it would make
    /// `head == tail` on a non-empty ring. Nothing is modified on failure.
    pub fn allocate(&mut self, size: usize) -> Result<BlockHandle> {
        let (result, record) = self.allocate_deferred(size);
        record.emit();
        result
    }

    /// Release a block and reclaim whatever has become contiguous with `tail`
    ///
    /// The block is marked free first. `tail` then moves forward across every
    /// free block (and any gap in between) until it meets a block still in
    /// use or catches up with `head`.
    ///
    /// # Errors
    /// - `InvalidHandle` if the handle does not name a block in the ring, or
    ///   names a gap block
    /// - `DoubleFree` if the block was already freed
    /// - `Corrupted` if the block chain cannot be walked; the block stays
    ///   marked free and `tail` keeps the last consistent position
    pub fn free(&mut self, handle: BlockHandle) -> Result<()> {
        let (result, record) = self.free_deferred(handle);
        record.emit();
        result
    }

    /// [`allocate`](Self::allocate) without logging
    ///
    /// The returned record is logged by the caller once it no longer holds
    /// a lock around the ring.
    pub(crate) fn allocate_deferred(&mut self, size: usize) -> (Result<BlockHandle>, OpRecord) {
        let before = self.cursors();
        let result = self.place(size);
        let record = OpRecord::Allocate {
            size,
            result: result.as_ref().map(BlockHandle::offset).map_err(|err| *err),
            before,
            after: self.cursors(),
        };
        (result, record)
    }

    /// [`free`](Self::free) without logging
    pub(crate) fn free_deferred(&mut self, handle: BlockHandle) -> (Result<()>, OpRecord) {
        let offset = handle.offset();
        let before = self.cursors();
        let result = self.release(handle);
        let record = OpRecord::Free {
            offset,
            result,
            before,
            after: self.cursors(),
        };
        (result, record)
    }

    fn place(&mut self, size: usize) -> Result<BlockHandle> {
        let available = self.available();
        let block_size = match size.checked_add(HEADER_SIZE).and_then(align_up) {
            Some(block_size) if block_size <= self.capacity => block_size,
            _ => return Err(RingError::OutOfMemory { requested: size, available }),
        };

        let mut offset = self.head;
        let mut pad = 0;
        if self.head >= self.tail && self.capacity - self.head < block_size {
            // Skip the end of the store; it is already a multiple of the alignment
            pad = self.capacity - self.head;
            offset = 0;
        }

        if available <= block_size.saturating_add(pad) {
            return Err(RingError::OutOfMemory { requested: size, available });
        }

        self.write_block(pad, BlockState::Gap);
        self.write_block(block_size, BlockState::InUse);

        Ok(BlockHandle {
            offset: offset + HEADER_SIZE,
        })
    }

    fn release(&mut self, handle: BlockHandle) -> Result<()> {
        let offset = handle.into_raw();
        let start = self.locate(offset)?;

        let header = BlockHeader::decode(self.storage.as_ref(), start)?;
        match header.state {
            BlockState::InUse => {}
            BlockState::Free => return Err(RingError::DoubleFree { offset }),
            BlockState::Gap => return Err(RingError::InvalidHandle { offset }),
        }

        BlockHeader::set_state(self.storage.as_mut(), start, BlockState::Free);
        self.coalesce(self.capacity / ALIGNMENT)
    }

    /// Usable bytes of a live allocation
    ///
    /// The slice covers the whole block minus its header, so it may be longer
    /// than the size originally requested.
    pub fn payload(&self, handle: &BlockHandle) -> Result<&[u8]> {
        let range = self.live_block(handle)?.payload_range();
        Ok(&self.storage.as_ref()[range])
    }

    /// Mutable access to the usable bytes of a live allocation
    pub fn payload_mut(&mut self, handle: &BlockHandle) -> Result<&mut [u8]> {
        let range = self.live_block(handle)?.payload_range();
        Ok(&mut self.storage.as_mut()[range])
    }

    /// Walk the block chain from `tail` to `head`
    ///
    /// The walk stops early (without panicking) at the first header that
    /// does not decode to a plausible block.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            buf: self.storage.as_ref(),
            capacity: self.capacity,
            cursor: self.tail,
            remaining: self.used(),
            steps_left: self.capacity / ALIGNMENT,
        }
    }

    /// Give back the backing store
    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Base address of the backing store
    pub(crate) fn base_ptr(&mut self) -> *mut u8 {
        self.storage.as_mut().as_mut_ptr()
    }

    fn write_block(&mut self, size: usize, state: BlockState) {
        if size == 0 {
            return;
        }

        BlockHeader { state, len: size }.encode(self.storage.as_mut(), self.head);
        self.head = (self.head + size) % self.capacity;
    }

    /// Advance `tail` over the run of free blocks (and gaps) starting there
    ///
    /// `read_block` keeps every block before `head`, so each step already moves
    /// toward `head`; `max_steps` is a backstop against that check regressing.
    fn coalesce(&mut self, max_steps: usize) -> Result<()> {
        let mut steps = 0;
        let mut pending_gap: Option<usize> = None;
        let mut cursor = self.tail;

        while self.head != self.tail {
            if steps == max_steps {
                return Err(Corruption::ScanOverrun { steps }.into());
            }
            steps += 1;

            let header = self.read_block(cursor)?;
            match header.state {
                BlockState::InUse => break,
                BlockState::Gap => {
                    if pending_gap.is_some() {
                        return Err(Corruption::AdjacentGaps { offset: cursor }.into());
                    }

                    let next = (cursor + header.len) % self.capacity;
                    if next == self.head {
                        return Err(Corruption::DanglingGap { offset: cursor }.into());
                    }

                    pending_gap = Some(header.len);
                    cursor = next;
                }
                BlockState::Free => {
                    let advance = pending_gap.take().unwrap_or(0) + header.len;
                    self.tail = (self.tail + advance) % self.capacity;
                    cursor = self.tail;
                }
            }
        }

        Ok(())
    }

    /// Decode and sanity-check the header of the block at `offset`
    fn read_block(&self, offset: usize) -> Result<BlockHeader> {
        let header = BlockHeader::decode(self.storage.as_ref(), offset)?;
        check_block(&header, offset, self.distance(offset, self.head), self.capacity)?;
        Ok(header)
    }

    /// Header offset for a payload offset, if it can name a block in the ring
    fn locate(&self, offset: usize) -> Result<usize> {
        let invalid = RingError::InvalidHandle { offset };
        let start = offset.checked_sub(HEADER_SIZE).ok_or(invalid)?;

        if start >= self.capacity || start % ALIGNMENT != 0 || !self.is_occupied(start) {
            return Err(invalid);
        }
        Ok(start)
    }

    fn live_block(&self, handle: &BlockHandle) -> Result<BlockInfo> {
        let start = self.locate(handle.offset)?;
        let header = self.read_block(start)?;
        if header.state != BlockState::InUse {
            return Err(RingError::InvalidHandle { offset: handle.offset });
        }

        Ok(BlockInfo {
            offset: start,
            len: header.len,
            state: header.state,
        })
    }

    fn is_occupied(&self, offset: usize) -> bool {
        self.distance(self.tail, offset) < self.distance(self.tail, self.head)
    }

    /// Forward distance from `from` to `to` around the ring
    fn distance(&self, from: usize, to: usize) -> usize {
        if to >= from {
            to - from
        } else {
            self.capacity - from + to
        }
    }

    fn cursors(&self) -> Cursors {
        Cursors {
            head: self.head,
            tail: self.tail,
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursors {
    head: usize,
    tail: usize,
    capacity: usize,
}

/// Outcome of one ring operation, logged after the ring is released
///
/// A ring installed as the global allocator must not log while it is locked:
/// the logger may allocate and would spin on the same lock.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub(crate) enum OpRecord {
    Allocate {
        size: usize,
        result: Result<usize>,
        before: Cursors,
        after: Cursors,
    },
    Free {
        offset: usize,
        result: Result<()>,
        before: Cursors,
        after: Cursors,
    },
}

impl OpRecord {
    pub(crate) fn emit(&self) {
        match *self {
            OpRecord::Allocate { size, result: Ok(offset), before, after } => {
                if offset - HEADER_SIZE != before.head {
                    log::debug!(
                        "ring: wrapping, {:#x} byte gap at {:#x}",
                        before.capacity - before.head,
                        before.head
                    );
                }
                log::trace!(
                    "ring: allocate({}) -> {:#x} (head={:#x}, tail={:#x})",
                    size,
                    offset,
                    after.head,
                    after.tail
                );
            }
            OpRecord::Allocate { size, result: Err(err), .. } => {
                log::debug!("ring: allocate({}) rejected: {}", size, err);
            }
            OpRecord::Free { offset, result, before, after } => {
                if after.tail != before.tail {
                    log::debug!("ring: tail {:#x} -> {:#x}", before.tail, after.tail);
                }
                match result {
                    Ok(()) => log::trace!(
                        "ring: free({:#x}) (head={:#x}, tail={:#x})",
                        offset,
                        after.head,
                        after.tail
                    ),
                    Err(err @ RingError::Corrupted(_)) => log::error!(
                        "ring: free({:#x}): {} (head={:#x}, tail={:#x})",
                        offset,
                        err,
                        after.head,
                        after.tail
                    ),
                    Err(err) => log::debug!("ring: free({:#x}) rejected: {}", offset, err),
                }
            }
        }
    }
}

impl<S> fmt::Debug for RingAllocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAllocator")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}

/// A block must be non-empty, aligned, end before the end of the store and
/// not run past `head` (`remaining` bytes away).
fn check_block(
    header: &BlockHeader,
    offset: usize,
    remaining: usize,
    capacity: usize,
) -> core::result::Result<(), Corruption> {
    let len = header.len;
    if len == 0 || len % ALIGNMENT != 0 || len > remaining || offset + len > capacity {
        return Err(Corruption::BadLength { offset, len });
    }
    Ok(())
}

/// Iterator over the blocks between `tail` and `head`
///
/// Created by [`RingAllocator::blocks`].
pub struct Blocks<'a> {
    buf: &'a [u8],
    capacity: usize,
    cursor: usize,
    remaining: usize,
    steps_left: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.remaining == 0 || self.steps_left == 0 {
            return None;
        }
        self.steps_left -= 1;

        let header = BlockHeader::decode(self.buf, self.cursor)
            .ok()
            .filter(|h| check_block(h, self.cursor, self.remaining, self.capacity).is_ok());
        let Some(header) = header else {
            self.remaining = 0;
            return None;
        };

        let info = BlockInfo {
            offset: self.cursor,
            len: header.len,
            state: header.state,
        };
        self.cursor = (self.cursor + header.len) % self.capacity;
        self.remaining -= header.len;

        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn ring() -> RingAllocator<AlignedBuffer<2048>> {
        RingAllocator::new_inline()
    }

    #[test]
    fn test_new_validates_capacity() {
        assert!(RingAllocator::new(vec![0u8; 2048]).is_ok());
        assert!(matches!(
            RingAllocator::new(vec![0u8; 0]),
            Err(RingError::InvalidCapacity { capacity: 0 })
        ));
        assert!(matches!(
            RingAllocator::new(vec![0u8; 2040]),
            Err(RingError::InvalidCapacity { capacity: 2040 })
        ));
    }

    #[test]
    fn test_borrowed_storage() {
        let mut backing = [0u8; 256];
        let mut ring = RingAllocator::new(&mut backing[..]).unwrap();

        let handle = ring.allocate(10).unwrap();
        assert_eq!(handle.offset(), HEADER_SIZE);
        assert_eq!(ring.head(), 32);
        ring.free(handle).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_empty_ring() {
        let ring = ring();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 2048);
        assert_eq!(ring.available(), 2048);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.blocks().count(), 0);
    }

    #[test]
    fn test_available_both_orders() {
        let mut ring = ring();
        ring.head = 0x100;
        ring.tail = 0x40;
        assert_eq!(ring.available(), 2048 - 0x100 + 0x40);

        ring.head = 0x40;
        ring.tail = 0x100;
        assert_eq!(ring.available(), 0xC0);
    }

    #[test]
    fn test_zero_size_allocation() {
        let mut ring = ring();
        let handle = ring.allocate(0).unwrap();

        assert_eq!(ring.head(), 16);
        assert_eq!(ring.payload(&handle).unwrap().len(), 16 - HEADER_SIZE);
        ring.free(handle).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_oversized_request() {
        let mut ring = ring();

        assert_eq!(
            ring.allocate(2048),
            Err(RingError::OutOfMemory { requested: 2048, available: 2048 })
        );
        assert!(matches!(
            ring.allocate(usize::MAX),
            Err(RingError::OutOfMemory { .. })
        ));
        assert_eq!(ring.head(), 0);
    }

    #[test]
    fn test_largest_allocation_leaves_one_quantum() {
        let mut ring = ring();

        // 2048 - 16 is the largest block that keeps head != tail
        assert!(ring.allocate(2048 - 16 - HEADER_SIZE + 1).is_err());
        let handle = ring.allocate(2048 - 16 - HEADER_SIZE).unwrap();
        assert_eq!(ring.head(), 2048 - 16);
        assert_eq!(ring.available(), 16);

        ring.free(handle).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wrap_inserts_gap() {
        let mut ring = ring();
        ring.reset_at(2000).unwrap();

        let handle = ring.allocate(1000).unwrap();
        assert_eq!(handle.offset(), HEADER_SIZE);
        assert_eq!(ring.head(), 0x3F0);
        assert_eq!(ring.tail(), 2000);

        let blocks: Vec<_> = ring.blocks().collect();
        assert_eq!(
            blocks,
            vec![
                BlockInfo { offset: 2000, len: 48, state: BlockState::Gap },
                BlockInfo { offset: 0, len: 0x3F0, state: BlockState::InUse },
            ]
        );

        ring.free(handle).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.tail(), 0x3F0);
    }

    #[test]
    fn test_exact_end_does_not_wrap() {
        let mut ring = ring();
        ring.reset_at(2048 - 48).unwrap();

        let _handle = ring.allocate(30).unwrap();
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.blocks().count(), 1);
    }

    #[test]
    fn test_failed_allocation_changes_nothing() {
        let mut ring = ring();
        let _a = ring.allocate(1000).unwrap();
        let _b = ring.allocate(1000).unwrap();
        let head = ring.head();
        let snapshot: Vec<u8> = ring.storage.as_ref().to_vec();

        assert!(ring.allocate(1000).is_err());
        assert_eq!(ring.head(), head);
        assert_eq!(ring.tail(), 0);
        assert_eq!(ring.storage.as_ref(), &snapshot[..]);
    }

    #[test]
    fn test_reset_at_validation() {
        let mut ring = ring();
        assert_eq!(ring.reset_at(2048), Err(RingError::InvalidOffset { offset: 2048 }));
        assert_eq!(ring.reset_at(8), Err(RingError::InvalidOffset { offset: 8 }));
        assert!(ring.reset_at(512).is_ok());
        assert_eq!((ring.head(), ring.tail()), (512, 512));

        ring.reset();
        assert_eq!((ring.head(), ring.tail()), (0, 0));
    }

    #[test]
    fn test_payload_access() {
        let mut ring = ring();
        let a = ring.allocate(10).unwrap();
        let b = ring.allocate(20).unwrap();

        ring.payload_mut(&a).unwrap()[..10].copy_from_slice(b"0123456789");
        ring.payload_mut(&b).unwrap().fill(0xEE);

        assert_eq!(&ring.payload(&a).unwrap()[..10], b"0123456789");
        assert_eq!(ring.payload(&b).unwrap().len(), 32 - HEADER_SIZE);
        assert!(ring.payload(&b).unwrap().iter().all(|&x| x == 0xEE));
    }

    #[test]
    fn test_double_free_detected() {
        let mut ring = ring();
        let a = ring.allocate(10).unwrap();
        let b = ring.allocate(10).unwrap();
        let raw_b = b.into_raw();

        ring.free(BlockHandle::from_raw(raw_b)).unwrap();
        assert_eq!(
            ring.free(BlockHandle::from_raw(raw_b)),
            Err(RingError::DoubleFree { offset: raw_b })
        );
        // Block b is still waiting on a, nothing moved
        assert_eq!(ring.tail(), 0);

        ring.free(a).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_invalid_handles() {
        let mut ring = ring();
        let a = ring.allocate(10).unwrap();

        // Not a header slot
        assert_eq!(
            ring.free(BlockHandle::from_raw(12)),
            Err(RingError::InvalidHandle { offset: 12 })
        );
        // Underflows the header
        assert_eq!(
            ring.free(BlockHandle::from_raw(0)),
            Err(RingError::InvalidHandle { offset: 0 })
        );
        // Outside tail..head
        assert_eq!(
            ring.free(BlockHandle::from_raw(0x108)),
            Err(RingError::InvalidHandle { offset: 0x108 })
        );
        assert!(ring.payload(&BlockHandle::from_raw(0x108)).is_err());

        let raw = a.into_raw();
        ring.free(BlockHandle::from_raw(raw)).unwrap();
        // Reclaimed blocks are outside the occupied span
        assert_eq!(
            ring.free(BlockHandle::from_raw(raw)),
            Err(RingError::InvalidHandle { offset: raw })
        );
    }

    #[test]
    fn test_gap_is_not_freeable() {
        let mut ring = ring();
        ring.reset_at(2000).unwrap();
        let _a = ring.allocate(1000).unwrap();

        assert_eq!(
            ring.free(BlockHandle::from_raw(2000 + HEADER_SIZE)),
            Err(RingError::InvalidHandle { offset: 2000 + HEADER_SIZE })
        );
    }

    #[test]
    fn test_adjacent_gaps_reported() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let _b = ring.allocate(10).unwrap();
        let c = ring.allocate(10).unwrap();

        BlockHeader { state: BlockState::Gap, len: 32 }.encode(ring.storage.as_mut(), 0);
        BlockHeader { state: BlockState::Gap, len: 32 }.encode(ring.storage.as_mut(), 32);

        assert_eq!(
            ring.free(c),
            Err(RingError::Corrupted(Corruption::AdjacentGaps { offset: 32 }))
        );
        assert_eq!(ring.tail(), 0);
    }

    #[test]
    fn test_dangling_gap_reported() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let b = ring.allocate(10).unwrap();

        BlockHeader { state: BlockState::Gap, len: 64 }.encode(ring.storage.as_mut(), 0);

        assert_eq!(
            ring.free(b),
            Err(RingError::Corrupted(Corruption::DanglingGap { offset: 0 }))
        );
    }

    #[test]
    fn test_bad_length_reported() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let b = ring.allocate(10).unwrap();

        BlockHeader { state: BlockState::Free, len: 0x800 }.encode(ring.storage.as_mut(), 0);

        assert_eq!(
            ring.free(b),
            Err(RingError::Corrupted(Corruption::BadLength { offset: 0, len: 0x800 }))
        );
        assert_eq!(ring.tail(), 0);
    }

    #[test]
    fn test_unknown_state_reported() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let b = ring.allocate(10).unwrap();

        ring.storage.as_mut()[0] = 0x5A;

        assert_eq!(
            ring.free(b),
            Err(RingError::Corrupted(Corruption::UnknownState { offset: 0, tag: 0x5A }))
        );
    }

    #[test]
    fn test_scan_budget_exhausted() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let _b = ring.allocate(10).unwrap();
        let _c = ring.allocate(10).unwrap();

        BlockHeader::set_state(ring.storage.as_mut(), 0, BlockState::Free);
        BlockHeader::set_state(ring.storage.as_mut(), 32, BlockState::Free);

        assert_eq!(
            ring.coalesce(1),
            Err(RingError::Corrupted(Corruption::ScanOverrun { steps: 1 }))
        );
        assert_eq!(ring.tail(), 32);

        // The full budget reaches the block still in use
        ring.coalesce(ring.capacity() / ALIGNMENT).unwrap();
        assert_eq!(ring.tail(), 64);
    }

    #[test]
    fn test_distance_at_max_capacity() {
        let ring = RingAllocator {
            storage: Vec::<u8>::new(),
            capacity: MAX_CAPACITY,
            head: 16,
            tail: MAX_CAPACITY - 32,
        };

        assert_eq!(ring.distance(MAX_CAPACITY - 16, 16), 32);
        assert_eq!(ring.distance(16, MAX_CAPACITY - 16), MAX_CAPACITY - 32);
        assert_eq!(ring.distance(48, 48), 0);
        assert!(ring.is_occupied(0));
        assert!(!ring.is_occupied(16));
        assert_eq!(ring.available(), MAX_CAPACITY - 48);
    }

    #[test]
    fn test_deferred_records() {
        let mut ring = ring();
        ring.reset_at(2000).unwrap();

        let (handle, record) = ring.allocate_deferred(1000);
        let handle = handle.unwrap();
        assert!(matches!(
            record,
            OpRecord::Allocate { size: 1000, result: Ok(8), before, after }
                if before.head == 2000 && after.head == 0x3F0
        ));

        let (result, record) = ring.allocate_deferred(4096);
        assert!(result.is_err());
        assert!(matches!(
            record,
            OpRecord::Allocate { result: Err(RingError::OutOfMemory { requested: 4096, .. }), .. }
        ));

        let (result, record) = ring.free_deferred(handle);
        result.unwrap();
        assert!(matches!(
            record,
            OpRecord::Free { offset: 8, result: Ok(()), before, after }
                if before.tail == 2000 && after.tail == 0x3F0
        ));
        record.emit();
    }

    #[test]
    fn test_blocks_stops_on_garbage() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();
        let _b = ring.allocate(10).unwrap();

        ring.storage.as_mut()[32] = 0xFF;

        let blocks: Vec<_> = ring.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].range(), 0..32);
    }

    #[test]
    fn test_into_inner_returns_storage() {
        let mut ring = RingAllocator::new(vec![0u8; 64]).unwrap();
        let _a = ring.allocate(4).unwrap();

        let storage = ring.into_inner();
        assert_eq!(&storage[..8], &[1, 0, 0, 0, 16, 0, 0, 0]);
    }

    #[test]
    fn test_debug_format() {
        let mut ring = ring();
        let _a = ring.allocate(10).unwrap();

        assert_eq!(
            format!("{:?}", ring),
            "RingAllocator { capacity: 2048, head: 32, tail: 0 }"
        );
    }
}
