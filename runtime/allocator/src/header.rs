//! Block header encoding
//!
//! Every block begins with a fixed 8-byte header:
//!
//! ```text
//!   byte:  0       1..4      4..8
//!        +-------+---------+-------------------+
//!        | state | (zero)  | length (u32, LE)  |
//!        +-------+---------+-------------------+
//! ```
//!
//! The length covers the whole block, header included, and is always a
//! multiple of [`ALIGNMENT`](crate::ALIGNMENT).

use crate::Corruption;

/// Size of the encoded block header in bytes
pub const HEADER_SIZE: usize = 8;

const STATE_BYTE: usize = 0;
const LEN_BYTES: core::ops::Range<usize> = 4..8;

/// State tag of a block
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// Released by its owner, waiting for `tail` to reach it
    Free = 0,
    /// Owned by a caller
    InUse = 1,
    /// Padding that skips the unusable end of the store on wraparound
    Gap = 2,
}

impl BlockState {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BlockState::Free),
            1 => Some(BlockState::InUse),
            2 => Some(BlockState::Gap),
            _ => None,
        }
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub state: BlockState,
    pub len: usize,
}

impl BlockHeader {
    /// Write this header at `offset`
    ///
    /// `offset + HEADER_SIZE` must lie within `buf` and `len` must fit in 32 bits.
    pub fn encode(&self, buf: &mut [u8], offset: usize) {
        let raw = &mut buf[offset..offset + HEADER_SIZE];
        raw.fill(0);
        raw[STATE_BYTE] = self.state as u8;
        raw[LEN_BYTES].copy_from_slice(&(self.len as u32).to_le_bytes());
    }

    /// Read the header at `offset`
    pub fn decode(buf: &[u8], offset: usize) -> Result<Self, Corruption> {
        let raw = &buf[offset..offset + HEADER_SIZE];
        let tag = raw[STATE_BYTE];
        let state = BlockState::from_tag(tag).ok_or(Corruption::UnknownState { offset, tag })?;
        let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;

        Ok(Self { state, len })
    }

    /// Overwrite only the state tag of the header at `offset`
    pub fn set_state(buf: &mut [u8], offset: usize, state: BlockState) {
        buf[offset + STATE_BYTE] = state as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = [0xAAu8; 32];
        BlockHeader { state: BlockState::InUse, len: 0x430 }.encode(&mut buf, 16);

        assert_eq!(&buf[16..24], &[1, 0, 0, 0, 0x30, 0x04, 0, 0]);
        // Neighbouring bytes are untouched
        assert_eq!(buf[15], 0xAA);
        assert_eq!(buf[24], 0xAA);
    }

    #[test]
    fn test_decode() {
        let mut buf = [0u8; 16];
        BlockHeader { state: BlockState::Gap, len: 48 }.encode(&mut buf, 0);

        let header = BlockHeader::decode(&buf, 0).unwrap();
        assert_eq!(header.state, BlockState::Gap);
        assert_eq!(header.len, 48);
    }

    #[test]
    fn test_set_state_keeps_length() {
        let mut buf = [0u8; 16];
        BlockHeader { state: BlockState::InUse, len: 32 }.encode(&mut buf, 0);
        BlockHeader::set_state(&mut buf, 0, BlockState::Free);

        assert_eq!(
            BlockHeader::decode(&buf, 0).unwrap(),
            BlockHeader { state: BlockState::Free, len: 32 }
        );
    }

    #[test]
    fn test_unknown_state() {
        let mut buf = [0u8; 32];
        buf[16] = 7;

        assert_eq!(
            BlockHeader::decode(&buf, 16),
            Err(Corruption::UnknownState { offset: 16, tag: 7 })
        );
    }
}
