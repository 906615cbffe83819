//! Block and zone header layout.
//!
//! A zone image is a zone header followed by a packed run of blocks:
//!
//! ```text
//! offset 0    zone header (48 bytes)
//!             ├── size: u64         total bytes, header included
//!             ├── blocklist: block  sentinel at offset 8, always USED
//!             └── rover: i64        next-fit cursor
//! offset 48   block ─┐
//!             block  ├─ circular list through the sentinel
//!             ...   ─┘
//! ```
//!
//! Every block starts with a 32-byte header (`size`, `state`, `tag`,
//! `prev`, `next`), all little-endian, so an image is byte-identical
//! across build profiles and can be copied between buffers or hosts.

use zonal_core::{BlockState, Offset};

/// Every block size and zone capacity is a multiple of this.
pub const GRANULE: usize = 16;

/// Bytes occupied by a block header in front of its payload.
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Bytes occupied by the zone header in front of the first block.
pub const ZONE_HEADER_SIZE: usize = 48;

/// Smallest block that can hold a header and a non-empty payload.
pub const MIN_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + GRANULE;

/// Tag stamped on every handed-out block; the `checked` build verifies it
/// on free.
pub const USED_TAG: u32 = 0x001D_4A11;

/// Offset of the sentinel block inside the zone header.
pub(crate) const SENTINEL: Offset = Offset(8);

/// Offset of the first real block.
pub(crate) const FIRST_BLOCK: Offset = Offset(ZONE_HEADER_SIZE as i64);

pub(crate) const ZONE_SIZE_AT: usize = 0;
pub(crate) const ROVER_AT: usize = 40;

const SIZE_AT: usize = 0;
const STATE_AT: usize = 8;
const TAG_AT: usize = 12;
const PREV_AT: usize = 16;
const NEXT_AT: usize = 24;

/// Round `n` up to the next multiple of [`GRANULE`].
pub fn round_up(n: usize) -> Option<usize> {
    n.checked_add(GRANULE - 1).map(|v| v & !(GRANULE - 1))
}

/// Total block size (header included) needed to serve a `size`-byte request.
///
/// Zero-byte requests are served with one granule of payload.
pub fn block_size_for(size: usize) -> Option<usize> {
    round_up(size.max(1))?.checked_add(BLOCK_HEADER_SIZE)
}

/// Decoded copy of a block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub(crate) size: usize,
    pub(crate) state: u32,
    pub(crate) tag: u32,
    pub(crate) prev: Offset,
    pub(crate) next: Offset,
}

impl BlockHeader {
    pub(crate) fn new(size: usize, state: BlockState, prev: Offset, next: Offset) -> Self {
        Self {
            size,
            state: state.to_raw(),
            tag: 0,
            prev,
            next,
        }
    }

    /// Decode a header from the first [`BLOCK_HEADER_SIZE`] bytes of `bytes`.
    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            size: usize::try_from(read_u64(bytes, SIZE_AT)?).ok()?,
            state: read_u32(bytes, STATE_AT)?,
            tag: read_u32(bytes, TAG_AT)?,
            prev: Offset(read_i64(bytes, PREV_AT)?),
            next: Offset(read_i64(bytes, NEXT_AT)?),
        })
    }

    /// Encode into the first [`BLOCK_HEADER_SIZE`] bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than a block header.
    pub(crate) fn encode(&self, out: &mut [u8]) {
        write_bytes(out, SIZE_AT, &(self.size as u64).to_le_bytes());
        write_bytes(out, STATE_AT, &self.state.to_le_bytes());
        write_bytes(out, TAG_AT, &self.tag.to_le_bytes());
        write_bytes(out, PREV_AT, &self.prev.get().to_le_bytes());
        write_bytes(out, NEXT_AT, &self.next.get().to_le_bytes());
    }

    pub(crate) fn block_state(&self) -> Option<BlockState> {
        BlockState::from_raw(self.state)
    }

    pub(crate) fn is_free(&self) -> bool {
        self.state == BlockState::Free.to_raw()
    }
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    raw.try_into().ok().map(u64::from_le_bytes)
}

pub(crate) fn read_i64(bytes: &[u8], at: usize) -> Option<i64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    raw.try_into().ok().map(i64::from_le_bytes)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    raw.try_into().ok().map(u32::from_le_bytes)
}

pub(crate) fn write_bytes(out: &mut [u8], at: usize, src: &[u8]) {
    out[at..at + src.len()].copy_from_slice(src);
}
