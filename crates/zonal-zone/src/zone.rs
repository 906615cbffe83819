//! Zone lifecycle and the allocate/free engine.
//!
//! A [`Zone`] owns one contiguous buffer. Blocks inside it link to each
//! other by [`Offset`], never by address, so the whole image can be
//! copied to a new buffer (see [`Zone::grow`]) without a fixup pass.
//!
//! Allocation is next-fit: the search resumes at the rover left behind
//! by the previous allocation and walks the circular block list once at
//! most. Freeing coalesces with both neighbours immediately, so no two
//! adjacent blocks are ever both free.

use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, trace};
use zonal_core::{BlockState, Offset, ZoneError};

use crate::block::{
    block_size_for, round_up, write_bytes, BlockHeader, BLOCK_HEADER_SIZE, FIRST_BLOCK,
    MIN_BLOCK_SIZE, ROVER_AT, SENTINEL, USED_TAG, ZONE_HEADER_SIZE, ZONE_SIZE_AT,
};
use crate::config::ZoneConfig;
use crate::raw::RawRegion;

/// One contiguous, independently managed heap region.
///
/// A zone is single-writer: every mutating operation takes `&mut self`
/// and there is no internal locking. Independent zones may live on
/// different threads. Callers that need several producers on one zone
/// wrap it in an external lock (see [`SharedZone`](crate::SharedZone)).
///
/// Handles returned by [`allocate`](Zone::allocate) are payload
/// [`Offset`]s. They stay valid across [`grow`](Zone::grow); raw
/// addresses obtained from [`resolve`](Zone::resolve) do not.
pub struct Zone {
    pub(crate) region: RawRegion,
    pub(crate) min_fragment: usize,
}

impl Zone {
    /// Create a zone with `capacity` payload bytes and default settings.
    pub fn create(capacity: usize) -> Result<Self, ZoneError> {
        Self::with_config(ZoneConfig::new(capacity))
    }

    /// Create a zone from a validated configuration.
    ///
    /// The capacity is rounded up to the block granularity and to at
    /// least one minimal block. The zone starts as one free block.
    pub fn with_config(config: ZoneConfig) -> Result<Self, ZoneError> {
        config.validate()?;
        let total = Self::total_for(config.capacity)?;
        let mut zone = Self {
            region: RawRegion::zeroed(total)?,
            min_fragment: config.min_fragment,
        };
        zone.clear();
        debug!(
            capacity = zone.capacity(),
            min_fragment = zone.min_fragment,
            "zone created"
        );
        Ok(zone)
    }

    /// Buffer size needed for a zone with `capacity` payload bytes.
    pub(crate) fn total_for(capacity: usize) -> Result<usize, ZoneError> {
        let overflow = || ZoneError::CapacityOverflow {
            requested: capacity,
        };
        let rounded = round_up(capacity).ok_or_else(overflow)?.max(MIN_BLOCK_SIZE);
        let total = rounded
            .checked_add(ZONE_HEADER_SIZE)
            .ok_or_else(overflow)?;
        if i64::try_from(total).is_err() {
            return Err(overflow());
        }
        Ok(total)
    }

    /// Reset the zone to a single free block spanning the payload area.
    ///
    /// Every outstanding offset is invalidated.
    pub fn clear(&mut self) {
        let total = self.total_size() as u64;
        write_bytes(self.region.bytes_mut(), ZONE_SIZE_AT, &total.to_le_bytes());
        let whole = BlockHeader::new(self.capacity(), BlockState::Free, SENTINEL, SENTINEL);
        self.set_header(FIRST_BLOCK, &whole);
        let sentinel = BlockHeader::new(0, BlockState::Used, FIRST_BLOCK, FIRST_BLOCK);
        self.set_header(SENTINEL, &sentinel);
        self.set_rover(FIRST_BLOCK);
        trace!(capacity = self.capacity(), "zone cleared");
    }

    /// Release the backing buffer.
    ///
    /// Equivalent to dropping the zone. Payloads are not visited.
    pub fn destroy(self) {
        drop(self);
    }

    /// Total size of the zone in bytes, zone header included.
    pub fn total_size(&self) -> usize {
        self.region.len()
    }

    /// Payload capacity in bytes: the total size minus the zone header.
    pub fn capacity(&self) -> usize {
        self.total_size() - ZONE_HEADER_SIZE
    }

    /// Fragment threshold this zone was configured with.
    pub fn min_fragment(&self) -> usize {
        self.min_fragment
    }

    /// Block offset where the next allocation search starts.
    pub fn rover(&self) -> Offset {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.region.bytes()[ROVER_AT..ROVER_AT + 8]);
        Offset(i64::from_le_bytes(raw))
    }

    pub(crate) fn set_rover(&mut self, at: Offset) {
        write_bytes(self.region.bytes_mut(), ROVER_AT, &at.get().to_le_bytes());
    }

    /// Allocate `size` payload bytes.
    ///
    /// Returns the payload offset, or `None` when no single free block
    /// is large enough. Never grows the zone; growth is the caller's call.
    /// The search visits each block at most once, so it terminates even
    /// when every block is in use.
    pub fn allocate(&mut self, size: usize) -> Option<Offset> {
        let Some(needed) = block_size_for(size) else {
            trace!(size, "allocation size overflows");
            return None;
        };
        let start = self.rover();
        let mut cur = start;
        loop {
            let h = self.header(cur);
            if cur != SENTINEL && h.is_free() && h.size >= needed {
                return Some(self.claim(cur, h, needed));
            }
            cur = h.next;
            if cur == start {
                break;
            }
        }
        trace!(size, free = self.free_memory(), "no free block large enough");
        None
    }

    /// Like [`allocate`](Zone::allocate), reporting failure as an error.
    pub fn try_allocate(&mut self, size: usize) -> Result<Offset, ZoneError> {
        self.allocate(size).ok_or_else(|| ZoneError::OutOfMemory {
            requested: size,
            free: self.free_memory(),
        })
    }

    /// Allocate `size` payload bytes and zero the whole payload.
    ///
    /// Plain [`allocate`](Zone::allocate) hands back whatever a previous
    /// owner left in the block.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<Offset> {
        let payload = self.allocate(size)?;
        self.payload_mut(payload).fill(0);
        Some(payload)
    }

    /// Carve `needed` bytes out of the free block at `at`.
    fn claim(&mut self, at: Offset, mut h: BlockHeader, needed: usize) -> Offset {
        let leftover = h.size - needed;
        if leftover > self.min_fragment {
            let rest = advance(at, needed);
            let next = h.next;
            self.set_header(rest, &BlockHeader::new(leftover, BlockState::Free, at, next));
            let mut after = self.header(next);
            after.prev = rest;
            self.set_header(next, &after);
            h.next = rest;
            h.size = needed;
        }
        h.state = BlockState::Used.to_raw();
        h.tag = USED_TAG;
        self.set_header(at, &h);

        let following = if h.next == SENTINEL {
            self.header(SENTINEL).next
        } else {
            h.next
        };
        self.set_rover(following);
        advance(at, BLOCK_HEADER_SIZE)
    }

    /// Return the block behind `payload` to the zone.
    ///
    /// The block is merged with a free predecessor first and then with a
    /// free successor, restoring the no-adjacent-free invariant in one
    /// pass.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not point inside the zone's block area.
    /// With the `checked` feature, also panics when the block is not a
    /// live allocation (double free or foreign offset).
    pub fn free(&mut self, payload: Offset) {
        let mut block = block_of(payload);
        let mut h = self.header(block);
        check_live(block, &h);
        h.state = BlockState::Free.to_raw();
        h.tag = 0;
        self.set_header(block, &h);

        let prev = h.prev;
        let mut ph = self.header(prev);
        if ph.is_free() {
            self.absorb(prev, &mut ph, block, &h);
            block = prev;
            h = ph;
        }

        let next = h.next;
        let nh = self.header(next);
        if nh.is_free() {
            self.absorb(block, &mut h, next, &nh);
        }
    }

    /// Merge `victim` into its list predecessor `into`.
    fn absorb(
        &mut self,
        into: Offset,
        into_h: &mut BlockHeader,
        victim: Offset,
        victim_h: &BlockHeader,
    ) {
        into_h.size += victim_h.size;
        into_h.next = victim_h.next;
        self.set_header(into, into_h);
        let mut after = self.header(victim_h.next);
        after.prev = into;
        self.set_header(victim_h.next, &after);
        if self.rover() == victim {
            self.set_rover(into);
        }
    }

    /// Usable payload length of the allocation at `payload`.
    ///
    /// At least the requested size; larger when the request was rounded
    /// up or a small remainder was absorbed.
    pub fn payload_len(&self, payload: Offset) -> usize {
        self.header(block_of(payload))
            .size
            .saturating_sub(BLOCK_HEADER_SIZE)
    }

    /// Shared view of the payload at `payload`.
    pub fn payload(&self, payload: Offset) -> &[u8] {
        let start = index(payload);
        let len = self.payload_len(payload);
        &self.region.bytes()[start..start + len]
    }

    /// Mutable view of the payload at `payload`.
    pub fn payload_mut(&mut self, payload: Offset) -> &mut [u8] {
        let start = index(payload);
        let len = self.payload_len(payload);
        &mut self.region.bytes_mut()[start..start + len]
    }

    /// Live address of `offset` in the current buffer.
    ///
    /// Valid until the block is freed or the zone grows. Store the
    /// offset, not the address, across either.
    pub fn resolve(&self, offset: Offset) -> NonNull<u8> {
        self.region.ptr_at(index(offset))
    }

    /// Offset of a raw address inside this zone, if it lies inside it.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<Offset> {
        let base = self.region.base().as_ptr() as usize;
        let at = (ptr.as_ptr() as usize).checked_sub(base)?;
        if at >= self.total_size() {
            return None;
        }
        Offset::from_index(at)
    }

    /// Current base address. Changes on every growth.
    pub fn base(&self) -> NonNull<u8> {
        self.region.base()
    }

    /// The raw zone image, headers included.
    pub fn image(&self) -> &[u8] {
        self.region.bytes()
    }

    pub(crate) fn header(&self, at: Offset) -> BlockHeader {
        match self.try_header(at) {
            Some(h) => h,
            None => panic!("block header at {at} lies outside the zone"),
        }
    }

    /// Decode the header at `at`, or `None` if it does not fit the buffer.
    pub(crate) fn try_header(&self, at: Offset) -> Option<BlockHeader> {
        let start = at.to_index()?;
        let end = start.checked_add(BLOCK_HEADER_SIZE)?;
        BlockHeader::decode(self.region.bytes().get(start..end)?)
    }

    pub(crate) fn set_header(&mut self, at: Offset, h: &BlockHeader) {
        let start = index(at);
        match self.region.bytes_mut().get_mut(start..start + BLOCK_HEADER_SIZE) {
            Some(slot) => h.encode(slot),
            None => panic!("block header at {at} lies outside the zone"),
        }
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        debug!(total_size = self.total_size(), "zone released");
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("total_size", &self.total_size())
            .field("capacity", &self.capacity())
            .field("min_fragment", &self.min_fragment)
            .field("rover", &self.rover())
            .finish()
    }
}

pub(crate) fn advance(at: Offset, bytes: usize) -> Offset {
    // Buffers never exceed i64::MAX bytes (see `Zone::total_for`).
    Offset(at.get() + bytes as i64)
}

fn index(at: Offset) -> usize {
    match at.to_index() {
        Some(i) => i,
        None => panic!("offset {at} is negative"),
    }
}

fn block_of(payload: Offset) -> Offset {
    match payload.checked_sub(BLOCK_HEADER_SIZE) {
        Some(block) if block >= FIRST_BLOCK => block,
        _ => panic!("{payload} is not a payload offset"),
    }
}

#[cfg(feature = "checked")]
fn check_live(block: Offset, h: &BlockHeader) {
    if h.block_state() != Some(BlockState::Used) || h.tag != USED_TAG {
        panic!(
            "invalid free of block at {block}: state {:#x}, tag {:#x}",
            h.state, h.tag
        );
    }
}

#[cfg(not(feature = "checked"))]
#[inline(always)]
fn check_live(_block: Offset, _h: &BlockHeader) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::BlockInfo;

    fn states(zone: &Zone) -> Vec<(i64, usize, BlockState)> {
        zone.blocks()
            .map(|b: BlockInfo| (b.offset.get(), b.size, b.state))
            .collect()
    }

    #[test]
    fn new_zone_is_one_free_block() {
        let zone = Zone::create(1024).unwrap();
        assert_eq!(zone.capacity(), 1024);
        assert_eq!(zone.total_size(), 1024 + ZONE_HEADER_SIZE);
        assert_eq!(states(&zone), vec![(48, 1024, BlockState::Free)]);
        assert_eq!(zone.rover(), FIRST_BLOCK);
        assert!(zone.check_heap());
    }

    #[test]
    fn capacity_rounds_up() {
        let zone = Zone::create(100).unwrap();
        assert_eq!(zone.capacity(), 112);
        let tiny = Zone::create(1).unwrap();
        assert_eq!(tiny.capacity(), MIN_BLOCK_SIZE);
    }

    #[test]
    fn zero_capacity_is_config_error() {
        assert!(matches!(Zone::create(0), Err(ZoneError::Config(_))));
    }

    #[test]
    fn huge_capacity_overflows() {
        assert!(matches!(
            Zone::create(usize::MAX),
            Err(ZoneError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn allocate_splits_and_returns_payload_after_header() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(100).unwrap();
        assert_eq!(a, Offset(48 + 32));
        assert_eq!(zone.payload_len(a), 112);
        assert_eq!(
            states(&zone),
            vec![(48, 144, BlockState::Used), (192, 880, BlockState::Free)]
        );
        assert_eq!(zone.rover(), Offset(192));
        assert!(zone.check_heap());
    }

    #[test]
    fn consecutive_allocations_sweep_forward() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(16).unwrap();
        let b = zone.allocate(16).unwrap();
        let c = zone.allocate(16).unwrap();
        assert!(a < b && b < c);
        assert_eq!(b.get() - a.get(), 48);
        assert_eq!(c.get() - b.get(), 48);
    }

    #[test]
    fn rover_skips_sentinel_after_last_block() {
        let mut zone = Zone::create(256).unwrap();
        let _a = zone.allocate(224).unwrap();
        // The only block is now used and the sentinel follows it.
        assert_eq!(zone.rover(), FIRST_BLOCK);
        assert!(zone.check_heap());
    }

    #[test]
    fn search_wraps_around_to_earlier_free_block() {
        let mut zone = Zone::create(352).unwrap();
        let a = zone.allocate(96).unwrap();
        let _b = zone.allocate(64).unwrap();
        let _c = zone.allocate(16).unwrap();
        zone.free(a);
        // Rover sits on the 80-byte tail; the only fit is A's old block.
        assert_eq!(zone.rover(), Offset(320));
        let again = zone.allocate(96).unwrap();
        assert_eq!(again, a);
        assert!(zone.check_heap());
    }

    #[test]
    fn full_zone_returns_none_without_looping() {
        let mut zone = Zone::create(256).unwrap();
        zone.allocate(224).unwrap();
        assert_eq!(zone.allocate(1), None);
        assert_eq!(zone.free_memory(), 0);
        assert!(zone.check_heap());
    }

    #[test]
    fn try_allocate_reports_free_bytes() {
        let mut zone = Zone::create(1024).unwrap();
        zone.allocate(100).unwrap();
        assert_eq!(
            zone.try_allocate(2000),
            Err(ZoneError::OutOfMemory {
                requested: 2000,
                free: 880
            })
        );
    }

    #[test]
    fn overflowing_request_is_none() {
        let mut zone = Zone::create(1024).unwrap();
        assert_eq!(zone.allocate(usize::MAX), None);
    }

    #[test]
    fn zero_sized_request_gets_one_granule() {
        let mut zone = Zone::create(1024).unwrap();
        let p = zone.allocate(0).unwrap();
        assert_eq!(zone.payload_len(p), 16);
    }

    #[test]
    fn free_merges_with_both_neighbours() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let b = zone.allocate(64).unwrap();
        let c = zone.allocate(64).unwrap();
        zone.free(a);
        zone.free(c);
        assert_eq!(
            states(&zone),
            vec![
                (48, 96, BlockState::Free),
                (144, 96, BlockState::Used),
                (240, 832, BlockState::Free),
            ]
        );
        zone.free(b);
        assert_eq!(states(&zone), vec![(48, 1024, BlockState::Free)]);
        assert!(zone.check_heap());
    }

    #[test]
    fn rover_follows_absorbed_block() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        // Rover now points at the free remainder after A.
        assert_eq!(zone.rover(), Offset(144));
        zone.free(a);
        // The remainder was absorbed into A's block.
        assert_eq!(zone.rover(), Offset(48));
        assert!(zone.check_heap());
    }

    #[test]
    fn payload_is_writable_and_stable() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(32).unwrap();
        let b = zone.allocate(32).unwrap();
        zone.payload_mut(a).fill(0xAA);
        zone.payload_mut(b).fill(0xBB);
        assert!(zone.payload(a).iter().all(|&v| v == 0xAA));
        assert!(zone.payload(b).iter().all(|&v| v == 0xBB));
        assert!(zone.check_heap());
    }

    #[test]
    fn allocate_zeroed_clears_stale_bytes() {
        let mut zone = Zone::create(256).unwrap();
        let a = zone.allocate(64).unwrap();
        zone.payload_mut(a).fill(0xFF);
        zone.free(a);
        let b = zone.allocate_zeroed(64).unwrap();
        assert_eq!(b, a);
        assert!(zone.payload(b).iter().all(|&v| v == 0));
    }

    #[test]
    fn resolve_and_offset_of_agree() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(32).unwrap();
        let ptr = zone.resolve(a);
        assert_eq!(zone.offset_of(ptr), Some(a));
        assert_eq!(
            ptr.as_ptr() as usize - zone.base().as_ptr() as usize,
            a.get() as usize
        );
    }

    #[test]
    fn offset_of_rejects_foreign_address() {
        let zone = Zone::create(64).unwrap();
        let other = Zone::create(64).unwrap();
        let far = other.resolve(Offset(0));
        assert_eq!(zone.offset_of(far), None);
    }

    #[test]
    fn clear_discards_allocations() {
        let mut zone = Zone::create(1024).unwrap();
        zone.allocate(100).unwrap();
        zone.allocate(200).unwrap();
        zone.clear();
        assert_eq!(states(&zone), vec![(48, 1024, BlockState::Free)]);
        assert_eq!(zone.rover(), FIRST_BLOCK);
    }

    #[test]
    #[should_panic(expected = "is not a payload offset")]
    fn freeing_header_area_panics() {
        let mut zone = Zone::create(1024).unwrap();
        zone.free(Offset(40));
    }

    #[test]
    #[should_panic(expected = "outside the zone")]
    fn freeing_past_end_panics() {
        let mut zone = Zone::create(1024).unwrap();
        zone.free(Offset(1 << 20));
    }

    #[test]
    fn allocation_is_tagged_in_every_build() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        assert_eq!(zone.header(block_of(a)).tag, USED_TAG);
        zone.free(a);
        assert_eq!(zone.header(block_of(a)).tag, 0);
    }

    #[test]
    fn split_remainder_is_linked_both_ways() {
        let mut zone = Zone::create(256).unwrap();
        let a = zone.allocate(128).unwrap();
        let block = block_of(a);
        let rest = Offset(208);
        assert_eq!(zone.header(block).next, rest);
        let rest_h = zone.header(rest);
        assert_eq!(rest_h.prev, block);
        assert_eq!(rest_h.next, SENTINEL);
        assert_eq!(zone.header(SENTINEL).prev, rest);
        assert!(zone.check_heap());
    }

    #[cfg(feature = "checked")]
    mod checked {
        use super::*;

        #[test]
        #[should_panic(expected = "invalid free")]
        fn double_free_is_fatal() {
            let mut zone = Zone::create(1024).unwrap();
            let a = zone.allocate(64).unwrap();
            let _b = zone.allocate(64).unwrap();
            zone.free(a);
            zone.free(a);
        }

        #[test]
        #[should_panic(expected = "invalid free")]
        fn free_of_absorbed_block_is_fatal() {
            let mut zone = Zone::create(1024).unwrap();
            let a = zone.allocate(64).unwrap();
            let b = zone.allocate(64).unwrap();
            zone.free(a);
            zone.free(b);
            zone.free(b);
        }
    }
}
