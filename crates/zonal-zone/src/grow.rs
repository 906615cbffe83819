//! Zone growth and image import.
//!
//! Both operations build a new buffer and copy a whole image into it.
//! Block links are offsets, so the copy needs no pointer fixup; only the
//! zone size and the topmost block change.

use std::error::Error;
use std::fmt;

use tracing::debug;
use zonal_core::{BlockState, Offset, ZoneError};

use crate::block::{
    read_u64, round_up, write_bytes, BlockHeader, MIN_BLOCK_SIZE, SENTINEL, USED_TAG,
    ZONE_HEADER_SIZE, ZONE_SIZE_AT,
};
use crate::config::ZoneConfig;
use crate::raw::RawRegion;
use crate::zone::Zone;

/// A failed [`Zone::grow`] or [`Zone::grow_for`].
///
/// Growth copies into a fresh buffer and only swaps it in once every
/// step has succeeded, so on failure the zone is unchanged. It travels
/// back inside the error; take it out with [`into_zone`](Self::into_zone).
#[derive(Debug)]
pub struct GrowError {
    zone: Zone,
    source: ZoneError,
}

impl GrowError {
    /// Why growth failed.
    pub fn error(&self) -> &ZoneError {
        &self.source
    }

    /// Recover the untouched zone.
    pub fn into_zone(self) -> Zone {
        self.zone
    }

    /// Split into the untouched zone and the cause.
    pub fn into_parts(self) -> (Zone, ZoneError) {
        (self.zone, self.source)
    }
}

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone growth failed: {}", self.source)
    }
}

impl Error for GrowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl From<GrowError> for ZoneError {
    /// Keep the cause and release the zone.
    fn from(e: GrowError) -> Self {
        e.source
    }
}

impl Zone {
    /// Replace this zone with one of `new_capacity` payload bytes.
    ///
    /// Returns `self` untouched when the rounded capacity is not larger
    /// than the current one. Otherwise the image is copied verbatim into
    /// a larger buffer and the extra space is appended to the topmost
    /// block: a free top block is extended, a used one gets a new free
    /// block after it (and the rover moves there). If the extra space is
    /// too small to hold a block of its own, it is rounded up to one.
    ///
    /// The old buffer is released. Every [`Offset`] stays valid; every
    /// address obtained from [`resolve`](Zone::resolve) does not. On
    /// failure the zone comes back unchanged inside the [`GrowError`].
    pub fn grow(mut self, new_capacity: usize) -> Result<Zone, GrowError> {
        match self.grow_in_place(new_capacity) {
            Ok(()) => Ok(self),
            Err(source) => Err(GrowError { zone: self, source }),
        }
    }

    /// [`grow`](Zone::grow) for a zone that cannot be moved out of its
    /// owner, such as one behind a lock. The zone keeps its identity but
    /// its base address changes.
    pub fn grow_in_place(&mut self, new_capacity: usize) -> Result<(), ZoneError> {
        let requested = round_up(new_capacity).ok_or(ZoneError::CapacityOverflow {
            requested: new_capacity,
        })?;
        let old_capacity = self.capacity();
        if requested <= old_capacity {
            return Ok(());
        }

        let top = self.header(SENTINEL).prev;
        let mut top_h = self.header(top);
        let mut extra = requested - old_capacity;
        if !top_h.is_free() {
            extra = extra.max(MIN_BLOCK_SIZE);
        }
        let old_total = self.total_size();
        let total = Zone::total_for(old_capacity + extra)?;

        let mut region = RawRegion::zeroed(total)?;
        region.bytes_mut()[..old_total].copy_from_slice(self.region.bytes());
        let mut grown = Zone {
            region,
            min_fragment: self.min_fragment,
        };
        write_bytes(
            grown.region.bytes_mut(),
            ZONE_SIZE_AT,
            &(total as u64).to_le_bytes(),
        );

        if top_h.is_free() {
            top_h.size += extra;
            grown.set_header(top, &top_h);
        } else {
            let fresh = Offset(old_total as i64);
            grown.set_header(fresh, &BlockHeader::new(extra, BlockState::Free, top, SENTINEL));
            top_h.next = fresh;
            grown.set_header(top, &top_h);
            let mut sentinel = grown.header(SENTINEL);
            sentinel.prev = fresh;
            grown.set_header(SENTINEL, &sentinel);
            grown.set_rover(fresh);
        }

        debug!(
            old_capacity,
            new_capacity = grown.capacity(),
            extra,
            "zone grown"
        );
        // `grown` leaves with the old buffer and releases it.
        std::mem::swap(&mut self.region, &mut grown.region);
        Ok(())
    }

    /// Grow, if needed, until one free block can hold `size` bytes.
    ///
    /// Doubles the capacity, or grows by exactly the request when that is
    /// larger, so repeated calls amortise the copy.
    pub fn grow_for(mut self, size: usize) -> Result<Zone, GrowError> {
        match self.grow_for_in_place(size) {
            Ok(()) => Ok(self),
            Err(source) => Err(GrowError { zone: self, source }),
        }
    }

    /// [`grow_for`](Zone::grow_for) through `&mut self`. The zone is
    /// unchanged on error.
    pub fn grow_for_in_place(&mut self, size: usize) -> Result<(), ZoneError> {
        if self.has_free_block(size) {
            return Ok(());
        }
        let needed = crate::block::block_size_for(size)
            .ok_or(ZoneError::CapacityOverflow { requested: size })?;
        let capacity = self.capacity();
        let target = capacity
            .checked_mul(2)
            .into_iter()
            .chain(capacity.checked_add(needed))
            .max()
            .ok_or(ZoneError::CapacityOverflow { requested: size })?;
        self.grow_in_place(target)
    }

    /// Rebuild a zone from an image produced by [`image`](Zone::image).
    ///
    /// The bytes are copied into a fresh buffer and checked with the full
    /// heap diagnostics; any violation rejects the image.
    pub fn from_image(image: &[u8]) -> Result<Zone, ZoneError> {
        Self::from_image_with_config(image, ZoneConfig::DEFAULT_MIN_FRAGMENT)
    }

    /// [`from_image`](Zone::from_image) with an explicit fragment threshold.
    pub fn from_image_with_config(image: &[u8], min_fragment: usize) -> Result<Zone, ZoneError> {
        let invalid = |reason: String| ZoneError::InvalidImage { reason };
        ZoneConfig::new(image.len())
            .with_min_fragment(min_fragment)
            .validate()?;
        if image.len() < ZONE_HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(invalid(format!("{} bytes is too short", image.len())));
        }
        if Zone::total_for(image.len() - ZONE_HEADER_SIZE)? != image.len() {
            return Err(invalid(format!(
                "{} bytes is not granule aligned",
                image.len()
            )));
        }
        let recorded = read_u64(image, ZONE_SIZE_AT).unwrap_or(0);
        if recorded != image.len() as u64 {
            return Err(invalid(format!(
                "header records {recorded} bytes, image has {}",
                image.len()
            )));
        }

        let mut region = RawRegion::zeroed(image.len())?;
        region.bytes_mut().copy_from_slice(image);
        let mut zone = Zone {
            region,
            min_fragment,
        };
        let report = zone.check_heap_report();
        if let Some(first) = report.findings().first() {
            return Err(invalid(first.to_string()));
        }
        // Images written before tags were stamped carry 0 on used blocks.
        let used: Vec<Offset> = zone
            .blocks()
            .filter(|b| !b.state.is_free())
            .map(|b| b.offset)
            .collect();
        for at in used {
            let mut h = zone.header(at);
            h.tag = USED_TAG;
            zone.set_header(at, &h);
        }
        debug!(capacity = zone.capacity(), "zone imported from image");
        Ok(zone)
    }
}
