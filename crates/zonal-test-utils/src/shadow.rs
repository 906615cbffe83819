//! Shadow model of a zone's live allocations.

use indexmap::IndexMap;
use zonal_core::Offset;
use zonal_zone::{Zone, BLOCK_HEADER_SIZE};

/// A zone paired with the bytes each live allocation should hold.
///
/// Every allocation is filled with a pattern derived from a running
/// counter, so overlapping or moved payloads show up as content
/// mismatches in [`verify`](ShadowZone::verify).
pub struct ShadowZone {
    zone: Zone,
    live: IndexMap<Offset, Vec<u8>>,
    stamp: u8,
}

impl ShadowZone {
    pub fn new(zone: Zone) -> Self {
        Self {
            zone,
            live: IndexMap::new(),
            stamp: 0,
        }
    }

    pub fn create(capacity: usize) -> Self {
        Self::new(Zone::create(capacity).expect("test zone creation"))
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn into_zone(self) -> Zone {
        self.zone
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live(&self) -> impl Iterator<Item = (Offset, &[u8])> {
        self.live.iter().map(|(at, bytes)| (*at, bytes.as_slice()))
    }

    /// Allocate `size` bytes and fill them with a fresh pattern.
    pub fn allocate(&mut self, size: usize) -> Option<Offset> {
        let at = self.zone.allocate(size)?;
        self.stamp = self.stamp.wrapping_add(1);
        let bytes: Vec<u8> = (0..size)
            .map(|i| self.stamp.wrapping_add(i as u8))
            .collect();
        self.zone.payload_mut(at)[..size].copy_from_slice(&bytes);
        let previous = self.live.insert(at, bytes);
        assert!(previous.is_none(), "zone handed out live offset {at} twice");
        Some(at)
    }

    /// Free the `nth` live allocation (in insertion order, modulo the
    /// live count). Returns the freed offset, or `None` if nothing is live.
    pub fn free_nth(&mut self, nth: usize) -> Option<Offset> {
        if self.live.is_empty() {
            return None;
        }
        let (at, _) = self.live.swap_remove_index(nth % self.live.len())?;
        self.zone.free(at);
        Some(at)
    }

    pub fn free(&mut self, at: Offset) {
        assert!(
            self.live.swap_remove(&at).is_some(),
            "{at} is not live in the shadow model"
        );
        self.zone.free(at);
    }

    /// Grow the zone, keeping every live allocation.
    pub fn grow(&mut self, new_capacity: usize) {
        self.zone
            .grow_in_place(new_capacity)
            .expect("test zone growth");
    }

    /// Check the zone against the model.
    ///
    /// Verifies heap consistency, conservation of bytes, that every live
    /// payload still holds its pattern, and that the used blocks are
    /// exactly the live allocations.
    pub fn verify(&self) -> Result<(), String> {
        let report = self.zone.check_heap_report();
        if !report.is_consistent() {
            return Err(report.to_string());
        }

        let stats = self.zone.stats();
        if stats.used_bytes + stats.free_bytes != stats.capacity {
            return Err(format!(
                "conservation: {} used + {} free != {} capacity",
                stats.used_bytes, stats.free_bytes, stats.capacity
            ));
        }
        if stats.free_bytes != self.zone.free_memory() {
            return Err(format!(
                "free_memory {} disagrees with block walk {}",
                self.zone.free_memory(),
                stats.free_bytes
            ));
        }

        let used: Vec<Offset> = self
            .zone
            .blocks()
            .filter(|b| !b.state.is_free())
            .map(|b| b.payload())
            .collect();
        if used.len() != self.live.len() {
            return Err(format!(
                "{} used blocks, {} live allocations",
                used.len(),
                self.live.len()
            ));
        }
        if let Some(stray) = used.iter().find(|at| !self.live.contains_key(*at)) {
            return Err(format!("used block at {stray} is not live"));
        }

        let mut live_bytes = 0;
        for (at, expected) in &self.live {
            let payload = self.zone.payload(*at);
            if payload.len() < expected.len() {
                return Err(format!(
                    "payload at {at} shrank to {} bytes, wrote {}",
                    payload.len(),
                    expected.len()
                ));
            }
            if &payload[..expected.len()] != expected.as_slice() {
                return Err(format!("payload at {at} was overwritten"));
            }
            live_bytes += payload.len() + BLOCK_HEADER_SIZE;
        }
        if live_bytes != stats.used_bytes {
            return Err(format!(
                "live allocations span {live_bytes} bytes, used blocks {}",
                stats.used_bytes
            ));
        }
        Ok(())
    }
}
