//! Occupancy statistics for telemetry.

use crate::zone::Zone;

/// Snapshot of a zone's occupancy.
///
/// All sizes are in bytes and count block headers. Computed by walking
/// the block list, so it costs O(blocks); collect it between frames, not
/// per allocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZoneStats {
    /// Payload capacity (total size minus the zone header).
    pub capacity: usize,
    /// Total buffer size, zone header included.
    pub total_size: usize,
    /// Bytes in used blocks.
    pub used_bytes: usize,
    /// Bytes in free blocks.
    pub free_bytes: usize,
    /// Number of real blocks.
    pub block_count: usize,
    /// Number of free blocks.
    pub free_block_count: usize,
    /// Size of the largest free block.
    pub largest_free_block: usize,
}

impl ZoneStats {
    /// Share of free bytes that are not in the largest free block.
    ///
    /// 0.0 when all free space is one block (or there is none), tending
    /// to 1.0 as free space splinters.
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block as f64 / self.free_bytes as f64
    }
}

impl Zone {
    /// Walk the block list and summarise occupancy.
    pub fn stats(&self) -> ZoneStats {
        let mut stats = ZoneStats {
            capacity: self.capacity(),
            total_size: self.total_size(),
            ..ZoneStats::default()
        };
        for block in self.blocks() {
            stats.block_count += 1;
            if block.state.is_free() {
                stats.free_bytes += block.size;
                stats.free_block_count += 1;
                stats.largest_free_block = stats.largest_free_block.max(block.size);
            } else {
                stats.used_bytes += block.size;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_zone_stats() {
        let zone = Zone::create(1024).unwrap();
        let stats = zone.stats();
        assert_eq!(stats.capacity, 1024);
        assert_eq!(stats.total_size, 1072);
        assert_eq!(stats.free_bytes, 1024);
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.block_count, 1);
        assert_eq!(stats.fragmentation(), 0.0);
    }

    #[test]
    fn used_and_free_add_up() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let _b = zone.allocate(64).unwrap();
        zone.free(a);
        let stats = zone.stats();
        assert_eq!(stats.used_bytes + stats.free_bytes, stats.capacity);
        assert_eq!(stats.free_block_count, 2);
        assert_eq!(stats.largest_free_block, 1024 - 192);
        assert!(stats.fragmentation() > 0.0 && stats.fragmentation() < 1.0);
    }

    #[test]
    fn full_zone_has_no_fragmentation() {
        let mut zone = Zone::create(256).unwrap();
        zone.allocate(224).unwrap();
        let stats = zone.stats();
        assert_eq!(stats.free_bytes, 0);
        assert_eq!(stats.fragmentation(), 0.0);
    }
}
