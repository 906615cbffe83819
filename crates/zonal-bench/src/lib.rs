//! Benchmark profiles for the Zonal zone allocator.
//!
//! - [`request_sizes`]: deterministic mixed request sizes via seed
//! - [`fragmented_zone`]: a zone pre-churned into a realistic free list

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use zonal_core::Offset;
use zonal_zone::Zone;

/// Generate `n` request sizes in `1..=max`, skewed towards small ones.
///
/// Three in four requests fall in the lowest eighth of the range, which
/// is roughly how entity components and short strings are sized.
pub fn request_sizes(n: usize, max: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let max = max.max(8);
    (0..n)
        .map(|_| {
            if rng.random_bool(0.75) {
                rng.random_range(1..=max / 8)
            } else {
                rng.random_range(1..=max)
            }
        })
        .collect()
}

/// Build a zone of `capacity` bytes, fill it with `sizes`, then free
/// every other allocation.
///
/// Returns the zone and the offsets still live. Useful as a starting
/// point for measuring search cost on a fragmented free list.
pub fn fragmented_zone(capacity: usize, sizes: &[usize]) -> (Zone, Vec<Offset>) {
    let mut zone = match Zone::create(capacity) {
        Ok(zone) => zone,
        Err(e) => panic!("benchmark zone of {capacity} bytes: {e}"),
    };
    let held: Vec<Offset> = sizes.iter().filter_map(|&s| zone.allocate(s)).collect();
    let mut live = Vec::with_capacity(held.len() / 2 + 1);
    for (i, at) in held.into_iter().enumerate() {
        if i % 2 == 0 {
            zone.free(at);
        } else {
            live.push(at);
        }
    }
    (zone, live)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sizes_are_deterministic_and_in_range() {
        let a = request_sizes(500, 256, 3);
        assert_eq!(a, request_sizes(500, 256, 3));
        assert!(a.iter().all(|&s| (1..=256).contains(&s)));
    }

    #[test]
    fn fragmented_zone_is_consistent() {
        let sizes = request_sizes(200, 128, 1);
        let (zone, live) = fragmented_zone(64 * 1024, &sizes);
        assert!(zone.check_heap());
        assert_eq!(live.len(), 100);
        assert!(zone.stats().free_block_count > 1);
    }
}
