//! Heap-consistency checks, dumps, and free-space queries.
//!
//! Nothing here runs on the allocate/free path. The walkers decode
//! headers through bounds-checked reads and cap the number of steps, so
//! they report a corrupted image instead of panicking or spinning on it.

use std::fmt;

use smallvec::SmallVec;
use tracing::warn;
use zonal_core::{BlockState, Offset};

use crate::block::{block_size_for, BLOCK_HEADER_SIZE, GRANULE, SENTINEL, ZONE_HEADER_SIZE};
use crate::zone::{advance, Zone};

/// One block as seen by the diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block offset (the header, not the payload).
    pub offset: Offset,
    /// Total block size, header included.
    pub size: usize,
    /// Free or used.
    pub state: BlockState,
}

impl BlockInfo {
    /// Offset of the payload that follows the header.
    pub fn payload(&self) -> Offset {
        advance(self.offset, BLOCK_HEADER_SIZE)
    }
}

/// Iterator over the real blocks of a zone in list order.
///
/// Stops early at the first header it cannot decode.
pub struct Blocks<'a> {
    zone: &'a Zone,
    cur: Offset,
    remaining: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cur == SENTINEL || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let h = self.zone.try_header(self.cur)?;
        let info = BlockInfo {
            offset: self.cur,
            size: h.size,
            state: h.block_state()?,
        };
        self.cur = h.next;
        Some(info)
    }
}

/// A structural problem found by [`Zone::check_heap_report`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeapFinding {
    /// A link points outside the block area or at a misaligned offset.
    BadLink {
        /// Block whose `next` link is bad.
        from: Offset,
        /// The offending target.
        target: Offset,
    },
    /// `next.prev` does not point back at the block.
    BrokenBackLink {
        /// Block whose `prev` link is wrong.
        block: Offset,
        /// What `prev` should have been.
        expected_prev: Offset,
        /// What `prev` actually is.
        found_prev: Offset,
    },
    /// A block does not start where its predecessor ends.
    NotContiguous {
        /// The misplaced block.
        block: Offset,
        /// Where it should have started.
        expected: Offset,
    },
    /// Two list-adjacent blocks are both free.
    AdjacentFree {
        /// The first free block.
        first: Offset,
        /// The free block that follows it.
        second: Offset,
    },
    /// A block size is smaller than a header or not granule aligned.
    BadSize {
        /// The block.
        block: Offset,
        /// Its recorded size.
        size: usize,
    },
    /// A block state is neither free nor used.
    BadState {
        /// The block.
        block: Offset,
        /// Raw encoded state.
        raw: u32,
    },
    /// The sentinel is not marked used, so it could be coalesced.
    SentinelNotUsed,
    /// Block sizes do not add up to the zone capacity.
    SizeMismatch {
        /// Sum of all block sizes.
        total: usize,
        /// Zone capacity.
        expected: usize,
    },
    /// The rover does not point at a real block of this zone.
    RoverInvalid {
        /// The rover value.
        rover: Offset,
    },
    /// Following `next` never led back to the sentinel.
    RingNotClosed {
        /// Number of blocks visited before giving up.
        visited: usize,
    },
}

impl fmt::Display for HeapFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLink { from, target } => {
                write!(f, "block {from}: next link {target} is not a block")
            }
            Self::BrokenBackLink {
                block,
                expected_prev,
                found_prev,
            } => write!(
                f,
                "block {block}: prev is {found_prev}, expected {expected_prev}"
            ),
            Self::NotContiguous { block, expected } => {
                write!(f, "block {block}: expected to start at {expected}")
            }
            Self::AdjacentFree { first, second } => {
                write!(f, "blocks {first} and {second} are both free")
            }
            Self::BadSize { block, size } => write!(f, "block {block}: bad size {size}"),
            Self::BadState { block, raw } => write!(f, "block {block}: bad state {raw:#x}"),
            Self::SentinelNotUsed => write!(f, "sentinel block is not marked used"),
            Self::SizeMismatch { total, expected } => {
                write!(f, "block sizes sum to {total}, zone capacity is {expected}")
            }
            Self::RoverInvalid { rover } => write!(f, "rover {rover} is not a block"),
            Self::RingNotClosed { visited } => {
                write!(f, "block list did not return to the sentinel after {visited} blocks")
            }
        }
    }
}

/// Result of a verbose heap check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapReport {
    findings: SmallVec<[HeapFinding; 4]>,
    blocks_visited: usize,
}

impl HeapReport {
    /// No violations were found.
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }

    /// Every violation, in walk order.
    pub fn findings(&self) -> &[HeapFinding] {
        &self.findings
    }

    /// Number of real blocks the walk reached.
    pub fn blocks_visited(&self) -> usize {
        self.blocks_visited
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() {
            return write!(f, "heap consistent ({} blocks)", self.blocks_visited);
        }
        writeln!(
            f,
            "heap inconsistent: {} finding(s) over {} blocks",
            self.findings.len(),
            self.blocks_visited
        )?;
        for finding in &self.findings {
            writeln!(f, "  {finding}")?;
        }
        Ok(())
    }
}

/// Ordered listing of every block, for inspection tooling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapDump {
    /// Zone total size, header included.
    pub total_size: usize,
    /// Rover at the time of the dump.
    pub rover: Offset,
    /// Blocks in list order.
    pub blocks: Vec<BlockInfo>,
}

impl fmt::Display for HeapDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "zone: {} bytes, rover {}", self.total_size, self.rover)?;
        for block in &self.blocks {
            let marker = if block.offset == self.rover { " <- rover" } else { "" };
            writeln!(
                f,
                "  {:>10} {:>10} {}{}",
                block.offset.to_string(),
                block.size,
                block.state,
                marker
            )?;
        }
        Ok(())
    }
}

impl Zone {
    /// Upper bound on the number of real blocks an intact zone can hold.
    fn max_blocks(&self) -> usize {
        self.capacity() / BLOCK_HEADER_SIZE + 1
    }

    /// Whether `at` is a place a real block header may live.
    fn is_block_offset(&self, at: Offset) -> bool {
        match at.to_index() {
            Some(i) => {
                i >= ZONE_HEADER_SIZE
                    && i % GRANULE == 0
                    && i + BLOCK_HEADER_SIZE <= self.total_size()
            }
            None => false,
        }
    }

    /// Iterate over the real blocks in list order.
    pub fn blocks(&self) -> Blocks<'_> {
        let first = self
            .try_header(SENTINEL)
            .map(|h| h.next)
            .unwrap_or(SENTINEL);
        Blocks {
            zone: self,
            cur: first,
            remaining: self.max_blocks(),
        }
    }

    /// Sum of the sizes of all free blocks, headers included.
    pub fn free_memory(&self) -> usize {
        self.blocks()
            .filter(|b| b.state.is_free())
            .map(|b| b.size)
            .sum()
    }

    /// Whether one free block could satisfy `allocate(size)` right now.
    pub fn has_free_block(&self, size: usize) -> bool {
        let Some(needed) = block_size_for(size) else {
            return false;
        };
        self.blocks().any(|b| b.state.is_free() && b.size >= needed)
    }

    /// Check every structural invariant.
    pub fn check_heap(&self) -> bool {
        self.check_heap_report().is_consistent()
    }

    /// Check every structural invariant and describe each violation.
    pub fn check_heap_report(&self) -> HeapReport {
        let mut report = HeapReport::default();
        let Some(sentinel) = self.try_header(SENTINEL) else {
            report.findings.push(HeapFinding::BadLink {
                from: SENTINEL,
                target: SENTINEL,
            });
            return report;
        };
        if sentinel.block_state() != Some(BlockState::Used) {
            report.findings.push(HeapFinding::SentinelNotUsed);
        }

        let rover = self.rover();
        let mut rover_seen = false;
        let mut cur = SENTINEL;
        let mut cur_h = sentinel;
        let mut expected = advance(Offset::ZERO, ZONE_HEADER_SIZE);
        let mut prev_free = false;
        let mut total = 0usize;
        let limit = self.max_blocks();

        loop {
            let next = cur_h.next;
            let next_h = if next == SENTINEL {
                sentinel
            } else if self.is_block_offset(next) {
                match self.try_header(next) {
                    Some(h) => h,
                    None => {
                        let finding = HeapFinding::BadLink {
                            from: cur,
                            target: next,
                        };
                        return self.finish(report, finding);
                    }
                }
            } else {
                let finding = HeapFinding::BadLink {
                    from: cur,
                    target: next,
                };
                return self.finish(report, finding);
            };

            if next_h.prev != cur {
                report.findings.push(HeapFinding::BrokenBackLink {
                    block: next,
                    expected_prev: cur,
                    found_prev: next_h.prev,
                });
            }
            if next == SENTINEL {
                break;
            }
            if report.blocks_visited == limit {
                let visited = report.blocks_visited;
                return self.finish(report, HeapFinding::RingNotClosed { visited });
            }
            report.blocks_visited += 1;

            if next != expected {
                report.findings.push(HeapFinding::NotContiguous {
                    block: next,
                    expected,
                });
            }
            if next == rover {
                rover_seen = true;
            }
            let free = match next_h.block_state() {
                Some(state) => state.is_free(),
                None => {
                    report.findings.push(HeapFinding::BadState {
                        block: next,
                        raw: next_h.state,
                    });
                    false
                }
            };
            if next_h.size < BLOCK_HEADER_SIZE
                || next_h.size % GRANULE != 0
                || next_h.size > self.capacity()
            {
                return self.finish(
                    report,
                    HeapFinding::BadSize {
                        block: next,
                        size: next_h.size,
                    },
                );
            }
            if prev_free && free {
                report.findings.push(HeapFinding::AdjacentFree {
                    first: cur,
                    second: next,
                });
            }

            prev_free = free;
            total += next_h.size;
            expected = advance(next, next_h.size);
            cur = next;
            cur_h = next_h;
        }

        if total != self.capacity() {
            report.findings.push(HeapFinding::SizeMismatch {
                total,
                expected: self.capacity(),
            });
        }
        if !rover_seen {
            report.findings.push(HeapFinding::RoverInvalid { rover });
        }
        self.log_findings(&report);
        report
    }

    fn finish(&self, mut report: HeapReport, finding: HeapFinding) -> HeapReport {
        report.findings.push(finding);
        self.log_findings(&report);
        report
    }

    fn log_findings(&self, report: &HeapReport) {
        if !report.is_consistent() {
            warn!(
                findings = report.findings.len(),
                first = %report.findings[0],
                "zone heap check failed"
            );
        }
    }

    /// Ordered listing of every block's offset, size, and state.
    pub fn dump_heap(&self) -> HeapDump {
        HeapDump {
            total_size: self.total_size(),
            rover: self.rover(),
            blocks: self.blocks().collect(),
        }
    }

    /// Overwrite the header at `at` (test hook for corruption scenarios).
    #[cfg(test)]
    pub(crate) fn poke_header(
        &mut self,
        at: Offset,
        f: impl FnOnce(&mut crate::block::BlockHeader),
    ) {
        let mut h = self.header(at);
        f(&mut h);
        self.set_header(at, &h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_zone_is_consistent() {
        let zone = Zone::create(1024).unwrap();
        let report = zone.check_heap_report();
        assert!(report.is_consistent(), "{report}");
        assert_eq!(report.blocks_visited(), 1);
        assert_eq!(zone.free_memory(), 1024);
    }

    #[test]
    fn has_free_block_matches_allocate() {
        let mut zone = Zone::create(1024).unwrap();
        zone.allocate(100).unwrap();
        // 880 free bytes in one block: 848 of payload.
        assert!(zone.has_free_block(848));
        assert!(!zone.has_free_block(849));
        assert!(zone.allocate(848).is_some());
        assert!(!zone.has_free_block(1));
    }

    #[test]
    fn detects_adjacent_free_blocks() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let block = a.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        // Mark A free behind the allocator's back: it now touches the free tail.
        zone.poke_header(block, |h| h.state = BlockState::Free.to_raw());
        let report = zone.check_heap_report();
        assert!(report
            .findings()
            .iter()
            .any(|f| matches!(f, HeapFinding::AdjacentFree { .. })));
        assert!(!zone.check_heap());
    }

    #[test]
    fn detects_broken_back_link() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let b = zone.allocate(64).unwrap();
        let b_block = b.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        zone.poke_header(b_block, |h| h.prev = Offset(999));
        let report = zone.check_heap_report();
        assert!(report.findings().contains(&HeapFinding::BrokenBackLink {
            block: b_block,
            expected_prev: a.checked_sub(BLOCK_HEADER_SIZE).unwrap(),
            found_prev: Offset(999),
        }));
    }

    #[test]
    fn detects_size_corruption_without_panicking() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let block = a.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        zone.poke_header(block, |h| h.size = 8);
        let report = zone.check_heap_report();
        assert!(matches!(
            report.findings().last(),
            Some(HeapFinding::BadSize { size: 8, .. })
        ));
    }

    #[test]
    fn detects_gap_between_blocks() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let block = a.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        zone.poke_header(block, |h| h.size = 80);
        let report = zone.check_heap_report();
        assert!(report
            .findings()
            .iter()
            .any(|f| matches!(f, HeapFinding::NotContiguous { .. })));
        assert!(report
            .findings()
            .iter()
            .any(|f| matches!(f, HeapFinding::SizeMismatch { .. })));
    }

    #[test]
    fn detects_wild_link() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let block = a.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        zone.poke_header(block, |h| h.next = Offset(1 << 30));
        let report = zone.check_heap_report();
        assert_eq!(
            report.findings().last(),
            Some(&HeapFinding::BadLink {
                from: block,
                target: Offset(1 << 30)
            })
        );
        // Iteration stops instead of panicking.
        assert_eq!(zone.blocks().count(), 1);
    }

    #[test]
    fn detects_self_loop() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(64).unwrap();
        let block = a.checked_sub(BLOCK_HEADER_SIZE).unwrap();
        zone.poke_header(block, |h| {
            h.next = block;
            h.prev = block;
        });
        let report = zone.check_heap_report();
        assert!(matches!(
            report.findings().last(),
            Some(HeapFinding::RingNotClosed { .. })
        ));
        assert!(zone.blocks().count() <= 1024 / BLOCK_HEADER_SIZE + 1);
    }

    #[test]
    fn detects_stray_rover() {
        let mut zone = Zone::create(1024).unwrap();
        zone.set_rover(Offset(64));
        assert!(zone
            .check_heap_report()
            .findings()
            .contains(&HeapFinding::RoverInvalid { rover: Offset(64) }));
    }

    #[test]
    fn dump_lists_blocks_in_order() {
        let mut zone = Zone::create(1024).unwrap();
        let a = zone.allocate(100).unwrap();
        let dump = zone.dump_heap();
        assert_eq!(dump.blocks.len(), 2);
        assert_eq!(dump.blocks[0].payload(), a);
        assert_eq!(dump.blocks[0].state, BlockState::Used);
        assert_eq!(dump.blocks[1].state, BlockState::Free);
        let text = dump.to_string();
        assert!(text.starts_with("zone: 1072 bytes"));
        assert!(text.contains("USED"));
        assert!(text.contains("FREE <- rover"));
    }

    #[test]
    fn report_display_lists_findings() {
        let mut zone = Zone::create(1024).unwrap();
        zone.set_rover(Offset(64));
        let text = zone.check_heap_report().to_string();
        assert!(text.starts_with("heap inconsistent"));
        assert!(text.contains("rover +0x40 is not a block"));
    }
}
