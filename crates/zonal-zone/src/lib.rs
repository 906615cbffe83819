//! Offset-addressed zone allocator.
//!
//! A [`Zone`] carves variable-size blocks out of one contiguous buffer.
//! Every link inside the buffer is an [`Offset`] from the zone base, so
//! the whole zone is a plain byte image: it can be copied into a larger
//! buffer ([`Zone::grow`]) or exported and re-imported
//! ([`Zone::image`], [`Zone::from_image`]) without pointer fixups.
//!
//! # Architecture
//!
//! ```text
//! Zone (owned handle)
//! ├── RawRegion (zeroed, 16-aligned heap buffer; the only unsafe code)
//! └── image
//!     ├── zone header: size, sentinel block, rover
//!     └── blocks: [header | payload] … contiguous, circular doubly linked
//! ```
//!
//! Allocation is next-fit: the search starts at the rover (the block
//! after the last allocation) and walks the ring once. Blocks are split
//! when the remainder exceeds the fragment threshold. Frees coalesce with
//! both neighbours, so no two adjacent blocks are ever free.
//!
//! # Features
//!
//! - `checked`: panic on a free of a block that is not live. Every build
//!   stamps handed-out blocks with [`USED_TAG`], so images move freely
//!   between checked and unchecked builds.
//!
//! # Threading
//!
//! `Zone` is `Send + Sync` with no internal locking; mutation takes
//! `&mut self`. Use one zone per thread, or [`SharedZone`] when several
//! producers need the same zone.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod block;
pub mod config;
pub mod diag;
pub mod grow;
mod raw;
pub mod shared;
pub mod stats;
pub mod zone;

// Public re-exports for the primary API surface.
pub use block::{BLOCK_HEADER_SIZE, GRANULE, MIN_BLOCK_SIZE, USED_TAG, ZONE_HEADER_SIZE};
pub use config::ZoneConfig;
pub use diag::{BlockInfo, Blocks, HeapDump, HeapFinding, HeapReport};
pub use grow::GrowError;
pub use shared::SharedZone;
pub use stats::ZoneStats;
pub use zone::Zone;
pub use zonal_core::{BlockState, ConfigError, Offset, ZoneError};
