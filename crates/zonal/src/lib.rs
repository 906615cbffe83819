//! Zonal: an offset-addressed zone allocator.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Zonal sub-crates. For most users, adding `zonal` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use zonal::prelude::*;
//!
//! let mut zone = Zone::create(1024).unwrap();
//! let name = zone.allocate(16).unwrap();
//! zone.payload_mut(name)[..5].copy_from_slice(b"zonal");
//!
//! // Out of room is not an error: grow explicitly and keep going.
//! assert!(zone.allocate(4096).is_none());
//! let mut zone = zone.grow_for(4096).unwrap();
//! let big = zone.allocate(4096).unwrap();
//!
//! // Offsets survive growth.
//! assert_eq!(&zone.payload(name)[..5], b"zonal");
//!
//! zone.free(big);
//! zone.free(name);
//! assert!(zone.check_heap());
//! assert_eq!(zone.free_memory(), zone.capacity());
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `zonal-core` | `Offset`, `BlockState`, error types |
//! | [`zone`] | `zonal-zone` | `Zone`, configuration, diagnostics, statistics, `SharedZone` |
//!
//! # Features
//!
//! - `checked`: validate every free and panic on double or foreign frees.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types (`zonal-core`).
///
/// Zone-relative [`types::Offset`]s, [`types::BlockState`], and the
/// [`types::ZoneError`] / [`types::ConfigError`] enums.
pub use zonal_core as types;

/// The allocator (`zonal-zone`).
///
/// [`zone::Zone`] for single-owner use, [`zone::SharedZone`] for several
/// producers behind one lock, and the diagnostics in [`zone::diag`].
pub use zonal_zone as zone;

/// Common imports for typical Zonal usage.
///
/// ```rust
/// use zonal::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use zonal_core::{BlockState, Offset};

    // Errors
    pub use zonal_core::{ConfigError, ZoneError};

    // Allocator
    pub use zonal_zone::{GrowError, SharedZone, Zone, ZoneConfig, ZoneStats};

    // Diagnostics
    pub use zonal_zone::{BlockInfo, HeapDump, HeapReport};
}
