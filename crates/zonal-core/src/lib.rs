//! Core types for the Zonal zone allocator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the allocator and its clients: zone-relative
//! [`Offset`]s, the [`BlockState`] of a block, and the error types.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod offset;

pub use error::{ConfigError, ZoneError};
pub use offset::{BlockState, Offset};
