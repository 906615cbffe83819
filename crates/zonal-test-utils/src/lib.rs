//! Test utilities for Zonal development.
//!
//! - [`ShadowZone`] drives a [`Zone`](zonal_zone::Zone) while keeping a
//!   model of every live allocation and the bytes written into it, and
//!   checks the two agree.
//! - [`Churn`] generates seeded, reproducible allocate/free/grow
//!   sequences for soak and property tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod churn;
pub mod shadow;

pub use churn::{Churn, ChurnSummary, ZoneOp};
pub use shadow::ShadowZone;
