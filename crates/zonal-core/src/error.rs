//! Error types for the Zonal allocator.
//!
//! Running out of space on `allocate` is not an error: the allocator
//! returns `None` and the caller decides whether to grow. [`ZoneError`]
//! covers zone construction, growth, image import, and the explicit
//! `try_allocate` variant.

use std::error::Error;
use std::fmt;

/// Errors from zone construction and whole-zone operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneError {
    /// The requested capacity cannot be represented once rounded and
    /// combined with the zone header.
    CapacityOverflow {
        /// Capacity requested by the caller, in bytes.
        requested: usize,
    },
    /// The host allocator refused to provide the backing buffer.
    HostAllocationFailed {
        /// Size of the buffer that was requested, in bytes.
        bytes: usize,
    },
    /// No single free block can hold the request.
    OutOfMemory {
        /// Payload size requested, in bytes.
        requested: usize,
        /// Total free bytes in the zone at the time of the request.
        free: usize,
    },
    /// A zone image failed validation on import.
    InvalidImage {
        /// Description of the first problem found.
        reason: String,
    },
    /// A shared zone's lock was poisoned by a panicking holder; the
    /// image may be mid-update.
    Poisoned,
    /// The zone configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for ZoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityOverflow { requested } => {
                write!(f, "zone capacity {requested} bytes overflows the address space")
            }
            Self::HostAllocationFailed { bytes } => {
                write!(f, "host allocator failed to provide {bytes} bytes")
            }
            Self::OutOfMemory { requested, free } => {
                write!(
                    f,
                    "out of zone memory: requested {requested} bytes, {free} bytes free"
                )
            }
            Self::InvalidImage { reason } => write!(f, "invalid zone image: {reason}"),
            Self::Poisoned => write!(f, "zone lock poisoned by a panicking holder"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl Error for ZoneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for ZoneError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Errors detected by `ZoneConfig::validate()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity is zero.
    ZeroCapacity,
    /// The minimum fragment is smaller than a block header, so a split
    /// could produce a block that cannot hold its own header.
    FragmentTooSmall {
        /// The configured minimum fragment.
        configured: usize,
        /// The smallest accepted value.
        minimum: usize,
    },
    /// The minimum fragment is not a multiple of the block granularity.
    FragmentNotAligned {
        /// The configured minimum fragment.
        configured: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity must be non-zero"),
            Self::FragmentTooSmall {
                configured,
                minimum,
            } => write!(
                f,
                "min_fragment {configured} is below the minimum of {minimum} bytes"
            ),
            Self::FragmentNotAligned { configured } => {
                write!(f, "min_fragment {configured} is not granule aligned")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_message_names_sizes() {
        let e = ZoneError::OutOfMemory {
            requested: 2000,
            free: 880,
        };
        let msg = e.to_string();
        assert!(msg.contains("2000"));
        assert!(msg.contains("880"));
    }

    #[test]
    fn config_error_is_source() {
        let e = ZoneError::from(ConfigError::ZeroCapacity);
        assert!(e.source().is_some());
        assert_eq!(e.to_string(), "config: capacity must be non-zero");
    }
}
