//! Zone configuration parameters.

use zonal_core::ConfigError;

use crate::block::{BLOCK_HEADER_SIZE, GRANULE};

/// Configuration for a single zone.
///
/// Validated when the zone is created; immutable afterwards. Growth
/// carries the configuration over to the replacement zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneConfig {
    /// Payload capacity in bytes, excluding the zone header.
    ///
    /// Rounded up to the block granularity (16 bytes) at creation.
    pub capacity: usize,

    /// Largest remainder that is absorbed into an allocation instead of
    /// being split off as a new free block.
    ///
    /// Default: 64. Must be a multiple of 16 and at least one block
    /// header (32 bytes), so any split-off remainder can hold its header
    /// plus a payload.
    pub min_fragment: usize,
}

impl ZoneConfig {
    /// Default fragment threshold in bytes.
    pub const DEFAULT_MIN_FRAGMENT: usize = 64;

    /// Create a config for the given payload capacity with default values
    /// for everything else.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            min_fragment: Self::DEFAULT_MIN_FRAGMENT,
        }
    }

    /// Override the fragment threshold.
    pub fn with_min_fragment(mut self, min_fragment: usize) -> Self {
        self.min_fragment = min_fragment;
        self
    }

    /// Check structural constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.min_fragment < BLOCK_HEADER_SIZE {
            return Err(ConfigError::FragmentTooSmall {
                configured: self.min_fragment,
                minimum: BLOCK_HEADER_SIZE,
            });
        }
        if self.min_fragment % GRANULE != 0 {
            return Err(ConfigError::FragmentNotAligned {
                configured: self.min_fragment,
            });
        }
        Ok(())
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ZoneConfig::default();
        assert_eq!(config.min_fragment, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(ZoneConfig::new(0).validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn fragment_below_header_rejected() {
        let config = ZoneConfig::new(1024).with_min_fragment(16);
        assert_eq!(
            config.validate(),
            Err(ConfigError::FragmentTooSmall {
                configured: 16,
                minimum: 32
            })
        );
    }

    #[test]
    fn unaligned_fragment_rejected() {
        let config = ZoneConfig::new(1024).with_min_fragment(40);
        assert_eq!(
            config.validate(),
            Err(ConfigError::FragmentNotAligned { configured: 40 })
        );
    }
}
