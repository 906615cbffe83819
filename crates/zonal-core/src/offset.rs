//! Zone-relative offsets and block states.

use std::fmt;

/// A signed byte distance from the base address of a zone.
///
/// Offsets are the only handles that survive zone growth: a grown zone
/// is a verbatim copy of the old image at a new base address, so every
/// offset still names the same bytes. An offset has no meaning outside
/// the zone it was produced by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offset(pub i64);

impl Offset {
    /// The zone base itself.
    pub const ZERO: Offset = Offset(0);

    /// Wrap a raw offset value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw offset value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// This offset moved forward by `bytes`, or `None` on overflow.
    pub fn checked_add(self, bytes: usize) -> Option<Offset> {
        let bytes = i64::try_from(bytes).ok()?;
        self.0.checked_add(bytes).map(Offset)
    }

    /// This offset moved backward by `bytes`, or `None` on overflow.
    pub fn checked_sub(self, bytes: usize) -> Option<Offset> {
        let bytes = i64::try_from(bytes).ok()?;
        self.0.checked_sub(bytes).map(Offset)
    }

    /// The offset as an index into the zone buffer.
    ///
    /// Returns `None` for negative offsets and values that do not fit
    /// in `usize`.
    pub fn to_index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    /// Build an offset from a buffer index.
    pub fn from_index(index: usize) -> Option<Offset> {
        i64::try_from(index).ok().map(Offset)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}", self.0)
    }
}

impl From<i64> for Offset {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<Offset> for i64 {
    fn from(v: Offset) -> Self {
        v.0
    }
}

/// Whether a block is handed out or available for allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// Available to the next-fit search.
    Free,
    /// Owned by a caller (or the zone's sentinel).
    Used,
}

impl BlockState {
    /// Encoding stored in the block header.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Free => 0,
            Self::Used => 1,
        }
    }

    /// Decode a header value. Unknown encodings yield `None`.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Used),
            _ => None,
        }
    }

    /// Whether this is [`BlockState::Free`].
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "FREE"),
            Self::Used => write!(f, "USED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_compare_by_value() {
        assert_eq!(Offset(48), Offset::new(48));
        assert_ne!(Offset(48), Offset(64));
        assert!(Offset(16) < Offset(32));
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(Offset(48).checked_add(32), Some(Offset(80)));
        assert_eq!(Offset(80).checked_sub(32), Some(Offset(48)));
        assert_eq!(Offset(i64::MAX).checked_add(1), None);
        assert_eq!(Offset(0).checked_add(usize::MAX), None);
    }

    #[test]
    fn negative_offset_has_no_index() {
        assert_eq!(Offset(-16).to_index(), None);
        assert_eq!(Offset(16).to_index(), Some(16));
        assert_eq!(Offset::from_index(16), Some(Offset(16)));
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(Offset(255).to_string(), "+0xff");
    }

    #[test]
    fn state_encoding() {
        assert_eq!(BlockState::from_raw(BlockState::Free.to_raw()), Some(BlockState::Free));
        assert_eq!(BlockState::from_raw(BlockState::Used.to_raw()), Some(BlockState::Used));
        assert_eq!(BlockState::from_raw(7), None);
        assert!(BlockState::Free.is_free());
        assert!(!BlockState::Used.is_free());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn index_conversion_is_lossless(index in 0usize..(1 << 40)) {
                let off = Offset::from_index(index).unwrap();
                prop_assert_eq!(off.to_index(), Some(index));
            }

            #[test]
            fn add_then_sub_is_identity(base in 0i64..(1 << 40), delta in 0usize..(1 << 20)) {
                let off = Offset(base);
                let back = off.checked_add(delta).and_then(|o| o.checked_sub(delta));
                prop_assert_eq!(back, Some(off));
            }
        }
    }
}
