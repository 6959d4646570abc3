//! Cumulative progress flags of a converter.

use serde::{Deserialize, Serialize};

/// Bitmask of the phases a converter has completed.
///
/// Flags only accumulate. Recording a phase also records the phases it
/// depends on, so a later-phase flag is never observed without its
/// prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConverterState(u8);

impl ConverterState {
    pub const EMPTY: Self = Self(0);
    pub const OPENED: Self = Self(1);
    pub const THUMBNAIL_UNPACKED: Self = Self(1 << 1);
    pub const THUMBNAIL_DECODED: Self = Self(1 << 2);
    pub const IMAGE_UNPACKED: Self = Self(1 << 3);
    pub const IMAGE_PROCESSED: Self = Self(1 << 4);
    pub const IMAGE_WRITTEN: Self = Self(1 << 5);
    pub const IMAGE_DECODED: Self = Self(1 << 6);

    const ALL_BITS: u8 = 0x7F;

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Build a state from raw bits, dropping unknown ones.
    ///
    /// The result is not closed over prerequisites; see [`Self::is_consistent`].
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every flag of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Record `flag` together with its prerequisites.
    pub fn insert(&mut self, flag: Self) {
        self.0 |= Self::closure(flag.0);
    }

    /// True when every set flag has its prerequisites set too.
    pub fn is_consistent(self) -> bool {
        Self::closure(self.0) == self.0
    }

    fn closure(bits: u8) -> u8 {
        let mut bits = bits & Self::ALL_BITS;
        // Walk from the latest phase down so chains close in one pass.
        for (flag, prerequisite) in [
            (Self::IMAGE_DECODED, Self::IMAGE_PROCESSED),
            (Self::IMAGE_WRITTEN, Self::IMAGE_PROCESSED),
            (Self::IMAGE_PROCESSED, Self::IMAGE_UNPACKED),
            (Self::IMAGE_UNPACKED, Self::OPENED),
            (Self::THUMBNAIL_DECODED, Self::THUMBNAIL_UNPACKED),
            (Self::THUMBNAIL_UNPACKED, Self::OPENED),
        ] {
            if bits & flag.0 != 0 {
                bits |= prerequisite.0;
            }
        }
        bits
    }

    /// Names of the set flags, earliest phase first.
    pub fn flag_names(self) -> Vec<&'static str> {
        [
            (Self::OPENED, "opened"),
            (Self::THUMBNAIL_UNPACKED, "thumbnail-unpacked"),
            (Self::THUMBNAIL_DECODED, "thumbnail-decoded"),
            (Self::IMAGE_UNPACKED, "image-unpacked"),
            (Self::IMAGE_PROCESSED, "image-processed"),
            (Self::IMAGE_WRITTEN, "image-written"),
            (Self::IMAGE_DECODED, "image-decoded"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl std::ops::BitOr for ConverterState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for ConverterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.flag_names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_values() {
        assert_eq!(ConverterState::OPENED.bits(), 1);
        assert_eq!(ConverterState::THUMBNAIL_UNPACKED.bits(), 2);
        assert_eq!(ConverterState::THUMBNAIL_DECODED.bits(), 4);
        assert_eq!(ConverterState::IMAGE_UNPACKED.bits(), 8);
        assert_eq!(ConverterState::IMAGE_PROCESSED.bits(), 16);
        assert_eq!(ConverterState::IMAGE_WRITTEN.bits(), 32);
        assert_eq!(ConverterState::IMAGE_DECODED.bits(), 64);
    }

    #[test]
    fn test_insert_records_prerequisites() {
        let mut state = ConverterState::default();
        state.insert(ConverterState::IMAGE_WRITTEN);
        assert_eq!(state.bits(), 1 | 8 | 16 | 32);

        let mut state = ConverterState::default();
        state.insert(ConverterState::THUMBNAIL_DECODED);
        assert_eq!(state.bits(), 1 | 2 | 4);
    }

    #[test]
    fn test_flags_accumulate() {
        let mut state = ConverterState::OPENED;
        state.insert(ConverterState::THUMBNAIL_UNPACKED);
        state.insert(ConverterState::IMAGE_DECODED);
        assert!(state.contains(ConverterState::THUMBNAIL_UNPACKED));
        assert!(state.contains(ConverterState::IMAGE_DECODED));
        assert!(!state.contains(ConverterState::IMAGE_WRITTEN));
        assert!(!state.contains(ConverterState::THUMBNAIL_DECODED));
    }

    #[test]
    fn test_consistency() {
        assert!(ConverterState::EMPTY.is_consistent());
        assert!(ConverterState::OPENED.is_consistent());
        assert!(!ConverterState::IMAGE_PROCESSED.is_consistent());
        assert!(!ConverterState::from_bits_truncate(1 | 16).is_consistent());
        assert!(ConverterState::from_bits_truncate(1 | 8 | 16).is_consistent());
    }

    #[test]
    fn test_from_bits_drops_unknown() {
        assert_eq!(ConverterState::from_bits_truncate(0xFF).bits(), 0x7F);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConverterState::EMPTY.to_string(), "none");
        let mut state = ConverterState::default();
        state.insert(ConverterState::THUMBNAIL_UNPACKED);
        assert_eq!(state.to_string(), "opened|thumbnail-unpacked");
    }
}
