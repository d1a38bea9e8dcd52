//! Inter-transaction delay value type.
//!
//! Some clients ask the host to pause between MAC-layer transactions
//! (read/write calls). The delay travels as a 4-byte little-endian
//! nanosecond count, which bounds the range to 0..4.294967295 seconds.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Delay between transactions, stored with nanosecond resolution.
///
/// Keeping the raw nanosecond count means wire values survive a
/// decode/encode round trip exactly; seconds are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InterTransactionDelay(u32);

impl InterTransactionDelay {
    /// Largest representable delay in seconds
    pub const MAX_SECONDS: f64 = u32::MAX as f64 * 1e-9;

    /// Create a delay from a nanosecond count
    pub const fn from_nanos(nanos: u32) -> Self {
        Self(nanos)
    }

    /// Create a delay from seconds.
    ///
    /// Returns `None` when `seconds` is negative or exceeds
    /// [`Self::MAX_SECONDS`].
    pub fn from_secs_f64(seconds: f64) -> Option<Self> {
        if !(0.0..=Self::MAX_SECONDS).contains(&seconds) {
            return None;
        }
        // Round to the nearest nanosecond; the seconds-to-ns conversion
        // otherwise truncates values like 50e-6 that are not exact in
        // binary floating point.
        Some(Self((seconds * 1e9 + 0.5) as u32))
    }

    /// Delay in nanoseconds
    pub const fn as_nanos(self) -> u32 {
        self.0
    }

    /// Delay in seconds, exact at nanosecond (9-decimal) resolution
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.0) * 1e-9
    }

    /// Decode from the 4-byte little-endian wire form
    pub const fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Encode into the 4-byte little-endian wire form
    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}
