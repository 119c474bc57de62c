//! # Game Speed Levels
//!
//! Speed is a small integer. Level `0` means paused; levels
//! `1..=SpeedLevel::MAX` run progressively faster.

use serde::{Deserialize, Serialize};

/// A game speed level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedLevel(pub u8);

impl SpeedLevel {
    /// Paused.
    pub const PAUSED: Self = Self(0);
    /// Slowest running speed.
    pub const MIN: Self = Self(1);
    /// Fastest running speed.
    pub const MAX: Self = Self(5);
    /// Speed a new session starts at.
    pub const DEFAULT: Self = Self(2);

    /// Returns true if this level stops the clock.
    #[inline]
    #[must_use]
    pub const fn is_paused(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the level is within `0..=MAX`.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 <= Self::MAX.0
    }

    /// Clamps into the valid range.
    #[inline]
    #[must_use]
    pub fn clamped(self) -> Self {
        Self(self.0.min(Self::MAX.0))
    }
}

impl Default for SpeedLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}
