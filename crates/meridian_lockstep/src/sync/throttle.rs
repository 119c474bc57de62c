//! Lag-driven speed throttling policies.

use meridian_shared::SpeedLevel;

/// Maps the laggiest peer's lag to the speed the host may run at.
///
/// Implementations must be monotonic: more lag never yields a higher speed,
/// and the result never exceeds `requested`. Only an explicitly paused
/// `requested` may produce [`SpeedLevel::PAUSED`].
pub trait ThrottlePolicy: Send {
    /// Speed to run at given `requested` speed and the maximum lag in ticks.
    fn throttled_speed(&self, requested: SpeedLevel, max_ticks_behind: u16) -> SpeedLevel;

    /// Lag at or below which no throttling applies.
    fn lag_threshold(&self) -> u16;
}

/// One speed level of reduction per `lag_threshold` ticks of lag.
///
/// `effective = max(1, requested - ceil(behind / threshold))` once `behind`
/// exceeds the threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearThrottle {
    /// Lag at which throttling starts.
    pub lag_threshold: u16,
}

impl LinearThrottle {
    /// Creates a policy with the given threshold (minimum 1).
    #[must_use]
    pub fn new(lag_threshold: u16) -> Self {
        Self {
            lag_threshold: lag_threshold.max(1),
        }
    }
}

impl ThrottlePolicy for LinearThrottle {
    fn throttled_speed(&self, requested: SpeedLevel, max_ticks_behind: u16) -> SpeedLevel {
        if requested.is_paused() || max_ticks_behind <= self.lag_threshold {
            return requested;
        }
        let threshold = u32::from(self.lag_threshold.max(1));
        let reduction = u32::from(max_ticks_behind).div_ceil(threshold);
        let reduced = u32::from(requested.0).saturating_sub(reduction).max(1);
        SpeedLevel(reduced as u8)
    }

    fn lag_threshold(&self) -> u16 {
        self.lag_threshold
    }
}
