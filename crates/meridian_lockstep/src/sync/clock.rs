//! # Host Tick Clock
//!
//! Fixed-timestep accumulator that turns elapsed frame time into ticks.
//!
//! ## Design
//!
//! The clock never reads the system time. The caller hands it the elapsed
//! time of each frame, which keeps the host loop reproducible under test
//! and lets the same code run behind any frame pacing.

use std::time::Duration;

/// Clock statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockStats {
    /// Ticks released to the caller.
    pub total_ticks: u64,
    /// Ticks discarded because a frame fell too far behind.
    pub dropped_ticks: u64,
    /// Largest batch of ticks released in one frame.
    pub max_ticks_per_frame: u32,
}

/// Fixed-timestep accumulator.
#[derive(Clone, Debug, Default)]
pub struct TickClock {
    /// Time not yet converted into ticks.
    accumulator: Duration,
    /// Statistics.
    stats: ClockStats,
}

impl TickClock {
    /// Creates a clock with an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration of one tick at the given rate.
    #[must_use]
    pub fn tick_duration(ticks_per_second: u32) -> Option<Duration> {
        if ticks_per_second == 0 {
            return None;
        }
        Some(Duration::from_nanos(1_000_000_000 / u64::from(ticks_per_second)))
    }

    /// Adds `elapsed` and returns how many ticks are due, at most `max_ticks`.
    ///
    /// A rate of zero (paused) empties the accumulator so that resuming does
    /// not release a burst. Backlog beyond `max_ticks` is discarded.
    pub fn advance(&mut self, elapsed: Duration, ticks_per_second: u32, max_ticks: u32) -> u32 {
        let Some(tick) = Self::tick_duration(ticks_per_second) else {
            self.accumulator = Duration::ZERO;
            return 0;
        };

        self.accumulator += elapsed;
        let tick_nanos = tick.as_nanos();
        let due = self.accumulator.as_nanos() / tick_nanos;
        let released = due.min(u128::from(max_ticks));

        if due > released {
            // Keep only the fractional tick; the rest is unrecoverable lag.
            let remainder = self.accumulator.as_nanos() % tick_nanos;
            self.accumulator = Duration::from_nanos(remainder as u64);
            self.stats.dropped_ticks += (due - released) as u64;
        } else {
            self.accumulator -= tick * released as u32;
        }

        let released = released as u32;
        self.stats.total_ticks += u64::from(released);
        self.stats.max_ticks_per_frame = self.stats.max_ticks_per_frame.max(released);
        released
    }

    /// Empties the accumulator.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }

    /// Returns clock statistics.
    #[must_use]
    pub const fn stats(&self) -> &ClockStats {
        &self.stats
    }
}
