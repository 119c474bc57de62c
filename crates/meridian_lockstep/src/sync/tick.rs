//! # Tick Synchronizer
//!
//! Tick and speed bookkeeping for one peer.
//!
//! On the host this is the authoritative tick sync state: current tick,
//! requested speed, effective speed and the pause flag. On a client it is a
//! mirror of the host's announcements plus the local tick, which may trail
//! the announced host tick but never pass it.
//!
//! ## Invariants
//!
//! - `effective <= requested` at all times
//! - `effective >= SpeedLevel::MIN`; pausing is a separate flag
//! - Decreases apply at once, increases wait out a cooldown

use meridian_shared::{SpeedLevel, Tick};

use super::throttle::ThrottlePolicy;
use crate::protocol::TickSync;

/// Tick and speed state.
pub struct TickSynchronizer {
    current_tick: Tick,
    host_tick: Tick,
    requested: SpeedLevel,
    effective: SpeedLevel,
    paused: bool,
    last_throttle_tick: Option<Tick>,
    increase_cooldown: u64,
    policy: Box<dyn ThrottlePolicy>,
}

impl TickSynchronizer {
    /// Creates a synchronizer at tick 0 running at `requested`.
    #[must_use]
    pub fn new(policy: Box<dyn ThrottlePolicy>, requested: SpeedLevel, increase_cooldown: u64) -> Self {
        let requested = Self::running_level(requested);
        Self {
            current_tick: 0,
            host_tick: 0,
            requested,
            effective: requested,
            paused: false,
            last_throttle_tick: None,
            increase_cooldown,
            policy,
        }
    }

    /// Returns to tick 0 at `requested`, keeping the policy.
    pub fn reset(&mut self, requested: SpeedLevel) {
        let requested = Self::running_level(requested);
        self.current_tick = 0;
        self.host_tick = 0;
        self.requested = requested;
        self.effective = requested;
        self.paused = false;
        self.last_throttle_tick = None;
    }

    fn running_level(speed: SpeedLevel) -> SpeedLevel {
        SpeedLevel(speed.0.clamp(SpeedLevel::MIN.0, SpeedLevel::MAX.0))
    }

    /// Last executed tick.
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Newest host tick known here. Equal to the current tick on the host.
    #[inline]
    #[must_use]
    pub const fn host_tick(&self) -> Tick {
        self.host_tick
    }

    /// Speed the user asked for.
    #[inline]
    #[must_use]
    pub const fn requested(&self) -> SpeedLevel {
        self.requested
    }

    /// Speed after throttling, ignoring pause.
    #[inline]
    #[must_use]
    pub const fn effective(&self) -> SpeedLevel {
        self.effective
    }

    /// Whether the clock is paused.
    #[inline]
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Speed the clock actually runs at: [`SpeedLevel::PAUSED`] while paused.
    #[must_use]
    pub const fn running_speed(&self) -> SpeedLevel {
        if self.paused {
            SpeedLevel::PAUSED
        } else {
            self.effective
        }
    }

    /// Requested speed as sent in `GameSpeedChange`: 0 while paused.
    #[must_use]
    pub const fn announced_request(&self) -> SpeedLevel {
        if self.paused {
            SpeedLevel::PAUSED
        } else {
            self.requested
        }
    }

    /// Lag behind the newest known host tick, clamped to `u16`.
    #[must_use]
    pub fn ticks_behind(&self) -> u16 {
        let behind = self.host_tick.saturating_sub(self.current_tick);
        u16::try_from(behind).unwrap_or(u16::MAX)
    }

    /// Ticks a client may execute now, at most `max`.
    #[must_use]
    pub fn catch_up_budget(&self, max: u32) -> u32 {
        let behind = self.host_tick.saturating_sub(self.current_tick);
        u32::try_from(behind).unwrap_or(u32::MAX).min(max)
    }

    /// Records one executed tick and returns it.
    pub fn advance(&mut self) -> Tick {
        self.current_tick += 1;
        self.host_tick = self.host_tick.max(self.current_tick);
        self.current_tick
    }

    /// Jumps to `tick` after a full-state transfer.
    pub fn reset_to(&mut self, tick: Tick) {
        self.current_tick = tick;
        self.host_tick = self.host_tick.max(tick);
    }

    /// Host: a user changed the requested speed.
    ///
    /// Lowering applies at once without starting a cooldown. Raising goes
    /// through the normal throttle evaluation. Returns true if the effective
    /// speed changed.
    pub fn set_requested(&mut self, speed: SpeedLevel, max_ticks_behind: u16) -> bool {
        let speed = Self::running_level(speed);
        self.requested = speed;
        let before = self.effective;
        if self.effective > speed {
            self.effective = speed;
        }
        self.recompute(max_ticks_behind);
        self.effective != before
    }

    /// Host: pauses or resumes. Returns true if the flag changed.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        let changed = self.paused != paused;
        self.paused = paused;
        changed
    }

    /// Host: re-evaluates the effective speed against current lag.
    ///
    /// Returns true if the effective speed changed.
    pub fn recompute(&mut self, max_ticks_behind: u16) -> bool {
        let target = self
            .policy
            .throttled_speed(self.requested, max_ticks_behind)
            .min(self.requested)
            .max(SpeedLevel::MIN);

        if target < self.effective {
            self.effective = target;
            self.last_throttle_tick = Some(self.current_tick);
            return true;
        }

        if target > self.effective && max_ticks_behind <= self.policy.lag_threshold() {
            let cooled = self
                .last_throttle_tick
                .map_or(true, |at| self.current_tick.saturating_sub(at) >= self.increase_cooldown);
            if cooled {
                self.effective = target;
                return true;
            }
        }
        false
    }

    /// Host: builds the periodic announcement.
    #[must_use]
    pub const fn tick_sync(&self) -> TickSync {
        TickSync {
            current_tick: self.current_tick,
            effective_speed: self.effective,
            is_paused: self.paused,
        }
    }

    /// Client: mirrors a host announcement. Returns true if speed or pause
    /// state changed.
    pub fn apply_tick_sync(&mut self, sync: &TickSync) -> bool {
        self.host_tick = self.host_tick.max(sync.current_tick);
        let effective = Self::running_level(sync.effective_speed);
        let changed = effective != self.effective || sync.is_paused != self.paused;
        self.effective = effective;
        self.paused = sync.is_paused;
        if self.requested < effective {
            self.requested = effective;
        }
        changed
    }

    /// Client: mirrors a `GameSpeedChange` or `GameStart` from the host.
    pub fn mirror_request(&mut self, speed: SpeedLevel) {
        if speed.is_paused() {
            self.paused = true;
            return;
        }
        self.paused = false;
        self.requested = Self::running_level(speed);
        if self.effective > self.requested {
            self.effective = self.requested;
        }
    }
}

impl std::fmt::Debug for TickSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSynchronizer")
            .field("current_tick", &self.current_tick)
            .field("host_tick", &self.host_tick)
            .field("requested", &self.requested)
            .field("effective", &self.effective)
            .field("paused", &self.paused)
            .field("last_throttle_tick", &self.last_throttle_tick)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LinearThrottle;

    fn synchronizer(requested: u8) -> TickSynchronizer {
        TickSynchronizer::new(Box::new(LinearThrottle::new(8)), SpeedLevel(requested), 120)
    }

    fn run_to(sync: &mut TickSynchronizer, tick: Tick) {
        while sync.current_tick() < tick {
            sync.advance();
        }
    }

    #[test]
    fn test_laggard_throttles_immediately() {
        let mut sync = synchronizer(4);
        run_to(&mut sync, 1000);

        // Lags of 2 and 12: the max is what counts.
        assert!(sync.recompute(12));
        assert_eq!(sync.effective(), SpeedLevel(2));
        assert_eq!(sync.requested(), SpeedLevel(4));
        assert_eq!(sync.tick_sync().effective_speed, SpeedLevel(2));
    }

    #[test]
    fn test_increase_waits_for_cooldown() {
        let mut sync = synchronizer(4);
        run_to(&mut sync, 100);
        assert!(sync.recompute(20));
        assert_eq!(sync.effective(), SpeedLevel(1));

        // Lag recovered, cooldown not elapsed.
        run_to(&mut sync, 150);
        assert!(!sync.recompute(0));
        assert_eq!(sync.effective(), SpeedLevel(1));

        run_to(&mut sync, 220);
        assert!(sync.recompute(0));
        assert_eq!(sync.effective(), SpeedLevel(4));
    }

    #[test]
    fn test_increase_needs_lag_under_threshold() {
        let mut sync = synchronizer(4);
        assert!(sync.recompute(20));
        run_to(&mut sync, 500);
        // Lag improved but is still above threshold: hold.
        assert!(!sync.recompute(9));
        assert_eq!(sync.effective(), SpeedLevel(1));
    }

    #[test]
    fn test_further_decrease_ignores_cooldown() {
        let mut sync = synchronizer(5);
        assert!(sync.recompute(9));
        assert_eq!(sync.effective(), SpeedLevel(3));
        sync.advance();
        assert!(sync.recompute(30));
        assert_eq!(sync.effective(), SpeedLevel(1));
    }

    #[test]
    fn test_effective_never_exceeds_requested() {
        let mut sync = synchronizer(5);
        for behind in [0u16, 3, 9, 17, 40, 0, 0, 12, 0] {
            for _ in 0..60 {
                sync.advance();
            }
            sync.recompute(behind);
            assert!(sync.effective() <= sync.requested());
            assert!(sync.effective() >= SpeedLevel::MIN);
        }

        sync.set_requested(SpeedLevel(2), 0);
        assert_eq!(sync.effective(), SpeedLevel(2));
        assert!(sync.effective() <= sync.requested());
    }

    #[test]
    fn test_user_increase_without_lag_is_immediate() {
        let mut sync = synchronizer(2);
        assert!(sync.set_requested(SpeedLevel(5), 0));
        assert_eq!(sync.effective(), SpeedLevel(5));
    }

    #[test]
    fn test_pause_is_separate_from_effective() {
        let mut sync = synchronizer(3);
        assert!(sync.set_paused(true));
        assert!(!sync.set_paused(true));
        assert_eq!(sync.running_speed(), SpeedLevel::PAUSED);
        assert_eq!(sync.announced_request(), SpeedLevel::PAUSED);
        assert_eq!(sync.effective(), SpeedLevel(3));
    }

    #[test]
    fn test_client_never_budgets_past_host() {
        let mut sync = synchronizer(2);
        assert_eq!(sync.catch_up_budget(64), 0);
        assert!(!sync.apply_tick_sync(&TickSync {
            current_tick: 100,
            effective_speed: SpeedLevel(2),
            is_paused: false,
        }));
        assert_eq!(sync.ticks_behind(), 100);
        assert_eq!(sync.catch_up_budget(64), 64);
        run_to(&mut sync, 100);
        assert_eq!(sync.catch_up_budget(64), 0);

        // An older announcement never moves the host tick back.
        sync.apply_tick_sync(&TickSync {
            current_tick: 90,
            effective_speed: SpeedLevel(1),
            is_paused: false,
        });
        assert_eq!(sync.host_tick(), 100);
        assert_eq!(sync.effective(), SpeedLevel(1));
    }

    #[test]
    fn test_ticks_behind_clamps() {
        let mut sync = synchronizer(2);
        sync.apply_tick_sync(&TickSync {
            current_tick: 1_000_000,
            effective_speed: SpeedLevel(2),
            is_paused: false,
        });
        assert_eq!(sync.ticks_behind(), u16::MAX);
    }
}
