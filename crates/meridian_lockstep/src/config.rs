//! # Session Configuration
//!
//! Every interval, threshold and timeout the coordinator uses. Values load
//! from TOML; missing keys fall back to [`SessionConfig::default`].
//!
//! ```toml
//! tick_sync_interval = 5
//! lag_threshold = 8
//! speed_ticks_per_second = [0, 5, 10, 20, 40, 80]
//! peer_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use meridian_shared::{SpeedLevel, MAX_PLAYERS};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::protocol::MAX_STATE_CHUNK_DATA;

/// Session tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    // ---- lobby ----
    /// Maximum participants, host included.
    pub max_players: usize,
    /// Accept handshakes while the game is running.
    pub allow_late_join: bool,
    /// `start_game` requires every client to be ready.
    pub require_all_ready: bool,
    /// The host honours `GameSpeedChange` requests from clients.
    pub accept_speed_requests: bool,
    /// Speed a new session starts at.
    pub initial_speed: SpeedLevel,

    // ---- tick pacing ----
    /// Ticks per second, indexed by speed level. Index 0 (paused) is ignored.
    pub speed_ticks_per_second: Vec<u32>,
    /// Host: most ticks run by one `update`.
    pub max_ticks_per_update: u32,
    /// Client: most catch-up ticks run by one `update`.
    pub max_catch_up_ticks: u32,
    /// Recommended distance between the current tick and a command's apply tick.
    pub input_delay_ticks: u64,

    // ---- tick sync ----
    /// Host broadcasts `TickSync` every this many ticks.
    pub tick_sync_interval: u64,
    /// Clients send `TickAck` every this many ticks.
    pub ack_interval: u64,
    /// Host recomputes the effective speed every this many ticks.
    pub speed_recompute_interval: u64,
    /// Lag at which throttling starts.
    pub lag_threshold: u16,
    /// Ticks after a throttle before the speed may rise again.
    pub speed_increase_cooldown: u64,
    /// Lag at which the host re-sends full state to a client.
    pub resync_threshold_ticks: u16,

    // ---- desync detection ----
    /// Checksum every this many ticks.
    pub checksum_interval: u64,
    /// Ticks of local checksums retained.
    pub checksum_window_ticks: u64,
    /// Distinct future ticks of remote checksums held before eviction.
    pub max_pending_checksums: usize,

    // ---- liveness ----
    /// Heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is dropped.
    pub peer_timeout_ms: u64,
    /// Time a handshake may stay unanswered.
    pub handshake_timeout_ms: u64,

    // ---- state transfer ----
    /// Bytes per `StateSync` chunk.
    pub state_chunk_size: usize,
    /// LZ4-compress full-state transfers.
    pub compress_state: bool,

    // ---- events ----
    /// Undrained events kept before the oldest are dropped.
    pub max_queued_events: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            allow_late_join: true,
            require_all_ready: true,
            accept_speed_requests: true,
            initial_speed: SpeedLevel::DEFAULT,

            speed_ticks_per_second: vec![0, 5, 10, 20, 40, 80],
            max_ticks_per_update: 8,
            max_catch_up_ticks: 64,
            input_delay_ticks: 10,

            tick_sync_interval: 5,
            ack_interval: 10,
            speed_recompute_interval: 30,
            lag_threshold: 8,
            speed_increase_cooldown: 120,
            resync_threshold_ticks: 600,

            checksum_interval: 30,
            checksum_window_ticks: 300,
            max_pending_checksums: 64,

            heartbeat_interval_ms: 1_000,
            peer_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,

            state_chunk_size: 16 * 1024,
            compress_state: true,

            max_queued_events: 4_096,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// As [`SessionConfig::from_toml_str`], plus [`ConfigError::Io`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
            Ok(())
        }

        if !(2..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(ConfigError::Invalid(format!(
                "max_players must be in 2..={MAX_PLAYERS}, got {}",
                self.max_players
            )));
        }
        if self.initial_speed.is_paused() || !self.initial_speed.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "initial_speed must be in 1..={}, got {}",
                SpeedLevel::MAX.0,
                self.initial_speed.0
            )));
        }
        let levels = usize::from(SpeedLevel::MAX.0) + 1;
        if self.speed_ticks_per_second.len() != levels {
            return Err(ConfigError::Invalid(format!(
                "speed_ticks_per_second needs {levels} entries, got {}",
                self.speed_ticks_per_second.len()
            )));
        }
        if self.speed_ticks_per_second.iter().skip(1).any(|&rate| rate == 0) {
            return Err(ConfigError::Invalid(
                "speed_ticks_per_second must be positive for running speeds".into(),
            ));
        }

        positive("max_ticks_per_update", u64::from(self.max_ticks_per_update))?;
        positive("max_catch_up_ticks", u64::from(self.max_catch_up_ticks))?;
        positive("tick_sync_interval", self.tick_sync_interval)?;
        positive("ack_interval", self.ack_interval)?;
        positive("speed_recompute_interval", self.speed_recompute_interval)?;
        positive("lag_threshold", u64::from(self.lag_threshold))?;
        positive("checksum_interval", self.checksum_interval)?;
        positive("max_pending_checksums", self.max_pending_checksums as u64)?;
        positive("heartbeat_interval_ms", self.heartbeat_interval_ms)?;
        positive("peer_timeout_ms", self.peer_timeout_ms)?;
        positive("handshake_timeout_ms", self.handshake_timeout_ms)?;
        positive("max_queued_events", self.max_queued_events as u64)?;

        if self.checksum_window_ticks < self.checksum_interval {
            return Err(ConfigError::Invalid(
                "checksum_window_ticks must cover at least one checksum_interval".into(),
            ));
        }
        if self.resync_threshold_ticks <= self.lag_threshold {
            return Err(ConfigError::Invalid(
                "resync_threshold_ticks must exceed lag_threshold".into(),
            ));
        }
        if self.state_chunk_size == 0 || self.state_chunk_size > MAX_STATE_CHUNK_DATA {
            return Err(ConfigError::Invalid(format!(
                "state_chunk_size must be in 1..={MAX_STATE_CHUNK_DATA}"
            )));
        }
        Ok(())
    }

    /// Tick rate for a speed level; zero while paused.
    #[must_use]
    pub fn ticks_per_second(&self, speed: SpeedLevel) -> u32 {
        if speed.is_paused() {
            return 0;
        }
        self.speed_ticks_per_second
            .get(usize::from(speed.0))
            .copied()
            .unwrap_or(0)
    }

    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Peer silence timeout.
    #[must_use]
    pub const fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ticks_per_second(SpeedLevel(4)), 40);
        assert_eq!(config.ticks_per_second(SpeedLevel::PAUSED), 0);
        assert_eq!(config.peer_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r"
            lag_threshold = 4
            resync_threshold_ticks = 40
            initial_speed = 3
            ",
        )
        .unwrap();
        assert_eq!(config.lag_threshold, 4);
        assert_eq!(config.initial_speed, SpeedLevel(3));
        assert_eq!(config.checksum_interval, 30);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("tick_rate = 60"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for source in [
            "checksum_interval = 0",
            "speed_ticks_per_second = [0, 5, 10]",
            "speed_ticks_per_second = [0, 5, 0, 20, 40, 80]",
            "initial_speed = 0",
            "max_players = 1",
            "state_chunk_size = 0",
            "checksum_window_ticks = 10",
        ] {
            assert!(
                matches!(SessionConfig::from_toml_str(source), Err(ConfigError::Invalid(_))),
                "accepted {source}"
            );
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::from_file("/nonexistent/meridian-session.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
