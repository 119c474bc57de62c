//! # Desync Detector
//!
//! Rolling-window checksum comparison.
//!
//! ## Window
//!
//! ```text
//!   horizon = newest_local - window           newest_local
//!      │                                           │
//! ─────┼────────── local checksums ────────────────┼──── pending remote ───▶ tick
//!   pruned                                             (held until the local
//!   (late remotes ignored)                              value is recorded)
//! ```
//!
//! The detector only reports. Recovery belongs to whoever consumes the
//! outcomes. A peer is reported diverged once; later mismatches from it are
//! only counted until [`DesyncDetector::clear_peer`] or
//! [`DesyncDetector::reset`] says its state was replaced.

use std::collections::{BTreeMap, BTreeSet};

use meridian_shared::{PeerId, Tick};

/// Result of comparing one remote checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumOutcome {
    /// Values agreed.
    Verified {
        /// Peer the remote value came from.
        peer: PeerId,
        /// Compared tick.
        tick: Tick,
    },
    /// Values differ.
    Mismatch {
        /// Peer the remote value came from.
        peer: PeerId,
        /// Compared tick.
        tick: Tick,
        /// Local checksum.
        local: u32,
        /// Remote checksum.
        remote: u32,
    },
}

/// Detector statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DesyncStats {
    /// Comparisons that agreed.
    pub verified: u64,
    /// Comparisons that disagreed.
    pub mismatches: u64,
    /// Mismatches not reported because the peer was already known diverged.
    pub suppressed: u64,
    /// Remote values ignored as too old or without a local counterpart.
    pub ignored: u64,
    /// Pending remote values evicted to respect the bound.
    pub evicted: u64,
}

/// Rolling-window checksum store.
#[derive(Debug)]
pub struct DesyncDetector {
    interval: u64,
    window: u64,
    max_pending_ticks: usize,
    local: BTreeMap<Tick, u32>,
    pending: BTreeMap<Tick, Vec<(PeerId, u32)>>,
    diverged: BTreeSet<PeerId>,
    newest_local: Tick,
    stats: DesyncStats,
}

impl DesyncDetector {
    /// Creates a detector.
    ///
    /// Checksums are taken every `interval` ticks and kept for `window`
    /// ticks. At most `max_pending_ticks` distinct future ticks are held.
    #[must_use]
    pub fn new(interval: u64, window: u64, max_pending_ticks: usize) -> Self {
        Self {
            interval,
            window,
            max_pending_ticks,
            local: BTreeMap::new(),
            pending: BTreeMap::new(),
            diverged: BTreeSet::new(),
            newest_local: 0,
            stats: DesyncStats::default(),
        }
    }

    /// Whether `tick` is a checksum tick.
    #[inline]
    #[must_use]
    pub const fn is_checksum_tick(&self, tick: Tick) -> bool {
        self.interval > 0 && tick > 0 && tick % self.interval == 0
    }

    /// Oldest tick still retained.
    #[must_use]
    pub const fn horizon(&self) -> Tick {
        self.newest_local.saturating_sub(self.window)
    }

    /// Stores the local checksum for `tick` and resolves any remote values
    /// that were waiting for it.
    pub fn record_local(&mut self, tick: Tick, checksum: u32) -> Vec<ChecksumOutcome> {
        self.local.insert(tick, checksum);
        self.newest_local = self.newest_local.max(tick);

        let outcomes = self
            .pending
            .remove(&tick)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(peer, remote)| self.compare(peer, tick, checksum, remote))
            .collect();

        self.prune();
        outcomes
    }

    /// Compares a remote checksum, or holds it until the local value exists.
    pub fn receive_remote(&mut self, peer: PeerId, tick: Tick, remote: u32) -> Option<ChecksumOutcome> {
        if tick < self.horizon() {
            self.stats.ignored += 1;
            return None;
        }
        if let Some(&local) = self.local.get(&tick) {
            return self.compare(peer, tick, local, remote);
        }
        if tick <= self.newest_local {
            // Already past this tick without a local value: nothing to compare.
            self.stats.ignored += 1;
            return None;
        }

        self.pending.entry(tick).or_default().push((peer, remote));
        while self.pending.len() > self.max_pending_ticks {
            if let Some((_, dropped)) = self.pending.pop_first() {
                self.stats.evicted += dropped.len() as u64;
            }
        }
        None
    }

    /// Forgets everything and treats `tick` as the newest local tick.
    ///
    /// Used after the simulation state was replaced wholesale.
    pub fn reset(&mut self, tick: Tick) {
        self.local.clear();
        self.diverged.clear();
        self.pending.retain(|&pending_tick, _| pending_tick > tick);
        self.newest_local = tick;
    }

    /// Re-arms reporting for `peer` after its state was replaced.
    pub fn clear_peer(&mut self, peer: PeerId) {
        self.diverged.remove(&peer);
    }

    /// Returns true if `peer` was reported diverged and not cleared since.
    #[must_use]
    pub fn is_diverged(&self, peer: PeerId) -> bool {
        self.diverged.contains(&peer)
    }

    /// Local checksum for `tick`, if retained.
    #[must_use]
    pub fn local_checksum(&self, tick: Tick) -> Option<u32> {
        self.local.get(&tick).copied()
    }

    /// Number of retained local checksums.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.local.len()
    }

    /// Number of ticks with pending remote values.
    #[must_use]
    pub fn pending_ticks(&self) -> usize {
        self.pending.len()
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &DesyncStats {
        &self.stats
    }

    fn compare(&mut self, peer: PeerId, tick: Tick, local: u32, remote: u32) -> Option<ChecksumOutcome> {
        if local == remote {
            self.stats.verified += 1;
            return Some(ChecksumOutcome::Verified { peer, tick });
        }
        self.stats.mismatches += 1;
        if !self.diverged.insert(peer) {
            self.stats.suppressed += 1;
            return None;
        }
        Some(ChecksumOutcome::Mismatch {
            peer,
            tick,
            local,
            remote,
        })
    }

    fn prune(&mut self) {
        let horizon = self.horizon();
        self.local = self.local.split_off(&horizon);
        self.pending = self.pending.split_off(&horizon);
    }
}
