//! # Peer Records
//!
//! Per-participant connection state, lobby data and progress tracking.
//!
//! ## State Machine
//!
//! ```text
//! Connecting ──▶ Connected ◀──▶ Synchronizing
//!      │             │                │
//!      └─────────────┴───────┬────────┘
//!                            ▼
//!                      Disconnected (terminal)
//! ```

use std::time::Duration;

use meridian_shared::{PeerId, Tick};

/// Connection state of a peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    /// Handshake accepted, not yet promoted.
    #[default]
    Connecting = 0,
    /// Fully participating.
    Connected = 1,
    /// Receiving a full-state transfer.
    Synchronizing = 2,
    /// Gone for good.
    Disconnected = 3,
}

impl PeerState {
    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Synchronizing)
                | (Self::Synchronizing, Self::Connected)
                | (
                    Self::Connecting | Self::Connected | Self::Synchronizing,
                    Self::Disconnected
                )
        )
    }

    /// Returns true if the peer takes part in the session.
    #[inline]
    #[must_use]
    pub const fn is_member(self) -> bool {
        matches!(self, Self::Connected | Self::Synchronizing)
    }
}

/// Role of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    /// The authoritative host.
    Host,
    /// Any other participant.
    Client,
}

/// Last checksum a peer reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChecksumSample {
    /// Tick the checksum describes.
    pub tick: Tick,
    /// Checksum value.
    pub value: u32,
}

/// One session participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Peer id.
    pub id: PeerId,
    /// Connection state.
    pub state: PeerState,
    /// Role.
    pub role: PeerRole,
    /// Tick carried by the last heartbeat.
    pub last_heartbeat_tick: Tick,
    /// Highest tick the peer acknowledged. Never decreases.
    pub last_acked_tick: Tick,
    /// Peer's self-reported lag. Always 0 for the host.
    pub ticks_behind: u16,
    /// Last checksum received from the peer.
    pub last_checksum: Option<ChecksumSample>,
    /// Session time of the last message from the peer.
    pub last_seen: Duration,
    /// Tick of the full-state transfer the peer is loading.
    pub sync_target: Option<Tick>,
    /// Lobby readiness.
    pub is_ready: bool,
    /// Selected country (0 = none).
    pub country_id: u16,
}

impl Peer {
    fn new(id: PeerId, role: PeerRole, state: PeerState, now: Duration) -> Self {
        Self {
            id,
            state,
            role,
            last_heartbeat_tick: 0,
            last_acked_tick: 0,
            ticks_behind: 0,
            last_checksum: None,
            last_seen: now,
            sync_target: None,
            is_ready: false,
            country_id: 0,
        }
    }

    /// Creates the host record, already connected.
    #[must_use]
    pub fn host(now: Duration) -> Self {
        Self::new(PeerId::HOST, PeerRole::Host, PeerState::Connected, now)
    }

    /// Creates a client record in `Connecting`.
    #[must_use]
    pub fn client(id: PeerId, now: Duration) -> Self {
        Self::new(id, PeerRole::Client, PeerState::Connecting, now)
    }

    /// Moves to `next` if legal. Returns false and leaves the state alone
    /// otherwise.
    pub fn transition(&mut self, next: PeerState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next != PeerState::Synchronizing {
            self.sync_target = None;
        }
        true
    }

    /// Starts a full-state transfer at `tick`.
    ///
    /// A peer already synchronizing just retargets.
    pub fn begin_sync(&mut self, tick: Tick) -> bool {
        if self.state == PeerState::Synchronizing || self.transition(PeerState::Synchronizing) {
            self.sync_target = Some(tick);
            return true;
        }
        false
    }

    /// Records a progress report.
    ///
    /// Older acknowledgements are ignored so that `last_acked_tick` never
    /// goes backwards. Returns true if the report was applied.
    pub fn record_ack(&mut self, tick: Tick, ticks_behind: u16) -> bool {
        if tick < self.last_acked_tick {
            return false;
        }
        self.last_acked_tick = tick;
        self.ticks_behind = if self.role == PeerRole::Host { 0 } else { ticks_behind };
        true
    }

    /// Returns true once the peer's acknowledged tick reached its sync target.
    #[must_use]
    pub fn sync_complete(&self) -> bool {
        self.state == PeerState::Synchronizing
            && self.sync_target.is_some_and(|target| self.last_acked_tick >= target)
    }

    /// Returns true if the peer has been silent longer than `timeout`.
    #[must_use]
    pub fn is_timed_out(&self, now: Duration, timeout: Duration) -> bool {
        now.saturating_sub(self.last_seen) > timeout
    }
}
