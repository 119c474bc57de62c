//! Events the coordinator reports to the simulation layer.

use meridian_shared::{PeerId, SpeedLevel, Tick};

use crate::protocol::{LobbyUpdate, RejectReason};

/// Why a peer left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reported the link down.
    LinkLost,
    /// Nothing was heard within the peer timeout.
    Timeout,
}

/// Why the host discarded a command batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The sender is not (yet) fully synchronized.
    NotSynchronized,
    /// The batch claims an origin other than its sender.
    Unauthorized,
}

/// Something the simulation layer may want to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host: a client completed the handshake.
    PeerConnected(PeerId),
    /// A peer left the session.
    PeerDisconnected {
        /// Who left.
        peer: PeerId,
        /// Why.
        reason: DisconnectReason,
    },
    /// Host: a handshake was refused.
    PeerRejected {
        /// Link that was refused.
        peer: PeerId,
        /// Why.
        reason: RejectReason,
    },
    /// Client: the host accepted us.
    HandshakeAccepted {
        /// Id the host assigned.
        local_id: PeerId,
        /// Host tick at acceptance.
        host_tick: Tick,
    },
    /// Client: the host refused us. The session is over.
    HandshakeRejected(RejectReason),
    /// Client: the host could not be reached or never answered.
    ConnectionFailed,
    /// The lobby roster changed.
    LobbyUpdated(LobbyUpdate),
    /// The simulation clock started.
    GameStarted {
        /// Tick the game started at.
        tick: Tick,
        /// Starting speed.
        speed: SpeedLevel,
    },
    /// Requested speed, effective speed or pause state changed.
    SpeedChanged {
        /// Speed asked for.
        requested: SpeedLevel,
        /// Speed after throttling.
        effective: SpeedLevel,
        /// Pause flag.
        paused: bool,
    },
    /// Host: a client batch was discarded.
    CommandBatchDropped {
        /// Sender.
        peer: PeerId,
        /// Apply tick the batch asked for.
        tick: Tick,
        /// Why.
        reason: DropReason,
    },
    /// Host: a client batch arrived after its tick ran and was moved.
    CommandBatchMoved {
        /// Sender.
        peer: PeerId,
        /// Apply tick the batch asked for.
        from_tick: Tick,
        /// Apply tick every peer uses instead.
        to_tick: Tick,
    },
    /// Host: a full-state transfer to a peer started.
    PeerResyncStarted {
        /// Receiving peer.
        peer: PeerId,
        /// State tick.
        tick: Tick,
    },
    /// Host: a peer caught up with its full-state transfer.
    PeerSynchronized(PeerId),
    /// Client: a full-state transfer was applied.
    StateSynchronized {
        /// State tick.
        tick: Tick,
    },
    /// Client: a full-state transfer could not be applied.
    StateSyncFailed {
        /// State tick.
        tick: Tick,
    },
    /// A checksum disagreed. On a client `peer` is [`PeerId::LOCAL`].
    DesyncDetected {
        /// Peer whose value disagreed.
        peer: PeerId,
        /// Compared tick.
        tick: Tick,
        /// Local checksum.
        local_checksum: u32,
        /// Remote checksum.
        remote_checksum: u32,
    },
    /// A checksum agreed.
    ChecksumVerified {
        /// Peer whose value agreed.
        peer: PeerId,
        /// Compared tick.
        tick: Tick,
    },
    /// The local session ended.
    SessionEnded,
}
