//! # Message Definitions
//!
//! The closed set of messages exchanged by session peers.
//!
//! Every payload has an explicit little-endian layout, documented on the
//! struct. Nothing here is ever transmuted to or from bytes.

use meridian_shared::{PeerId, SpeedLevel};

use crate::error::ProtocolError;
use crate::transport::DeliveryMode;

/// Types of messages in the protocol.
///
/// The discriminant is the wire type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client -> Host: version check, first message on a link.
    Handshake = 0,
    /// Host -> Client: accept or reject.
    HandshakeResponse = 1,
    /// Bidirectional: commands for a future tick.
    CommandBatch = 2,
    /// Host -> Client: one chunk of a full simulation state.
    StateSync = 3,
    /// Bidirectional: state checksum at a tick.
    ChecksumResponse = 4,
    /// Bidirectional: requested speed (client -> host is a request).
    GameSpeedChange = 5,
    /// Bidirectional: keep-alive.
    Heartbeat = 6,
    /// Host -> Client: lobby roster.
    LobbyUpdate = 7,
    /// Client -> Host: readiness toggle.
    PlayerReady = 8,
    /// Client -> Host: country pick.
    PlayerCountrySelected = 9,
    /// Host -> Client: the simulation clock starts.
    GameStart = 10,
    /// Host -> Client: authoritative tick and effective speed.
    TickSync = 11,
    /// Client -> Host: progress report.
    TickAck = 12,
}

impl MessageType {
    /// Delivery guarantee this message type needs.
    ///
    /// Checksums and heartbeats tolerate loss; acks tolerate reordering
    /// because the registry never lets them regress.
    #[must_use]
    pub const fn delivery_mode(self) -> DeliveryMode {
        match self {
            Self::ChecksumResponse | Self::Heartbeat => DeliveryMode::Unreliable,
            Self::TickAck => DeliveryMode::ReliableUnordered,
            _ => DeliveryMode::ReliableOrdered,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Handshake,
            1 => Self::HandshakeResponse,
            2 => Self::CommandBatch,
            3 => Self::StateSync,
            4 => Self::ChecksumResponse,
            5 => Self::GameSpeedChange,
            6 => Self::Heartbeat,
            7 => Self::LobbyUpdate,
            8 => Self::PlayerReady,
            9 => Self::PlayerCountrySelected,
            10 => Self::GameStart,
            11 => Self::TickSync,
            12 => Self::TickAck,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Why a host refused a handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// Not rejected.
    #[default]
    None = 0,
    /// Wire protocol versions differ.
    VersionMismatch = 1,
    /// Simulation versions differ.
    GameVersionMismatch = 2,
    /// No free player slot.
    SessionFull = 3,
    /// The game is running and late joining is disabled.
    GameInProgress = 4,
}

impl TryFrom<u8> for RejectReason {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::VersionMismatch,
            2 => Self::GameVersionMismatch,
            3 => Self::SessionFull,
            4 => Self::GameInProgress,
            other => {
                return Err(ProtocolError::InvalidField {
                    field: "reject_reason",
                    value: u64::from(other),
                })
            }
        })
    }
}

/// Lobby phase advertised to clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum LobbyState {
    /// Players are joining and picking countries.
    #[default]
    Waiting = 0,
    /// The simulation is running.
    InGame = 1,
}

impl TryFrom<u8> for LobbyState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::InGame),
            other => Err(ProtocolError::InvalidField {
                field: "lobby_state",
                value: u64::from(other),
            }),
        }
    }
}

/// Handshake - Client -> Host.
///
/// Layout: `protocol_version: u16, game_version: u16` (4 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Wire protocol revision of the client.
    pub protocol_version: u16,
    /// Simulation revision of the client.
    pub game_version: u16,
}

impl Handshake {
    /// Size in bytes.
    pub const SIZE: usize = 4;
}

/// Handshake response - Host -> Client.
///
/// Layout: `accepted: u8, reject_reason: u8, assigned_peer_id: i32,
/// current_tick: u32` (10 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Whether the client joined.
    pub accepted: bool,
    /// Reason when not accepted.
    pub reject_reason: RejectReason,
    /// Id the host assigned to the client.
    pub assigned_peer_id: PeerId,
    /// Host tick at acceptance.
    pub current_tick: u32,
}

impl HandshakeResponse {
    /// Size in bytes.
    pub const SIZE: usize = 10;

    /// Creates an acceptance.
    #[must_use]
    pub const fn accept(assigned_peer_id: PeerId, current_tick: u32) -> Self {
        Self {
            accepted: true,
            reject_reason: RejectReason::None,
            assigned_peer_id,
            current_tick,
        }
    }

    /// Creates a rejection.
    #[must_use]
    pub const fn reject(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reject_reason: reason,
            assigned_peer_id: PeerId::LOCAL,
            current_tick: 0,
        }
    }
}

/// Command batch - commands to apply at the envelope's target tick.
///
/// Layout: `origin_peer: i32, sequence: u32, data: [u8]` (8 + n bytes)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandBatch {
    /// Peer that issued the commands.
    pub origin: PeerId,
    /// Per-origin batch counter, used to order same-tick batches.
    pub sequence: u32,
    /// Opaque command bytes.
    pub data: Vec<u8>,
}

impl CommandBatch {
    /// Fixed part of the payload.
    pub const HEADER_SIZE: usize = 8;
}

/// Full-state chunk - Host -> Client.
///
/// Layout: `chunk_index: u16, chunk_count: u16, flags: u8, data: [u8]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChunk {
    /// Zero-based position of this chunk.
    pub chunk_index: u16,
    /// Total chunks in the transfer.
    pub chunk_count: u16,
    /// Whether the reassembled blob is LZ4 compressed.
    pub compressed: bool,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

impl StateChunk {
    /// Fixed part of the payload.
    pub const HEADER_SIZE: usize = 5;
    /// Flag bit: payload is LZ4 compressed.
    pub const FLAG_COMPRESSED: u8 = 1 << 0;
}

/// State checksum at a tick.
///
/// Layout: `tick: u32, checksum: u32` (8 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Tick the checksum describes.
    pub tick: u32,
    /// Checksum value.
    pub checksum: u32,
}

impl ChecksumReport {
    /// Size in bytes.
    pub const SIZE: usize = 8;
}

/// One lobby slot.
///
/// Layout: `peer_id: i32, country_id: u16, is_ready: u8, is_host: u8`
/// (8 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LobbySlot {
    /// Slot owner.
    pub peer_id: PeerId,
    /// Selected country (0 = none).
    pub country_id: u16,
    /// Readiness.
    pub is_ready: bool,
    /// Whether the slot is the host's.
    pub is_host: bool,
}

impl LobbySlot {
    /// Size in bytes.
    pub const SIZE: usize = 8;
}

/// Lobby roster - Host -> Client.
///
/// Layout: `player_count: u8, lobby_state: u8` then `player_count` slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbyUpdate {
    /// Lobby phase.
    pub state: LobbyState,
    /// Player slots, host first.
    pub slots: Vec<LobbySlot>,
}

/// Authoritative tick announcement - Host -> Client.
///
/// Layout: `current_tick: u64, effective_speed: u8, is_paused: u8` (10 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickSync {
    /// Host tick.
    pub current_tick: u64,
    /// Speed the host is actually running at.
    pub effective_speed: SpeedLevel,
    /// Host pause state.
    pub is_paused: bool,
}

impl TickSync {
    /// Size in bytes.
    pub const SIZE: usize = 10;
}

/// Progress report - Client -> Host.
///
/// Layout: `acknowledged_tick: u64, ticks_behind: u16` (10 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickAck {
    /// Last tick the client executed.
    pub acknowledged_tick: u64,
    /// Client's lag behind the last announced host tick.
    pub ticks_behind: u16,
}

impl TickAck {
    /// Size in bytes.
    pub const SIZE: usize = 10;
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Version check.
    Handshake(Handshake),
    /// Accept or reject.
    HandshakeResponse(HandshakeResponse),
    /// Commands.
    CommandBatch(CommandBatch),
    /// Full-state chunk.
    StateSync(StateChunk),
    /// Checksum.
    ChecksumResponse(ChecksumReport),
    /// Requested speed (0 = paused).
    GameSpeedChange(SpeedLevel),
    /// Keep-alive.
    Heartbeat,
    /// Lobby roster.
    LobbyUpdate(LobbyUpdate),
    /// Readiness toggle.
    PlayerReady(bool),
    /// Country pick.
    PlayerCountrySelected(u16),
    /// Clock start at the given speed.
    GameStart(SpeedLevel),
    /// Tick announcement.
    TickSync(TickSync),
    /// Progress report.
    TickAck(TickAck),
}

impl Message {
    /// Returns the message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Handshake(_) => MessageType::Handshake,
            Self::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Self::CommandBatch(_) => MessageType::CommandBatch,
            Self::StateSync(_) => MessageType::StateSync,
            Self::ChecksumResponse(_) => MessageType::ChecksumResponse,
            Self::GameSpeedChange(_) => MessageType::GameSpeedChange,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::LobbyUpdate(_) => MessageType::LobbyUpdate,
            Self::PlayerReady(_) => MessageType::PlayerReady,
            Self::PlayerCountrySelected(_) => MessageType::PlayerCountrySelected,
            Self::GameStart(_) => MessageType::GameStart,
            Self::TickSync(_) => MessageType::TickSync,
            Self::TickAck(_) => MessageType::TickAck,
        }
    }
}
