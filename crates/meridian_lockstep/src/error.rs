//! # Lockstep Error Types
//!
//! Only session establishment failures ever reach a caller as `Err`.
//! Everything that goes wrong inside `poll` is logged and dropped.

use meridian_shared::{PeerId, SpeedLevel, Tick};
use thiserror::Error;

use crate::protocol::MessageType;

/// Errors decoding or encoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before a complete field could be read.
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the next field required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// The header's payload length disagrees with the bytes that followed it.
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch {
        /// Length written in the header.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Type byte outside the closed message set.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A payload decoded fully but bytes were left over.
    #[error("{message_type:?} payload has {extra} trailing bytes")]
    TrailingBytes {
        /// Message being decoded.
        message_type: MessageType,
        /// Unconsumed bytes.
        extra: usize,
    },

    /// A field held a value outside its domain.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending raw value.
        value: u64,
    },

    /// Payload exceeds what the envelope length field can describe.
    #[error("payload of {0} bytes exceeds envelope limit")]
    PayloadTooLarge(usize),

    /// Tick does not fit the 32-bit envelope field.
    #[error("tick {0} does not fit in the envelope")]
    TickOutOfRange(Tick),

    /// Reassembled full-state chunks could not be decoded.
    #[error("corrupt state transfer: {0}")]
    StateTransfer(String),
}

/// Errors reported synchronously by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Another endpoint already listens on this port.
    #[error("port {0} is unavailable")]
    PortUnavailable(u16),

    /// The endpoint is already bound or connected.
    #[error("transport is already active")]
    AlreadyActive,

    /// The address could not be understood.
    #[error("cannot resolve address {0}")]
    InvalidAddress(String),
}

/// Errors surfaced by [`Coordinator`](crate::Coordinator) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Binding the listen port failed.
    #[error("failed to bind transport: {0}")]
    TransportBind(#[source] TransportError),

    /// Starting the client connection failed.
    #[error("failed to connect: {0}")]
    TransportConnect(#[source] TransportError),

    /// A message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `host` or `connect` called on a live session.
    #[error("a session is already active")]
    AlreadyActive,

    /// Host-only operation called on a client or idle coordinator.
    #[error("operation requires the host role")]
    NotHost,

    /// Operation requires an established session.
    #[error("not connected")]
    NotConnected,

    /// Operation is not valid in the current phase.
    #[error("operation not allowed in phase {0:?}")]
    WrongPhase(crate::session::SessionPhase),

    /// The readiness gate blocked the game start.
    #[error("players not ready: {0:?}")]
    PlayersNotReady(Vec<PeerId>),

    /// Speed outside `0..=SpeedLevel::MAX`.
    #[error("invalid speed level {0:?}")]
    InvalidSpeed(SpeedLevel),

    /// The peer is not a registered client.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// Errors loading a session configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML did not parse into a config.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors a simulation reports while restoring transferred state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// The state blob was malformed.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
