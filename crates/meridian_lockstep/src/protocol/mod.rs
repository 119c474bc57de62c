//! # Session Protocol
//!
//! Binary envelope plus a closed set of typed payloads.
//!
//! ## Envelope Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (7 bytes, little-endian)                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Type (1) │ Target Tick (4) │ Payload Length (2)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (Payload Length bytes, max 65535)                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - Explicit per-field encoding, never a memory layout
//! - Unknown types and length disagreements are rejected, not skipped
//! - Commands carry the tick they apply at, not the tick they were sent

mod messages;
mod serialization;

pub use messages::{
    ChecksumReport, CommandBatch, Handshake, HandshakeResponse, LobbySlot, LobbyState,
    LobbyUpdate, Message, MessageType, RejectReason, StateChunk, TickAck, TickSync,
};
pub use serialization::{
    wire_tick, Envelope, PacketReader, PacketWriter, MAX_COMMAND_DATA, MAX_STATE_CHUNK_DATA,
};
