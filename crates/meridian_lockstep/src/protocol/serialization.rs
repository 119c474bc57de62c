//! # Message Serialization
//!
//! Explicit little-endian encoding for every message.
//!
//! ## Design
//!
//! - One writer and one reader, field by field
//! - Every decode checks lengths before reading
//! - A payload must be consumed exactly; leftovers are an error

use meridian_shared::{PeerId, SpeedLevel, Tick, HEADER_SIZE, MAX_PAYLOAD_SIZE};

use super::messages::*;
use crate::error::{ProtocolError, ProtocolResult};

/// Appends little-endian fields to a growable buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a writer with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a bool as `0` or `1`.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Consumes the writer and returns the bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads little-endian fields from a borrowed buffer.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, count: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::Truncated {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads a bool, rejecting anything but `0` and `1`.
    pub fn read_bool(&mut self, field: &'static str) -> ProtocolResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidField {
                field,
                value: u64::from(other),
            }),
        }
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> ProtocolResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> ProtocolResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads an i32 in little-endian format.
    #[inline]
    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> ProtocolResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Reads everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.position..];
        self.position = self.buffer.len();
        rest
    }

    fn read_speed(&mut self, field: &'static str) -> ProtocolResult<SpeedLevel> {
        let speed = SpeedLevel(self.read_u8()?);
        if !speed.is_valid() {
            return Err(ProtocolError::InvalidField {
                field,
                value: u64::from(speed.0),
            });
        }
        Ok(speed)
    }
}

/// Converts an internal tick to the 32-bit envelope field.
///
/// # Errors
///
/// Returns [`ProtocolError::TickOutOfRange`] past `u32::MAX`.
pub fn wire_tick(tick: Tick) -> ProtocolResult<u32> {
    u32::try_from(tick).map_err(|_| ProtocolError::TickOutOfRange(tick))
}

/// A message together with its envelope header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Tick the message refers to (apply tick for commands).
    pub target_tick: u32,
    /// The message.
    pub message: Message,
}

impl Envelope {
    /// Wraps a message for the given tick.
    ///
    /// # Errors
    ///
    /// Fails if the tick does not fit the envelope.
    pub fn at(tick: Tick, message: Message) -> ProtocolResult<Self> {
        Ok(Self {
            target_tick: wire_tick(tick)?,
            message,
        })
    }

    /// Encodes header and payload.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let payload = encode_payload(&self.message);
        let payload_len =
            u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

        let mut writer = PacketWriter::with_capacity(HEADER_SIZE + payload.len());
        writer.write_u8(self.message.message_type() as u8);
        writer.write_u32(self.target_tick);
        writer.write_u16(payload_len);
        writer.write_bytes(&payload);
        Ok(writer.into_inner())
    }

    /// Decodes a complete envelope.
    ///
    /// # Errors
    ///
    /// Rejects short headers, unknown types, length disagreements, and
    /// payloads that are malformed or not fully consumed.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut reader = PacketReader::new(bytes);
        let type_byte = reader.read_u8()?;
        let target_tick = reader.read_u32()?;
        let declared = usize::from(reader.read_u16()?);
        let message_type = MessageType::try_from(type_byte)?;

        let payload = reader.read_rest();
        if payload.len() != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        let message = decode_payload(message_type, payload)?;
        Ok(Self {
            target_tick,
            message,
        })
    }
}

fn encode_payload(message: &Message) -> Vec<u8> {
    let mut w = PacketWriter::new();
    match message {
        Message::Handshake(h) => {
            w.write_u16(h.protocol_version);
            w.write_u16(h.game_version);
        }
        Message::HandshakeResponse(r) => {
            w.write_bool(r.accepted);
            w.write_u8(r.reject_reason as u8);
            w.write_i32(r.assigned_peer_id.0);
            w.write_u32(r.current_tick);
        }
        Message::CommandBatch(batch) => {
            w.write_i32(batch.origin.0);
            w.write_u32(batch.sequence);
            w.write_bytes(&batch.data);
        }
        Message::StateSync(chunk) => {
            w.write_u16(chunk.chunk_index);
            w.write_u16(chunk.chunk_count);
            w.write_u8(if chunk.compressed { StateChunk::FLAG_COMPRESSED } else { 0 });
            w.write_bytes(&chunk.data);
        }
        Message::ChecksumResponse(c) => {
            w.write_u32(c.tick);
            w.write_u32(c.checksum);
        }
        Message::GameSpeedChange(speed) | Message::GameStart(speed) => w.write_u8(speed.0),
        Message::Heartbeat => {}
        Message::LobbyUpdate(lobby) => {
            // Roster length is bounded by MAX_PLAYERS long before u8 overflows.
            w.write_u8(lobby.slots.len().min(usize::from(u8::MAX)) as u8);
            w.write_u8(lobby.state as u8);
            for slot in lobby.slots.iter().take(usize::from(u8::MAX)) {
                w.write_i32(slot.peer_id.0);
                w.write_u16(slot.country_id);
                w.write_bool(slot.is_ready);
                w.write_bool(slot.is_host);
            }
        }
        Message::PlayerReady(ready) => w.write_bool(*ready),
        Message::PlayerCountrySelected(country) => w.write_u16(*country),
        Message::TickSync(sync) => {
            w.write_u64(sync.current_tick);
            w.write_u8(sync.effective_speed.0);
            w.write_bool(sync.is_paused);
        }
        Message::TickAck(ack) => {
            w.write_u64(ack.acknowledged_tick);
            w.write_u16(ack.ticks_behind);
        }
    }
    w.into_inner()
}

fn decode_payload(message_type: MessageType, payload: &[u8]) -> ProtocolResult<Message> {
    let mut r = PacketReader::new(payload);
    let message = match message_type {
        MessageType::Handshake => Message::Handshake(Handshake {
            protocol_version: r.read_u16()?,
            game_version: r.read_u16()?,
        }),
        MessageType::HandshakeResponse => Message::HandshakeResponse(HandshakeResponse {
            accepted: r.read_bool("accepted")?,
            reject_reason: RejectReason::try_from(r.read_u8()?)?,
            assigned_peer_id: PeerId(r.read_i32()?),
            current_tick: r.read_u32()?,
        }),
        MessageType::CommandBatch => Message::CommandBatch(CommandBatch {
            origin: PeerId(r.read_i32()?),
            sequence: r.read_u32()?,
            data: r.read_rest().to_vec(),
        }),
        MessageType::StateSync => {
            let chunk_index = r.read_u16()?;
            let chunk_count = r.read_u16()?;
            let flags = r.read_u8()?;
            if chunk_count == 0 || chunk_index >= chunk_count {
                return Err(ProtocolError::InvalidField {
                    field: "chunk_index",
                    value: u64::from(chunk_index),
                });
            }
            Message::StateSync(StateChunk {
                chunk_index,
                chunk_count,
                compressed: flags & StateChunk::FLAG_COMPRESSED != 0,
                data: r.read_rest().to_vec(),
            })
        }
        MessageType::ChecksumResponse => Message::ChecksumResponse(ChecksumReport {
            tick: r.read_u32()?,
            checksum: r.read_u32()?,
        }),
        MessageType::GameSpeedChange => Message::GameSpeedChange(r.read_speed("speed_level")?),
        MessageType::Heartbeat => Message::Heartbeat,
        MessageType::LobbyUpdate => {
            let count = usize::from(r.read_u8()?);
            let state = LobbyState::try_from(r.read_u8()?)?;
            let needed = count * LobbySlot::SIZE;
            if r.remaining() != needed {
                return Err(ProtocolError::LengthMismatch {
                    declared: needed,
                    actual: r.remaining(),
                });
            }
            let mut slots = Vec::with_capacity(count);
            for _ in 0..count {
                slots.push(LobbySlot {
                    peer_id: PeerId(r.read_i32()?),
                    country_id: r.read_u16()?,
                    is_ready: r.read_bool("is_ready")?,
                    is_host: r.read_bool("is_host")?,
                });
            }
            Message::LobbyUpdate(LobbyUpdate { state, slots })
        }
        MessageType::PlayerReady => Message::PlayerReady(r.read_bool("is_ready")?),
        MessageType::PlayerCountrySelected => Message::PlayerCountrySelected(r.read_u16()?),
        MessageType::GameStart => Message::GameStart(r.read_speed("speed_level")?),
        MessageType::TickSync => Message::TickSync(TickSync {
            current_tick: r.read_u64()?,
            effective_speed: r.read_speed("effective_speed")?,
            is_paused: r.read_bool("is_paused")?,
        }),
        MessageType::TickAck => Message::TickAck(TickAck {
            acknowledged_tick: r.read_u64()?,
            ticks_behind: r.read_u16()?,
        }),
    };

    if r.remaining() != 0 {
        return Err(ProtocolError::TrailingBytes {
            message_type,
            extra: r.remaining(),
        });
    }
    Ok(message)
}

/// Largest command payload that still fits an envelope.
pub const MAX_COMMAND_DATA: usize = MAX_PAYLOAD_SIZE - CommandBatch::HEADER_SIZE;

/// Largest state chunk that still fits an envelope.
pub const MAX_STATE_CHUNK_DATA: usize = MAX_PAYLOAD_SIZE - StateChunk::HEADER_SIZE;
