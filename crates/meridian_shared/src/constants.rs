//! # Protocol Constants
//!
//! **CRITICAL:** These values are baked into every peer.
//! A host and client built with different values will refuse each other at
//! handshake time.

// =============================================================================
// VERSIONING
// =============================================================================

/// Wire protocol revision. Bumped on any envelope or payload layout change.
pub const PROTOCOL_VERSION: u16 = 1;

/// Simulation revision. Peers with different rules cannot stay in lockstep.
pub const GAME_VERSION: u16 = 1;

// =============================================================================
// NETWORK
// =============================================================================

/// Default listen port for hosted sessions.
pub const DEFAULT_PORT: u16 = 7780;

/// Maximum participants in one session, host included.
pub const MAX_PLAYERS: usize = 16;

/// Envelope header size: `type: u8, target_tick: u32, payload_len: u16`.
pub const HEADER_SIZE: usize = 7;

/// Largest payload an envelope can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;
