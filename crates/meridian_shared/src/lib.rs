//! # MERIDIAN Shared
//!
//! Common types used by both the host and its clients.
//!
//! ## CRITICAL RULE
//!
//! Anything in this crate is part of the wire contract. Changing a constant
//! here without bumping [`PROTOCOL_VERSION`] splits the player base.

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod speed;

pub use constants::{
    DEFAULT_PORT, GAME_VERSION, HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_PLAYERS, PROTOCOL_VERSION,
};
pub use ids::{PeerId, Tick};
pub use speed::SpeedLevel;
