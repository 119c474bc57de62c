//! # Simulation Contract
//!
//! The lockstep core never owns or inspects game state. It decides *when*
//! a tick runs and *which* commands go into it; the simulation does the rest.
//!
//! ## Determinism
//!
//! Given the same starting state and the same command bytes in the same
//! order, every peer's implementation must produce bit-identical state.
//! No wall clock, no unseeded randomness, no iteration over hash maps.

mod reference;

pub use reference::{ProvinceCommand, ProvinceSimulation};

use crate::error::SimulationError;

/// A deterministic simulation driven by the coordinator.
pub trait Simulation {
    /// Runs one tick.
    fn advance_one_tick(&mut self);

    /// Checksum of the complete current state.
    fn compute_state_checksum(&self) -> u32;

    /// Serializes the complete state for transfer to another peer.
    fn serialize_full_state(&self) -> Vec<u8>;

    /// Replaces the current state with a serialized one.
    ///
    /// # Errors
    ///
    /// Must leave the current state untouched when the bytes are rejected.
    fn deserialize_and_apply_full_state(&mut self, bytes: &[u8]) -> Result<(), SimulationError>;

    /// Applies one command batch's bytes. Malformed bytes should be ignored.
    fn apply_command(&mut self, bytes: &[u8]);
}
