//! # Province Simulation
//!
//! Small deterministic world used by the demo and the integration tests:
//! a row of provinces holding integer values that drift every tick.
//!
//! ## State Layout
//!
//! ```text
//! seed: u64 | tick: u64 | count: u32 | count x value: i64   (little-endian)
//! ```
//!
//! The checksum is CRC32 over exactly those bytes.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::Simulation;
use crate::error::SimulationError;

/// Largest drift applied to a province in one tick.
const MAX_DRIFT: i64 = 3;

/// Size of the fixed state header.
const STATE_HEADER_SIZE: usize = 8 + 8 + 4;

/// Adds `delta` to one province.
///
/// Layout: `province: u16, delta: i32` (6 bytes). A command batch is any
/// number of these back to back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvinceCommand {
    /// Target province index.
    pub province: u16,
    /// Value change.
    pub delta: i32,
}

impl ProvinceCommand {
    /// Encoded size.
    pub const SIZE: usize = 6;

    /// Encodes a batch of commands.
    #[must_use]
    pub fn encode_batch(commands: &[Self]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(commands.len() * Self::SIZE);
        for command in commands {
            bytes.extend_from_slice(&command.province.to_le_bytes());
            bytes.extend_from_slice(&command.delta.to_le_bytes());
        }
        bytes
    }

    /// Decodes a batch. Returns `None` unless the length is a whole number
    /// of commands.
    #[must_use]
    pub fn decode_batch(bytes: &[u8]) -> Option<Vec<Self>> {
        if bytes.len() % Self::SIZE != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(Self::SIZE)
                .map(|chunk| Self {
                    province: u16::from_le_bytes([chunk[0], chunk[1]]),
                    delta: i32::from_le_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
                })
                .collect(),
        )
    }
}

/// Deterministic reference simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvinceSimulation {
    seed: u64,
    tick: u64,
    provinces: Vec<i64>,
}

impl ProvinceSimulation {
    /// Creates a world of `province_count` provinces, all starting at 100.
    #[must_use]
    pub fn new(seed: u64, province_count: usize) -> Self {
        Self {
            seed,
            tick: 0,
            provinces: vec![100; province_count],
        }
    }

    /// Ticks simulated so far.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Province values.
    #[must_use]
    pub fn provinces(&self) -> &[i64] {
        &self.provinces
    }

    fn tick_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed ^ self.tick.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl Simulation for ProvinceSimulation {
    fn advance_one_tick(&mut self) {
        let mut rng = self.tick_rng();
        for value in &mut self.provinces {
            *value = value.wrapping_add(rng.gen_range(-MAX_DRIFT..=MAX_DRIFT));
        }
        self.tick += 1;
    }

    fn compute_state_checksum(&self) -> u32 {
        crc32fast::hash(&self.serialize_full_state())
    }

    fn serialize_full_state(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(STATE_HEADER_SIZE + self.provinces.len() * 8);
        bytes.extend_from_slice(&self.seed.to_le_bytes());
        bytes.extend_from_slice(&self.tick.to_le_bytes());
        bytes.extend_from_slice(&(self.provinces.len() as u32).to_le_bytes());
        for value in &self.provinces {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn deserialize_and_apply_full_state(&mut self, bytes: &[u8]) -> Result<(), SimulationError> {
        if bytes.len() < STATE_HEADER_SIZE {
            return Err(SimulationError::CorruptState(format!(
                "header needs {STATE_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(STATE_HEADER_SIZE);
        let word = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&header[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let seed = word(0);
        let tick = word(8);
        let count = u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;

        if body.len() != count * 8 {
            return Err(SimulationError::CorruptState(format!(
                "{count} provinces need {} bytes, got {}",
                count * 8,
                body.len()
            )));
        }

        let provinces = body
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                i64::from_le_bytes(raw)
            })
            .collect();

        self.seed = seed;
        self.tick = tick;
        self.provinces = provinces;
        Ok(())
    }

    fn apply_command(&mut self, bytes: &[u8]) {
        let Some(commands) = ProvinceCommand::decode_batch(bytes) else {
            tracing::warn!("Ignoring malformed province command batch ({} bytes)", bytes.len());
            return;
        };
        for command in commands {
            match self.provinces.get_mut(usize::from(command.province)) {
                Some(value) => *value = value.wrapping_add(i64::from(command.delta)),
                None => tracing::warn!("Ignoring command for unknown province {}", command.province),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_history() {
        let mut a = ProvinceSimulation::new(42, 16);
        let mut b = ProvinceSimulation::new(42, 16);
        for _ in 0..500 {
            a.advance_one_tick();
            b.advance_one_tick();
        }
        assert_eq!(a, b);
        assert_eq!(a.compute_state_checksum(), b.compute_state_checksum());
        assert_ne!(a.provinces(), ProvinceSimulation::new(42, 16).provinces());
    }

    #[test]
    fn test_different_seed_diverges() {
        let mut a = ProvinceSimulation::new(1, 16);
        let mut b = ProvinceSimulation::new(2, 16);
        for _ in 0..50 {
            a.advance_one_tick();
            b.advance_one_tick();
        }
        assert_ne!(a.compute_state_checksum(), b.compute_state_checksum());
    }

    #[test]
    fn test_commands_change_checksum() {
        let mut a = ProvinceSimulation::new(7, 8);
        let before = a.compute_state_checksum();
        a.apply_command(&ProvinceCommand::encode_batch(&[
            ProvinceCommand { province: 3, delta: 25 },
            ProvinceCommand { province: 3, delta: -5 },
        ]));
        assert_eq!(a.provinces()[3], 120);
        assert_ne!(a.compute_state_checksum(), before);
    }

    #[test]
    fn test_malformed_commands_ignored() {
        let mut a = ProvinceSimulation::new(7, 8);
        let before = a.clone();
        a.apply_command(&[1, 2, 3]);
        a.apply_command(&ProvinceCommand::encode_batch(&[ProvinceCommand { province: 99, delta: 1 }]));
        assert_eq!(a, before);
    }

    #[test]
    fn test_full_state_transfer() {
        let mut source = ProvinceSimulation::new(9, 12);
        for _ in 0..77 {
            source.advance_one_tick();
        }
        let mut target = ProvinceSimulation::new(0, 0);
        target
            .deserialize_and_apply_full_state(&source.serialize_full_state())
            .unwrap();
        assert_eq!(target, source);

        source.advance_one_tick();
        target.advance_one_tick();
        assert_eq!(target.compute_state_checksum(), source.compute_state_checksum());
    }

    #[test]
    fn test_corrupt_state_leaves_sim_untouched() {
        let mut sim = ProvinceSimulation::new(5, 4);
        let before = sim.clone();
        let mut bytes = ProvinceSimulation::new(6, 4).serialize_full_state();
        bytes.pop();
        assert!(sim.deserialize_and_apply_full_state(&bytes).is_err());
        assert!(sim.deserialize_and_apply_full_state(&[0; 3]).is_err());
        assert_eq!(sim, before);
    }
}
