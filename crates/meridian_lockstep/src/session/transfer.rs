//! # Full-State Transfer
//!
//! Splits a serialized simulation state into `StateSync` chunks and puts it
//! back together on the receiving side.
//!
//! The blob is optionally LZ4 compressed (size-prepended) before splitting.
//! Every chunk of one transfer carries the same state tick in its envelope.

use meridian_shared::Tick;

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::StateChunk;

/// Splits `state` into chunks of at most `chunk_size` bytes.
///
/// # Errors
///
/// Fails if the state needs more than `u16::MAX` chunks.
pub fn split_state(state: &[u8], chunk_size: usize, compress: bool) -> ProtocolResult<Vec<StateChunk>> {
    let blob = if compress {
        lz4_flex::compress_prepend_size(state)
    } else {
        state.to_vec()
    };

    let chunk_size = chunk_size.max(1);
    let count = blob.len().div_ceil(chunk_size).max(1);
    let chunk_count = u16::try_from(count).map_err(|_| ProtocolError::PayloadTooLarge(blob.len()))?;

    if blob.is_empty() {
        return Ok(vec![StateChunk {
            chunk_index: 0,
            chunk_count,
            compressed: compress,
            data: Vec::new(),
        }]);
    }

    Ok(blob
        .chunks(chunk_size)
        .zip(0u16..)
        .map(|(data, chunk_index)| StateChunk {
            chunk_index,
            chunk_count,
            compressed: compress,
            data: data.to_vec(),
        })
        .collect())
}

/// Reassembly buffer for one incoming transfer.
#[derive(Debug, Default)]
pub struct StateAssembly {
    tick: Option<Tick>,
    compressed: bool,
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl StateAssembly {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick of the transfer in progress.
    #[must_use]
    pub const fn tick(&self) -> Option<Tick> {
        self.tick
    }

    /// Adds a chunk. Returns the complete state once every chunk arrived.
    ///
    /// A chunk for a different tick or layout abandons the transfer in
    /// progress and starts a new one.
    ///
    /// # Errors
    ///
    /// Fails if the reassembled blob does not decompress.
    pub fn accept(&mut self, tick: Tick, chunk: StateChunk) -> ProtocolResult<Option<Vec<u8>>> {
        let count = usize::from(chunk.chunk_count);
        if self.tick != Some(tick) || self.chunks.len() != count || self.compressed != chunk.compressed {
            if self.tick.is_some() {
                tracing::debug!("Abandoning state transfer for tick {:?}", self.tick);
            }
            self.tick = Some(tick);
            self.compressed = chunk.compressed;
            self.chunks = vec![None; count];
            self.received = 0;
        }

        let index = usize::from(chunk.chunk_index);
        if let Some(slot) = self.chunks.get_mut(index) {
            if slot.is_none() {
                *slot = Some(chunk.data);
                self.received += 1;
            }
        }

        if self.received < self.chunks.len() {
            return Ok(None);
        }

        let blob: Vec<u8> = std::mem::take(&mut self.chunks)
            .into_iter()
            .flatten()
            .flatten()
            .collect();
        let compressed = self.compressed;
        self.reset();

        if compressed {
            lz4_flex::decompress_size_prepended(&blob)
                .map(Some)
                .map_err(|error| ProtocolError::StateTransfer(error.to_string()))
        } else {
            Ok(Some(blob))
        }
    }

    /// Drops any partial transfer.
    pub fn reset(&mut self) {
        self.tick = None;
        self.compressed = false;
        self.chunks.clear();
        self.received = 0;
    }
}
