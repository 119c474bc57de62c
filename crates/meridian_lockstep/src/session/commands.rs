//! Per-tick command queue.
//!
//! Batches are keyed by apply tick. Within a tick they come out sorted by
//! `(origin, sequence)`, so arrival order never affects the simulation.

use std::collections::BTreeMap;

use meridian_shared::{PeerId, Tick};

use crate::protocol::CommandBatch;

/// Command batches waiting for their tick.
#[derive(Clone, Debug, Default)]
pub struct CommandQueue {
    pending: BTreeMap<Tick, Vec<CommandBatch>>,
    len: usize,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a batch for `tick`. A batch with the same origin and sequence
    /// already queued for that tick is a duplicate and is not added.
    pub fn push(&mut self, tick: Tick, batch: CommandBatch) -> bool {
        let batches = self.pending.entry(tick).or_default();
        if batches
            .iter()
            .any(|queued| queued.origin == batch.origin && queued.sequence == batch.sequence)
        {
            return false;
        }
        batches.push(batch);
        self.len += 1;
        true
    }

    /// Removes and returns the batches for `tick` in apply order.
    pub fn take(&mut self, tick: Tick) -> Vec<CommandBatch> {
        let mut batches = self.pending.remove(&tick).unwrap_or_default();
        self.len -= batches.len();
        batches.sort_by_key(|batch| (batch.origin, batch.sequence));
        batches
    }

    /// Returns true if the batch `(origin, sequence)` is queued at any tick.
    #[must_use]
    pub fn contains(&self, origin: PeerId, sequence: u32) -> bool {
        self.pending
            .values()
            .flatten()
            .any(|batch| batch.origin == origin && batch.sequence == sequence)
    }

    /// Unqueues the batch `(origin, sequence)` and returns the tick it was
    /// scheduled for.
    pub fn remove(&mut self, origin: PeerId, sequence: u32) -> Option<Tick> {
        let (&tick, batches) = self.pending.iter_mut().find(|(_, batches)| {
            batches
                .iter()
                .any(|batch| batch.origin == origin && batch.sequence == sequence)
        })?;
        batches.retain(|batch| batch.origin != origin || batch.sequence != sequence);
        if batches.is_empty() {
            self.pending.remove(&tick);
        }
        self.len -= 1;
        Some(tick)
    }

    /// Batches scheduled after `tick`, in apply order.
    pub fn pending_after(&self, tick: Tick) -> impl Iterator<Item = (Tick, &CommandBatch)> {
        self.pending
            .range(tick + 1..)
            .flat_map(|(&at, batches)| {
                let mut ordered: Vec<&CommandBatch> = batches.iter().collect();
                ordered.sort_by_key(|batch| (batch.origin, batch.sequence));
                ordered.into_iter().map(move |batch| (at, batch))
            })
    }

    /// Number of batches queued for `tick`.
    #[must_use]
    pub fn count_at(&self, tick: Tick) -> usize {
        self.pending.get(&tick).map_or(0, Vec::len)
    }

    /// Number of batches queued for `tick` from `origin`.
    #[must_use]
    pub fn count_from(&self, tick: Tick, origin: PeerId) -> usize {
        self.pending
            .get(&tick)
            .map_or(0, |batches| batches.iter().filter(|batch| batch.origin == origin).count())
    }

    /// Total queued batches.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(origin: i32, sequence: u32) -> CommandBatch {
        CommandBatch {
            origin: PeerId(origin),
            sequence,
            data: vec![origin as u8, sequence as u8],
        }
    }

    #[test]
    fn test_take_is_ordered_by_origin_then_sequence() {
        let mut queue = CommandQueue::new();
        queue.push(10, batch(2, 0));
        queue.push(10, batch(0, 5));
        queue.push(10, batch(1, 1));
        queue.push(10, batch(1, 0));

        let order: Vec<(i32, u32)> = queue
            .take(10)
            .iter()
            .map(|batch| (batch.origin.0, batch.sequence))
            .collect();
        assert_eq!(order, vec![(0, 5), (1, 0), (1, 1), (2, 0)]);
        assert!(queue.is_empty());
        assert!(queue.take(10).is_empty());
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut queue = CommandQueue::new();
        assert!(queue.push(10, batch(1, 3)));
        assert!(!queue.push(10, batch(1, 3)));
        assert!(queue.push(11, batch(1, 3)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_finds_batch_at_any_tick() {
        let mut queue = CommandQueue::new();
        queue.push(5, batch(1, 0));
        queue.push(6, batch(1, 1));
        queue.push(6, batch(2, 1));
        assert!(queue.contains(PeerId(1), 1));

        assert_eq!(queue.remove(PeerId(1), 1), Some(6));
        assert!(!queue.contains(PeerId(1), 1));
        assert_eq!(queue.count_at(6), 1);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.remove(PeerId(1), 0), Some(5));
        assert_eq!(queue.count_at(5), 0);
        assert_eq!(queue.remove(PeerId(1), 0), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pending_after() {
        let mut queue = CommandQueue::new();
        queue.push(5, batch(1, 0));
        queue.push(9, batch(2, 0));
        queue.push(9, batch(0, 0));
        queue.push(12, batch(1, 1));

        let pending: Vec<(Tick, i32)> = queue
            .pending_after(5)
            .map(|(tick, batch)| (tick, batch.origin.0))
            .collect();
        assert_eq!(pending, vec![(9, 0), (9, 2), (12, 1)]);
        assert_eq!(queue.count_from(9, PeerId(2)), 1);
    }
}
