//! # Peer Registry
//!
//! Authoritative table of session participants, keyed by peer id.
//!
//! Only the coordinator mutates it. Ids that leave are remembered so that
//! a stale id can never be registered again within the session.

use std::collections::{BTreeMap, BTreeSet};

use meridian_shared::{PeerId, Tick};

use super::peer::{ChecksumSample, Peer, PeerRole, PeerState};
use crate::protocol::LobbySlot;

/// Session participants.
#[derive(Clone, Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, Peer>,
    retired: BTreeSet<PeerId>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Fails if the id is present or was used before.
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.peers.contains_key(&peer.id) || self.retired.contains(&peer.id) {
            return false;
        }
        self.peers.insert(peer.id, peer);
        true
    }

    /// Removes a peer and retires its id. The returned record is marked
    /// `Disconnected`.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let mut peer = self.peers.remove(&id)?;
        self.retired.insert(id);
        peer.transition(PeerState::Disconnected);
        Some(peer)
    }

    /// Forgets everything, including retired ids.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.retired.clear();
    }

    /// Looks up a peer.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Looks up a peer mutably.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of registered peers, host included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All peers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Client peers in id order.
    pub fn clients(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(|peer| peer.role == PeerRole::Client)
    }

    /// Ids of clients that take part in the session.
    #[must_use]
    pub fn member_clients(&self) -> Vec<PeerId> {
        self.clients()
            .filter(|peer| peer.state.is_member())
            .map(|peer| peer.id)
            .collect()
    }

    /// Records a progress report. Returns false for unknown peers and
    /// acknowledgements older than the last one.
    pub fn record_ack(&mut self, id: PeerId, tick: Tick, ticks_behind: u16) -> bool {
        self.peers
            .get_mut(&id)
            .is_some_and(|peer| peer.record_ack(tick, ticks_behind))
    }

    /// Records the latest checksum a peer reported.
    pub fn record_checksum(&mut self, id: PeerId, tick: Tick, value: u32) {
        if let Some(peer) = self.peers.get_mut(&id) {
            if peer.last_checksum.map_or(true, |last| tick >= last.tick) {
                peer.last_checksum = Some(ChecksumSample { tick, value });
            }
        }
    }

    /// Largest lag among tracked clients.
    #[must_use]
    pub fn max_ticks_behind(&self) -> u16 {
        self.clients()
            .filter(|peer| peer.state.is_member())
            .map(|peer| peer.ticks_behind)
            .max()
            .unwrap_or(0)
    }

    /// Clients that are not ready.
    #[must_use]
    pub fn not_ready(&self) -> Vec<PeerId> {
        self.clients()
            .filter(|peer| peer.state.is_member() && !peer.is_ready)
            .map(|peer| peer.id)
            .collect()
    }

    /// Lobby slots, host first.
    #[must_use]
    pub fn lobby_slots(&self) -> Vec<LobbySlot> {
        self.peers
            .values()
            .filter(|peer| peer.state.is_member())
            .map(|peer| LobbySlot {
                peer_id: peer.id,
                country_id: peer.country_id,
                is_ready: peer.is_ready,
                is_host: peer.role == PeerRole::Host,
            })
            .collect()
    }
}
