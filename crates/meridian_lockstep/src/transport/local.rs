//! # In-Process Transport
//!
//! Reference [`Transport`] that links endpoints living in one process.
//!
//! ## Design
//!
//! - One hub behind a mutex holds listeners and links
//! - Every endpoint owns an unbounded inbox; senders push, the owner drains
//! - Delivery is FIFO per link, which satisfies every [`DeliveryMode`]
//! - Unreliable traffic can be dropped on demand to exercise lossy paths

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use meridian_shared::PeerId;
use parking_lot::Mutex;

use super::{DeliveryMode, Transport, TransportEvent};
use crate::error::TransportError;

type EndpointId = u64;

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages handed to the hub.
    pub messages_sent: u64,
    /// Messages drained from the inbox.
    pub messages_received: u64,
    /// Bytes handed to the hub.
    pub bytes_sent: u64,
    /// Bytes drained from the inbox.
    pub bytes_received: u64,
    /// Unreliable messages discarded.
    pub dropped: u64,
}

/// Links owned by a listening endpoint.
struct HostLinks {
    port: u16,
    next_peer: i32,
    peers: BTreeMap<PeerId, EndpointId>,
}

/// A client endpoint's single link.
#[derive(Clone, Copy)]
struct ClientLink {
    host: EndpointId,
    assigned: PeerId,
}

#[derive(Default)]
struct Hub {
    next_endpoint: EndpointId,
    inboxes: HashMap<EndpointId, Sender<TransportEvent>>,
    listeners: HashMap<u16, EndpointId>,
    hosts: HashMap<EndpointId, HostLinks>,
    clients: HashMap<EndpointId, ClientLink>,
    drop_unreliable: bool,
}

impl Hub {
    fn push(&self, endpoint: EndpointId, event: TransportEvent) {
        if let Some(inbox) = self.inboxes.get(&endpoint) {
            // A closed inbox means the endpoint was dropped; nothing to deliver.
            let _ = inbox.send(event);
        }
    }

    fn unlink_client(&mut self, client: EndpointId) -> Option<ClientLink> {
        let link = self.clients.remove(&client)?;
        if let Some(host) = self.hosts.get_mut(&link.host) {
            host.peers.remove(&link.assigned);
        }
        Some(link)
    }
}

/// Shared in-process "network" that hands out connected endpoints.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LocalNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, unbound endpoint on this network.
    #[must_use]
    pub fn endpoint(&self) -> LocalTransport {
        let (tx, rx) = unbounded();
        let mut hub = self.hub.lock();
        let id = hub.next_endpoint;
        hub.next_endpoint += 1;
        hub.inboxes.insert(id, tx);
        LocalTransport {
            hub: Arc::clone(&self.hub),
            id,
            inbox: rx,
            stats: TransportStats::default(),
        }
    }

    /// Discards all unreliable traffic while set.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.hub.lock().drop_unreliable = drop;
    }
}

/// One endpoint of a [`LocalNetwork`].
pub struct LocalTransport {
    hub: Arc<Mutex<Hub>>,
    id: EndpointId,
    inbox: Receiver<TransportEvent>,
    stats: TransportStats,
}

impl LocalTransport {
    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Returns true while listening or linked to a host.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let hub = self.hub.lock();
        hub.hosts.contains_key(&self.id) || hub.clients.contains_key(&self.id)
    }

    fn deliver(&mut self, hub: &Hub, target: EndpointId, from: PeerId, bytes: &[u8]) {
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        hub.push(
            target,
            TransportEvent::Data {
                peer: from,
                bytes: bytes.to_vec(),
            },
        );
    }

    fn drain_inbox(&self) {
        while self.inbox.try_recv().is_ok() {}
    }
}

impl Transport for LocalTransport {
    fn bind_and_listen(&mut self, port: u16) -> Result<(), TransportError> {
        let mut hub = self.hub.lock();
        if hub.hosts.contains_key(&self.id) || hub.clients.contains_key(&self.id) {
            return Err(TransportError::AlreadyActive);
        }
        if hub.listeners.contains_key(&port) {
            return Err(TransportError::PortUnavailable(port));
        }
        hub.listeners.insert(port, self.id);
        hub.hosts.insert(
            self.id,
            HostLinks {
                port,
                next_peer: 1,
                peers: BTreeMap::new(),
            },
        );
        tracing::debug!("Local endpoint {} listening on port {}", self.id, port);
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        if address.trim().is_empty() {
            return Err(TransportError::InvalidAddress(address.to_owned()));
        }

        let mut hub = self.hub.lock();
        if hub.hosts.contains_key(&self.id) || hub.clients.contains_key(&self.id) {
            return Err(TransportError::AlreadyActive);
        }

        let Some(&host) = hub.listeners.get(&port) else {
            // Nobody listening: the attempt fails asynchronously, like a refused dial.
            hub.push(self.id, TransportEvent::Disconnected(PeerId::HOST));
            return Ok(());
        };

        let assigned = match hub.hosts.get_mut(&host) {
            Some(links) => {
                let assigned = PeerId(links.next_peer);
                links.next_peer += 1;
                links.peers.insert(assigned, self.id);
                assigned
            }
            None => return Ok(()),
        };
        hub.clients.insert(self.id, ClientLink { host, assigned });
        hub.push(host, TransportEvent::Connected(assigned));
        hub.push(self.id, TransportEvent::Connected(PeerId::HOST));
        Ok(())
    }

    fn send(&mut self, peer: PeerId, bytes: &[u8], mode: DeliveryMode) {
        let hub = Arc::clone(&self.hub);
        let hub = hub.lock();
        if mode == DeliveryMode::Unreliable && hub.drop_unreliable {
            self.stats.dropped += 1;
            return;
        }

        if let Some(links) = hub.hosts.get(&self.id) {
            if let Some(&target) = links.peers.get(&peer) {
                self.deliver(&hub, target, PeerId::HOST, bytes);
            }
        } else if let Some(link) = hub.clients.get(&self.id).copied() {
            if peer.is_host() {
                self.deliver(&hub, link.host, link.assigned, bytes);
            }
        }
    }

    fn broadcast(&mut self, bytes: &[u8], mode: DeliveryMode, exclude: Option<PeerId>) {
        let hub = Arc::clone(&self.hub);
        let hub = hub.lock();
        if mode == DeliveryMode::Unreliable && hub.drop_unreliable {
            self.stats.dropped += 1;
            return;
        }

        if let Some(links) = hub.hosts.get(&self.id) {
            let targets: Vec<EndpointId> = links
                .peers
                .iter()
                .filter(|&(&peer, _)| Some(peer) != exclude)
                .map(|(_, &endpoint)| endpoint)
                .collect();
            for target in targets {
                self.deliver(&hub, target, PeerId::HOST, bytes);
            }
        } else if let Some(link) = hub.clients.get(&self.id).copied() {
            if exclude != Some(PeerId::HOST) {
                self.deliver(&hub, link.host, link.assigned, bytes);
            }
        }
    }

    fn disconnect_peer(&mut self, peer: PeerId) {
        let mut hub = self.hub.lock();
        let target = hub
            .hosts
            .get(&self.id)
            .and_then(|links| links.peers.get(&peer).copied());
        if let Some(client) = target {
            hub.unlink_client(client);
            hub.push(client, TransportEvent::Disconnected(PeerId::HOST));
            return;
        }
        if peer.is_host() {
            if let Some(link) = hub.unlink_client(self.id) {
                hub.push(link.host, TransportEvent::Disconnected(link.assigned));
            }
        }
    }

    fn disconnect(&mut self) {
        {
            let mut hub = self.hub.lock();
            if let Some(links) = hub.hosts.remove(&self.id) {
                hub.listeners.remove(&links.port);
                for (_, client) in links.peers {
                    hub.clients.remove(&client);
                    hub.push(client, TransportEvent::Disconnected(PeerId::HOST));
                }
            }
            if let Some(link) = hub.unlink_client(self.id) {
                hub.push(link.host, TransportEvent::Disconnected(link.assigned));
            }
        }
        self.drain_inbox();
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.inbox.try_recv().ok()?;
        if let TransportEvent::Data { bytes, .. } = &event {
            self.stats.messages_received += 1;
            self.stats.bytes_received += bytes.len() as u64;
        }
        Some(event)
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.disconnect();
        self.hub.lock().inboxes.remove(&self.id);
    }
}
