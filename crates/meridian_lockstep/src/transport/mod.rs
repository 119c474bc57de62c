//! # Transport Contract
//!
//! Byte delivery between session peers.
//!
//! ## Design
//!
//! - Fire-and-forget: `connect` and `send` never wait for the network
//! - Inbound traffic is buffered and drained with [`Transport::poll_event`]
//! - The coordinator is the only caller, always from the simulation thread

mod local;

pub use local::{LocalNetwork, LocalTransport, TransportStats};

use meridian_shared::PeerId;

use crate::error::TransportError;

/// Delivery guarantee requested for a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Delivered once, in send order per link.
    ReliableOrdered,
    /// Delivered once, any order.
    ReliableUnordered,
    /// May be dropped.
    Unreliable,
}

/// Something the transport observed since the last poll.
///
/// Events from one remote peer are delivered in the order they occurred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link came up. On a host, `peer` is the id assigned to the new
    /// client; on a client it is always [`PeerId::HOST`].
    Connected(PeerId),
    /// A link went down, or a connect attempt failed.
    Disconnected(PeerId),
    /// Bytes arrived from a peer.
    Data {
        /// Sender.
        peer: PeerId,
        /// Message bytes.
        bytes: Vec<u8>,
    },
}

/// Minimal peer-to-peer transport used by the coordinator.
pub trait Transport {
    /// Starts accepting connections on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PortUnavailable`] if the port is taken.
    fn bind_and_listen(&mut self, port: u16) -> Result<(), TransportError>;

    /// Starts connecting to a host. The outcome arrives as an event.
    ///
    /// # Errors
    ///
    /// Only fails for requests that can never succeed, such as a malformed
    /// address or an endpoint that is already active.
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError>;

    /// Sends bytes to one peer. Unknown peers are ignored.
    fn send(&mut self, peer: PeerId, bytes: &[u8], mode: DeliveryMode);

    /// Sends bytes to every linked peer except `exclude`.
    fn broadcast(&mut self, bytes: &[u8], mode: DeliveryMode, exclude: Option<PeerId>);

    /// Drops the link to a single peer.
    fn disconnect_peer(&mut self, peer: PeerId);

    /// Drops every link and releases the port. Safe to call repeatedly.
    fn disconnect(&mut self);

    /// Returns the next buffered event, without blocking.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
