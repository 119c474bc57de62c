//! # MERIDIAN Lockstep
//!
//! Deterministic lockstep synchronization for multi-peer simulations.
//!
//! ## Architecture
//!
//! Peers replicate *commands*, never state, and prove they agree with
//! periodic state checksums:
//!
//! - **Protocol**: fixed 7-byte envelope plus a closed set of typed payloads
//! - **Transport**: minimal byte-delivery contract, one in-process reference
//! - **Coordinator**: peer registry, handshake, command routing, events
//! - **Tick Sync**: host-authoritative clock with lag-driven speed throttling
//! - **Desync Detection**: rolling-window checksum comparison
//!
//! ## Data Flow
//!
//! ```text
//! CLIENT                         HOST                          OTHER CLIENTS
//!   |                              |                                 |
//!   |--- CommandBatch(tick t) ---->| validate, queue                 |
//!   |                              |--- CommandBatch(tick t) ------->|
//!   |<-------- TickSync -----------|----------- TickSync ----------->|
//!   |--- TickAck ----------------->|<---------- TickAck -------------|
//!   |<--- ChecksumResponse ------->|<------ ChecksumResponse ------->|
//! ```
//!
//! A client never runs past the last tick the host announced. The host
//! slows down when a client falls behind.
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_lockstep::{Coordinator, LocalNetwork, ProvinceSimulation, SessionConfig};
//!
//! let network = LocalNetwork::new();
//! let mut host = Coordinator::new(network.endpoint(), SessionConfig::default())?;
//! let mut sim = ProvinceSimulation::new(7, 64);
//! host.host(7780)?;
//! host.start_game()?;
//! loop {
//!     host.update(&mut sim, frame_time);
//!     for event in host.drain_events() { /* ... */ }
//! }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod sync;
pub mod transport;

// Re-exports for convenience
pub use config::SessionConfig;
pub use error::{
    ConfigError, ProtocolError, ProtocolResult, SessionError, SessionResult, SimulationError,
    TransportError,
};
pub use meridian_shared::{PeerId, SpeedLevel, Tick};
pub use protocol::{Envelope, Message, MessageType, RejectReason};
pub use session::{
    Coordinator, DisconnectReason, DropReason, Peer, PeerRegistry, PeerRole, PeerState,
    SessionEvent, SessionPhase, SessionRole,
};
pub use simulation::{ProvinceCommand, ProvinceSimulation, Simulation};
pub use sync::{LinearThrottle, ThrottlePolicy};
pub use transport::{DeliveryMode, LocalNetwork, LocalTransport, Transport, TransportEvent};
