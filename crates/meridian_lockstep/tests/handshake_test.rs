//! Integration tests for joining, leaving and the lobby.

mod common;

use std::time::Duration;

use common::{Cluster, Node, RawPeer, PORT};
use meridian_lockstep::protocol::{Handshake, HandshakeResponse, LobbyState};
use meridian_lockstep::{
    DisconnectReason, LocalNetwork, Message, PeerId, RejectReason, SessionConfig, SessionError,
    SessionEvent, SessionPhase, SpeedLevel, Transport, TransportEvent,
};
use meridian_shared::{GAME_VERSION, PROTOCOL_VERSION};

fn handshake_response(raw: &RawPeer) -> Option<HandshakeResponse> {
    raw.inbox.iter().find_map(|envelope| match envelope.message {
        Message::HandshakeResponse(response) => Some(response),
        _ => None,
    })
}

fn assert_raw_rejected(handshake: Handshake, expected: RejectReason) {
    let mut cluster = Cluster::lobby(common::config(), 0);
    let mut raw = RawPeer::connect(&cluster.network, PORT);
    cluster.pump_host();

    raw.send(0, Message::Handshake(handshake));
    cluster.pump_host();
    raw.receive();

    let response = handshake_response(&raw).unwrap();
    assert!(!response.accepted);
    assert_eq!(response.reject_reason, expected);
    assert!(raw.link_events.contains(&TransportEvent::Disconnected(PeerId::HOST)));

    let registry = cluster.host.coordinator.registry();
    assert!(!registry.contains(PeerId(1)));
    assert_eq!(registry.len(), 1);
    assert!(cluster.host.has(|event| *event
        == SessionEvent::PeerRejected {
            peer: PeerId(1),
            reason: expected
        }));
    assert!(!cluster
        .host
        .has(|event| matches!(event, SessionEvent::PeerConnected(_))));
}

#[test]
fn test_protocol_version_mismatch_is_rejected() {
    assert_raw_rejected(
        Handshake {
            protocol_version: 99,
            game_version: GAME_VERSION,
        },
        RejectReason::VersionMismatch,
    );
}

#[test]
fn test_game_version_mismatch_is_rejected() {
    assert_raw_rejected(
        Handshake {
            protocol_version: PROTOCOL_VERSION,
            game_version: GAME_VERSION + 1,
        },
        RejectReason::GameVersionMismatch,
    );
}

#[test]
fn test_accepted_client_joins_lobby() {
    let cluster = Cluster::lobby(common::config(), 2);

    assert_eq!(
        cluster.client_phases(),
        vec![SessionPhase::Lobby, SessionPhase::Lobby]
    );
    assert_eq!(cluster.clients[0].coordinator.local_id(), PeerId(1));
    assert_eq!(cluster.clients[1].coordinator.local_id(), PeerId(2));
    assert!(cluster.clients[0].has(|event| *event
        == SessionEvent::HandshakeAccepted {
            local_id: PeerId(1),
            host_tick: 0
        }));
    assert!(cluster.host.has(|event| *event == SessionEvent::PeerConnected(PeerId(2))));
    assert_eq!(cluster.host.coordinator.registry().len(), 3);

    let lobby = cluster.clients[0].coordinator.lobby();
    assert_eq!(lobby.state, LobbyState::Waiting);
    assert_eq!(lobby.slots.len(), 3);
    assert!(lobby.slots[0].is_host);
    assert_eq!(lobby.slots[0].peer_id, PeerId::HOST);
}

#[test]
fn test_session_full() {
    let config = SessionConfig {
        max_players: 2,
        ..common::config()
    };
    let mut cluster = Cluster::lobby(config, 1);
    let index = cluster.add_client();

    let rejected = &cluster.clients[index];
    assert_eq!(rejected.coordinator.phase(), SessionPhase::Idle);
    assert_eq!(rejected.coordinator.last_rejection(), Some(RejectReason::SessionFull));
    assert!(rejected.has(|event| *event == SessionEvent::HandshakeRejected(RejectReason::SessionFull)));
    assert!(rejected.has(|event| *event == SessionEvent::SessionEnded));
    assert_eq!(cluster.host.coordinator.registry().len(), 2);
}

#[test]
fn test_late_join_refused_when_disabled() {
    let config = SessionConfig {
        allow_late_join: false,
        ..common::config()
    };
    let mut cluster = Cluster::running(config, 0);
    cluster.run_until(10);
    let index = cluster.add_client();

    let rejected = &cluster.clients[index];
    assert_eq!(rejected.coordinator.role(), None);
    assert_eq!(rejected.coordinator.last_rejection(), Some(RejectReason::GameInProgress));
    assert!(cluster.host.has(|event| matches!(
        event,
        SessionEvent::PeerRejected {
            reason: RejectReason::GameInProgress,
            ..
        }
    )));
}

#[test]
fn test_readiness_gate() {
    let mut cluster = Cluster::lobby(SessionConfig::default(), 2);

    assert_eq!(
        cluster.host.coordinator.start_game(),
        Err(SessionError::PlayersNotReady(vec![PeerId(1), PeerId(2)]))
    );

    cluster.clients[0].coordinator.set_ready(true).unwrap();
    cluster.pump_host();
    assert_eq!(
        cluster.host.coordinator.start_game(),
        Err(SessionError::PlayersNotReady(vec![PeerId(2)]))
    );

    cluster.clients[1].coordinator.set_ready(true).unwrap();
    cluster.clients[1].coordinator.select_country(44).unwrap();
    cluster.pump_host();
    cluster.host.coordinator.start_game().unwrap();
    cluster.host.collect();
    cluster.pump_clients();

    assert_eq!(
        cluster.client_phases(),
        vec![SessionPhase::Running, SessionPhase::Running]
    );
    assert!(cluster.clients[0].has(|event| *event
        == SessionEvent::GameStarted {
            tick: 0,
            speed: SpeedLevel::DEFAULT
        }));

    let lobby = cluster.clients[0].coordinator.lobby();
    assert_eq!(lobby.state, LobbyState::InGame);
    let slot = lobby
        .slots
        .iter()
        .find(|slot| slot.peer_id == PeerId(2))
        .unwrap();
    assert!(slot.is_ready);
    assert_eq!(slot.country_id, 44);

    // Only the host starts games, and only once.
    assert_eq!(cluster.clients[0].coordinator.start_game(), Err(SessionError::NotHost));
    assert_eq!(
        cluster.host.coordinator.start_game(),
        Err(SessionError::WrongPhase(SessionPhase::Running))
    );
}

#[test]
fn test_unanswered_link_times_out_on_host() {
    let mut cluster = Cluster::lobby(common::config(), 0);
    let mut raw = RawPeer::connect(&cluster.network, PORT);
    cluster.pump_host();

    cluster.host.update(Duration::from_secs(3));
    raw.receive();
    assert!(raw.link_events.is_empty());

    cluster.host.update(Duration::from_secs(3));
    raw.receive();
    assert_eq!(raw.link_events, vec![TransportEvent::Disconnected(PeerId::HOST)]);
    assert_eq!(cluster.host.coordinator.registry().len(), 1);
}

#[test]
fn test_silent_client_times_out() {
    let mut cluster = Cluster::lobby(common::config(), 0);
    let mut raw = RawPeer::connect(&cluster.network, PORT);
    cluster.pump_host();
    raw.handshake();
    cluster.pump_host();
    assert!(cluster.host.coordinator.registry().contains(PeerId(1)));

    cluster.host.update(Duration::from_secs(11));
    raw.receive();

    assert!(!cluster.host.coordinator.registry().contains(PeerId(1)));
    assert!(cluster.host.has(|event| *event
        == SessionEvent::PeerDisconnected {
            peer: PeerId(1),
            reason: DisconnectReason::Timeout
        }));
    assert!(raw.link_events.contains(&TransportEvent::Disconnected(PeerId::HOST)));
}

#[test]
fn test_host_that_never_answers_fails_connection() {
    let network = LocalNetwork::new();
    let mut silent_host = network.endpoint();
    silent_host.bind_and_listen(PORT).unwrap();

    let mut client = Node::new(&network, common::config());
    client.coordinator.connect("local", PORT).unwrap();
    client.update(Duration::ZERO);
    assert_eq!(client.coordinator.phase(), SessionPhase::Handshaking);

    client.update(Duration::from_secs(6));
    assert_eq!(client.coordinator.phase(), SessionPhase::Idle);
    assert!(client.has(|event| *event == SessionEvent::ConnectionFailed));
    assert!(client.has(|event| *event == SessionEvent::SessionEnded));
}

#[test]
fn test_refused_connection_fails() {
    let network = LocalNetwork::new();
    let mut client = Node::new(&network, common::config());
    client.coordinator.connect("local", PORT).unwrap();
    client.update(Duration::ZERO);

    assert_eq!(client.coordinator.role(), None);
    assert_eq!(
        client.events,
        vec![SessionEvent::ConnectionFailed, SessionEvent::SessionEnded]
    );
}

#[test]
fn test_disconnect_is_idempotent() {
    let mut cluster = Cluster::running(common::config(), 2);
    cluster.run_until(20);

    // Idle coordinators have nothing to end.
    let mut idle = Node::new(&cluster.network, common::config());
    idle.coordinator.disconnect();
    idle.collect();
    assert!(idle.events.is_empty());

    let leaver = &mut cluster.clients[0];
    leaver.coordinator.disconnect();
    leaver.coordinator.disconnect();
    leaver.collect();
    assert_eq!(leaver.count(|event| *event == SessionEvent::SessionEnded), 1);
    assert_eq!(leaver.coordinator.phase(), SessionPhase::Idle);
    assert!(!leaver.coordinator.is_connected());

    cluster.pump_host();
    assert!(!cluster.host.coordinator.registry().contains(PeerId(1)));
    assert!(cluster.host.has(|event| *event
        == SessionEvent::PeerDisconnected {
            peer: PeerId(1),
            reason: DisconnectReason::LinkLost
        }));

    cluster.host.coordinator.disconnect();
    cluster.host.coordinator.disconnect();
    cluster.host.collect();
    assert_eq!(cluster.host.count(|event| *event == SessionEvent::SessionEnded), 1);

    let remaining = &mut cluster.clients[1];
    remaining.update(Duration::ZERO);
    assert_eq!(remaining.coordinator.role(), None);
    assert!(remaining.has(|event| *event
        == SessionEvent::PeerDisconnected {
            peer: PeerId::HOST,
            reason: DisconnectReason::LinkLost
        }));
    assert_eq!(remaining.count(|event| *event == SessionEvent::SessionEnded), 1);

    // A fresh session can start on the same coordinator.
    cluster.host.coordinator.host(PORT).unwrap();
    assert_eq!(cluster.host.coordinator.current_tick(), 0);
    assert_eq!(cluster.host.coordinator.phase(), SessionPhase::Lobby);
}
