//! Integration tests for speed control, lag throttling and lag recovery.

mod common;

use std::time::Duration;

use common::{Cluster, RawPeer, PORT};
use meridian_lockstep::protocol::TickSync;
use meridian_lockstep::{
    LocalNetwork, Message, PeerId, PeerState, SessionConfig, SessionError, SessionEvent,
    SpeedLevel, Transport,
};

fn tick_syncs(raw: &RawPeer) -> Vec<TickSync> {
    raw.inbox
        .iter()
        .filter_map(|envelope| match envelope.message {
            Message::TickSync(sync) => Some(sync),
            _ => None,
        })
        .collect()
}

/// Runs only the host, one frame at a time, until it reached `tick`.
fn run_host_until(cluster: &mut Cluster, tick: u64) {
    let frame = cluster.frame;
    let mut guard = 0;
    while cluster.host.coordinator.current_tick() < tick {
        cluster.host.update(frame);
        guard += 1;
        assert!(guard < 100_000, "host stopped advancing");
    }
}

fn raw_session(config: SessionConfig) -> (Cluster, RawPeer, RawPeer) {
    let mut cluster = Cluster::lobby(config, 0);
    let mut a = RawPeer::connect(&cluster.network, PORT);
    let mut b = RawPeer::connect(&cluster.network, PORT);
    cluster.pump_host();
    a.handshake();
    b.handshake();
    cluster.pump_host();
    cluster.host.coordinator.start_game().unwrap();
    cluster.host.collect();
    (cluster, a, b)
}

#[test]
fn test_laggard_throttles_and_recovers_when_it_leaves() {
    let config = SessionConfig {
        initial_speed: SpeedLevel(4),
        peer_timeout_ms: 600_000,
        ..common::config()
    };
    let (mut cluster, mut a, mut b) = raw_session(config);

    run_host_until(&mut cluster, 1_000);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(4));

    a.ack(998, 2);
    b.ack(988, 12);
    run_host_until(&mut cluster, 1_020);

    // Recomputed before the tick 1020 announcement went out.
    b.receive();
    let sync = tick_syncs(&b)
        .into_iter()
        .find(|sync| sync.current_tick == 1_020)
        .unwrap();
    assert_eq!(sync.effective_speed, SpeedLevel(2));
    assert!(!sync.is_paused);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(2));
    assert_eq!(cluster.host.coordinator.requested_speed(), SpeedLevel(4));
    assert!(cluster.host.has(|event| *event
        == SessionEvent::SpeedChanged {
            requested: SpeedLevel(4),
            effective: SpeedLevel(2),
            paused: false
        }));

    // Lag persists: no recovery even after the cooldown.
    run_host_until(&mut cluster, 1_200);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(2));

    // Losing the laggard recomputes at once.
    b.transport.disconnect();
    cluster.pump_host();
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(4));
    a.receive();
    let latest = tick_syncs(&a).into_iter().last().unwrap();
    assert_eq!(latest.effective_speed, SpeedLevel(4));
    assert_eq!(latest.current_tick, 1_200);
}

#[test]
fn test_speed_increase_waits_for_cooldown() {
    let config = SessionConfig {
        initial_speed: SpeedLevel(4),
        peer_timeout_ms: 600_000,
        ..common::config()
    };
    let (mut cluster, mut a, _b) = raw_session(config);

    run_host_until(&mut cluster, 100);
    a.ack(90, 20);
    run_host_until(&mut cluster, 120);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(1));

    a.ack(125, 0);
    run_host_until(&mut cluster, 239);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(1));
    run_host_until(&mut cluster, 240);
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(4));
}

#[test]
fn test_far_behind_client_gets_full_state() {
    let config = SessionConfig {
        peer_timeout_ms: 600_000,
        ..common::config()
    };
    let (mut cluster, mut a, _b) = raw_session(config);
    run_host_until(&mut cluster, 20);

    a.ack(5, 700);
    cluster.pump_host();
    assert!(cluster.host.has(|event| *event
        == SessionEvent::PeerResyncStarted {
            peer: PeerId(1),
            tick: 20
        }));
    assert_eq!(
        cluster.host.coordinator.registry().get(PeerId(1)).map(|peer| peer.state),
        Some(PeerState::Synchronizing)
    );

    a.receive();
    let transfer_tick = a.inbox.iter().find_map(|envelope| match envelope.message {
        Message::StateSync(_) => Some(envelope.target_tick),
        _ => None,
    });
    assert_eq!(transfer_tick, Some(20));

    a.ack(20, 0);
    cluster.pump_host();
    assert!(cluster.host.has(|event| *event == SessionEvent::PeerSynchronized(PeerId(1))));
    assert_eq!(
        cluster.host.coordinator.registry().get(PeerId(1)).map(|peer| peer.state),
        Some(PeerState::Connected)
    );
}

#[test]
fn test_pause_stops_every_peer() {
    let mut cluster = Cluster::running(common::config(), 1);
    cluster.run_until(20);
    cluster.settle();

    cluster.host.coordinator.set_paused(true).unwrap();
    cluster.pump_clients();
    assert!(cluster.clients[0].coordinator.is_paused());

    for _ in 0..10 {
        cluster.frame();
    }
    assert_eq!(cluster.host.coordinator.current_tick(), 20);
    assert_eq!(cluster.clients[0].coordinator.current_tick(), 20);

    cluster.host.coordinator.set_paused(false).unwrap();
    assert_eq!(cluster.host.coordinator.requested_speed(), SpeedLevel::DEFAULT);
    cluster.run_until(30);
    cluster.settle();
    assert!(!cluster.clients[0].coordinator.is_paused());
    assert_eq!(cluster.clients[0].coordinator.current_tick(), 30);
}

#[test]
fn test_client_speed_request() {
    let mut cluster = Cluster::running(common::config(), 2);
    cluster.run_until(10);

    cluster.clients[0].coordinator.set_speed(SpeedLevel(5)).unwrap();
    cluster.pump_host();
    cluster.pump_clients();

    assert_eq!(cluster.host.coordinator.requested_speed(), SpeedLevel(5));
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(5));
    for client in &cluster.clients {
        assert_eq!(client.coordinator.requested_speed(), SpeedLevel(5));
        assert_eq!(client.coordinator.effective_speed(), SpeedLevel(5));
    }

    // Lowering applies immediately as well.
    cluster.clients[1].coordinator.set_speed(SpeedLevel(1)).unwrap();
    cluster.pump_host();
    assert_eq!(cluster.host.coordinator.effective_speed(), SpeedLevel(1));
}

#[test]
fn test_speed_requests_can_be_refused() {
    let config = SessionConfig {
        accept_speed_requests: false,
        ..common::config()
    };
    let mut cluster = Cluster::running(config, 1);
    cluster.clients[0].coordinator.set_speed(SpeedLevel(5)).unwrap();
    cluster.pump_host();
    assert_eq!(cluster.host.coordinator.requested_speed(), SpeedLevel::DEFAULT);
}

#[test]
fn test_speed_errors() {
    let network = LocalNetwork::new();
    let mut idle = common::Node::new(&network, common::config());
    assert_eq!(
        idle.coordinator.set_speed(SpeedLevel(3)),
        Err(SessionError::NotConnected)
    );

    let mut cluster = Cluster::running(common::config(), 0);
    assert_eq!(
        cluster.host.coordinator.set_speed(SpeedLevel(9)),
        Err(SessionError::InvalidSpeed(SpeedLevel(9)))
    );
    cluster.host.coordinator.set_speed(SpeedLevel(3)).unwrap();
    let frame = Duration::from_millis(100);
    // Speed 3 runs 20 ticks per second.
    assert_eq!(cluster.host.update(frame), 2);
}
