//! Shared harness for the session integration tests.
//!
//! Every peer lives in this process on one [`LocalNetwork`]. Time is
//! simulated: a frame is exactly one tick at the initial speed, so runs
//! are deterministic and need no sleeping.

#![allow(dead_code)]

use std::time::Duration;

use meridian_lockstep::protocol::{CommandBatch, Handshake, TickAck};
use meridian_lockstep::{
    Coordinator, Envelope, LocalNetwork, LocalTransport, Message, PeerId, ProvinceCommand,
    ProvinceSimulation, SessionConfig, SessionEvent, SessionPhase, Simulation, Tick, Transport,
    TransportEvent,
};
use meridian_shared::{DEFAULT_PORT, GAME_VERSION, PROTOCOL_VERSION};

pub const PORT: u16 = DEFAULT_PORT;
pub const SEED: u64 = 0x5EED;
pub const PROVINCES: usize = 32;

/// Test config: no readiness gate, everything else default.
pub fn config() -> SessionConfig {
    SessionConfig {
        require_all_ready: false,
        ..SessionConfig::default()
    }
}

/// A coordinator driving its own simulation, with every event it emitted.
pub struct Node {
    pub coordinator: Coordinator<LocalTransport>,
    pub sim: ProvinceSimulation,
    pub events: Vec<SessionEvent>,
}

impl Node {
    pub fn new(network: &LocalNetwork, config: SessionConfig) -> Self {
        Self::with_seed(network, config, SEED)
    }

    pub fn with_seed(network: &LocalNetwork, config: SessionConfig, seed: u64) -> Self {
        Self {
            coordinator: Coordinator::new(network.endpoint(), config).unwrap(),
            sim: ProvinceSimulation::new(seed, PROVINCES),
            events: Vec::new(),
        }
    }

    pub fn update(&mut self, elapsed: Duration) -> u32 {
        let executed = self.coordinator.update(&mut self.sim, elapsed);
        self.collect();
        executed
    }

    pub fn collect(&mut self) {
        self.events.extend(self.coordinator.drain_events());
    }

    pub fn submit(&mut self, province: u16, delta: i32) {
        let data = ProvinceCommand::encode_batch(&[ProvinceCommand { province, delta }]);
        let tick = self.coordinator.command_tick();
        self.coordinator.submit_command_batch(&data, tick).unwrap();
    }

    pub fn checksum(&self) -> u32 {
        self.sim.compute_state_checksum()
    }

    /// `(peer, tick)` of every desync reported so far.
    pub fn desyncs(&self) -> Vec<(PeerId, Tick)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::DesyncDetected { peer, tick, .. } => Some((*peer, *tick)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }

    pub fn has(&self, matches: impl Fn(&SessionEvent) -> bool) -> bool {
        self.events.iter().any(matches)
    }
}

/// One host plus clients on a private network.
pub struct Cluster {
    pub network: LocalNetwork,
    pub config: SessionConfig,
    pub host: Node,
    pub clients: Vec<Node>,
    pub frame: Duration,
}

impl Cluster {
    /// Host plus `clients` joined clients, still in the lobby.
    pub fn lobby(config: SessionConfig, clients: usize) -> Self {
        let network = LocalNetwork::new();
        let mut host = Node::new(&network, config.clone());
        host.coordinator.host(PORT).unwrap();

        let rate = config.ticks_per_second(config.initial_speed).max(1);
        let mut cluster = Self {
            network,
            config,
            host,
            clients: Vec::new(),
            frame: Duration::from_secs(1) / rate,
        };
        for _ in 0..clients {
            cluster.add_client();
        }
        cluster
    }

    /// Host plus `clients` clients with the game started.
    pub fn running(config: SessionConfig, clients: usize) -> Self {
        let mut cluster = Self::lobby(config, clients);
        cluster.host.coordinator.start_game().unwrap();
        cluster.host.collect();
        cluster.pump_clients();
        cluster
    }

    /// Connects one more client and completes its handshake.
    pub fn add_client(&mut self) -> usize {
        self.add_client_with_seed(SEED)
    }

    pub fn add_client_with_seed(&mut self, seed: u64) -> usize {
        let mut node = Node::with_seed(&self.network, self.config.clone(), seed);
        node.coordinator.connect("local", PORT).unwrap();
        self.clients.push(node);
        let index = self.clients.len() - 1;

        // Link up, handshake out, response back.
        for _ in 0..3 {
            self.pump_host();
            self.pump_clients();
        }
        index
    }

    /// Processes inbound traffic on the host without running ticks.
    pub fn pump_host(&mut self) {
        self.host.update(Duration::ZERO);
    }

    /// Lets every client process traffic and catch up.
    pub fn pump_clients(&mut self) {
        for client in &mut self.clients {
            client.update(Duration::ZERO);
        }
    }

    /// One frame for everybody: host first, then clients.
    pub fn frame(&mut self) {
        let frame = self.frame;
        self.host.update(frame);
        for client in &mut self.clients {
            client.update(frame);
        }
    }

    /// Runs frames until the host reached `tick`.
    pub fn run_until(&mut self, tick: Tick) {
        let mut guard = 0;
        while self.host.coordinator.current_tick() < tick {
            self.frame();
            guard += 1;
            assert!(guard < 1_000_000, "host stopped advancing");
        }
    }

    /// Lets clients drain announcements without the host advancing.
    pub fn settle(&mut self) {
        for _ in 0..4 {
            self.pump_host();
            self.pump_clients();
        }
    }

    pub fn client_phases(&self) -> Vec<SessionPhase> {
        self.clients
            .iter()
            .map(|client| client.coordinator.phase())
            .collect()
    }
}

/// A hand-driven client that speaks raw protocol messages.
pub struct RawPeer {
    pub transport: LocalTransport,
    pub inbox: Vec<Envelope>,
    pub link_events: Vec<TransportEvent>,
}

impl RawPeer {
    pub fn connect(network: &LocalNetwork, port: u16) -> Self {
        let mut transport = network.endpoint();
        transport.connect("local", port).unwrap();
        Self {
            transport,
            inbox: Vec::new(),
            link_events: Vec::new(),
        }
    }

    pub fn send(&mut self, tick: Tick, message: Message) {
        let mode = message.message_type().delivery_mode();
        let bytes = Envelope::at(tick, message).unwrap().encode().unwrap();
        self.transport.send(PeerId::HOST, &bytes, mode);
    }

    pub fn handshake(&mut self) {
        self.send(
            0,
            Message::Handshake(Handshake {
                protocol_version: PROTOCOL_VERSION,
                game_version: GAME_VERSION,
            }),
        );
    }

    pub fn send_batch(&mut self, tick: Tick, origin: PeerId, sequence: u32, data: &[u8]) {
        self.send(
            tick,
            Message::CommandBatch(CommandBatch {
                origin,
                sequence,
                data: data.to_vec(),
            }),
        );
    }

    pub fn ack(&mut self, acknowledged_tick: Tick, ticks_behind: u16) {
        self.send(
            acknowledged_tick,
            Message::TickAck(TickAck {
                acknowledged_tick,
                ticks_behind,
            }),
        );
    }

    /// Drains the transport into `inbox` and `link_events`.
    pub fn receive(&mut self) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Data { bytes, .. } => {
                    self.inbox.push(Envelope::decode(&bytes).unwrap());
                }
                other => self.link_events.push(other),
            }
        }
    }

    /// Received command batches with their apply tick.
    pub fn batches(&self) -> Vec<(Tick, CommandBatch)> {
        self.inbox
            .iter()
            .filter_map(|envelope| match &envelope.message {
                Message::CommandBatch(batch) => Some((Tick::from(envelope.target_tick), batch.clone())),
                _ => None,
            })
            .collect()
    }
}
