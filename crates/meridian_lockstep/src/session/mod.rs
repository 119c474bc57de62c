//! # Session Coordinator
//!
//! Owns the peer registry, the tick and checksum bookkeeping and the command
//! queue, and routes every protocol message.
//!
//! ## Phases
//!
//! ```text
//!            host()                    start_game() / GameStart
//! Idle ─────────────────────▶ Lobby ──────────────────────────▶ Running
//!   │                           ▲                                  ▲
//!   │ connect()                 │ HandshakeResponse(accepted)      │ StateSync
//!   └──────▶ Handshaking ───────┴──────────────────────────────────┘
//! ```
//!
//! ## Command Routing
//!
//! A client sends its batches to the host only. The host validates them,
//! queues them and forwards them to every other member. The host's own
//! batches are broadcast directly. Nobody receives its own batch back,
//! except a client whose batch reached the host after its apply tick: the
//! host moves it to its next tick and tells the originator where it went.
//!
//! ## Threading
//!
//! None. `poll` and `update` run on the simulation thread and are the only
//! places state changes.

mod client;
mod commands;
mod events;
mod host;
mod peer;
mod registry;
mod transfer;

pub use commands::CommandQueue;
pub use events::{DisconnectReason, DropReason, SessionEvent};
pub use peer::{ChecksumSample, Peer, PeerRole, PeerState};
pub use registry::PeerRegistry;
pub use transfer::{split_state, StateAssembly};

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use meridian_shared::{PeerId, SpeedLevel, Tick};

use crate::config::SessionConfig;
use crate::error::{ConfigError, ProtocolError, SessionError, SessionResult};
use crate::protocol::{
    wire_tick, ChecksumReport, CommandBatch, Envelope, LobbyUpdate, Message, RejectReason,
    MAX_COMMAND_DATA,
};
use crate::simulation::Simulation;
use crate::sync::{
    ChecksumOutcome, ClockStats, DesyncDetector, DesyncStats, LinearThrottle, ThrottlePolicy,
    TickClock, TickSynchronizer,
};
use crate::transport::{Transport, TransportEvent};

/// Which side of the session this coordinator plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRole {
    /// Authoritative host.
    Host,
    /// Client of a remote host.
    Client,
}

/// Session lifecycle phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session.
    #[default]
    Idle,
    /// Client waiting for the handshake response.
    Handshaking,
    /// Players are gathering; the clock is stopped.
    Lobby,
    /// The simulation clock runs.
    Running,
}

/// Lockstep session coordinator.
pub struct Coordinator<T: Transport> {
    config: SessionConfig,
    transport: T,
    role: Option<SessionRole>,
    phase: SessionPhase,
    local_id: PeerId,
    registry: PeerRegistry,
    ticks: TickSynchronizer,
    clock: TickClock,
    desync: DesyncDetector,
    commands: CommandQueue,
    next_sequence: u32,
    /// Host: newest tick announced in any `TickSync`.
    last_tick_sync: Tick,
    /// Host: links waiting for a handshake, with the time they came up.
    handshakes: BTreeMap<PeerId, Duration>,
    /// Client: when the connect attempt started.
    handshake_started: Option<Duration>,
    /// Client: last roster received from the host.
    lobby: LobbyUpdate,
    transfer: StateAssembly,
    events: VecDeque<SessionEvent>,
    /// Session clock, advanced by `update`.
    now: Duration,
    last_heartbeat: Duration,
    last_rejection: Option<RejectReason>,
}

impl<T: Transport> Coordinator<T> {
    /// Creates an idle coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is unusable.
    pub fn new(transport: T, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ticks = TickSynchronizer::new(
            Box::new(LinearThrottle::new(config.lag_threshold)),
            config.initial_speed,
            config.speed_increase_cooldown,
        );
        let desync = DesyncDetector::new(
            config.checksum_interval,
            config.checksum_window_ticks,
            config.max_pending_checksums,
        );
        Ok(Self {
            config,
            transport,
            role: None,
            phase: SessionPhase::Idle,
            local_id: PeerId::LOCAL,
            registry: PeerRegistry::new(),
            ticks,
            clock: TickClock::new(),
            desync,
            commands: CommandQueue::new(),
            next_sequence: 0,
            last_tick_sync: 0,
            handshakes: BTreeMap::new(),
            handshake_started: None,
            lobby: LobbyUpdate::default(),
            transfer: StateAssembly::new(),
            events: VecDeque::new(),
            now: Duration::ZERO,
            last_heartbeat: Duration::ZERO,
            last_rejection: None,
        })
    }

    /// Replaces the default linear throttle.
    #[must_use]
    pub fn with_throttle_policy(mut self, policy: Box<dyn ThrottlePolicy>) -> Self {
        self.ticks = TickSynchronizer::new(
            policy,
            self.config.initial_speed,
            self.config.speed_increase_cooldown,
        );
        self
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Role, if a session is active.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> Option<SessionRole> {
        self.role
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Own peer id. [`PeerId::LOCAL`] until a host assigns one.
    #[inline]
    #[must_use]
    pub const fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Returns true when hosting.
    #[inline]
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.role == Some(SessionRole::Host)
    }

    /// Returns true when commands can be submitted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match self.role {
            Some(SessionRole::Host) => true,
            Some(SessionRole::Client) => {
                matches!(self.phase, SessionPhase::Lobby | SessionPhase::Running)
                    && self.local_state() == Some(PeerState::Connected)
            }
            None => false,
        }
    }

    /// Last executed tick.
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.ticks.current_tick()
    }

    /// Newest host tick known locally.
    #[inline]
    #[must_use]
    pub const fn host_tick(&self) -> Tick {
        self.ticks.host_tick()
    }

    /// Local lag behind the host.
    #[must_use]
    pub fn ticks_behind(&self) -> u16 {
        self.ticks.ticks_behind()
    }

    /// Requested speed.
    #[inline]
    #[must_use]
    pub const fn requested_speed(&self) -> SpeedLevel {
        self.ticks.requested()
    }

    /// Speed after lag throttling.
    #[inline]
    #[must_use]
    pub const fn effective_speed(&self) -> SpeedLevel {
        self.ticks.effective()
    }

    /// Pause state.
    #[inline]
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.ticks.is_paused()
    }

    /// Recommended apply tick for a batch submitted now.
    #[must_use]
    pub const fn command_tick(&self) -> Tick {
        let current = self.ticks.current_tick();
        let host = self.ticks.host_tick();
        let base = if host > current { host } else { current };
        base + self.config.input_delay_ticks
    }

    /// Peer registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Current lobby roster.
    #[must_use]
    pub fn lobby(&self) -> LobbyUpdate {
        match self.role {
            Some(SessionRole::Host) => self.host_lobby(),
            _ => self.lobby.clone(),
        }
    }

    /// Configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transport.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Reason of the last handshake rejection this client received.
    #[inline]
    #[must_use]
    pub const fn last_rejection(&self) -> Option<RejectReason> {
        self.last_rejection
    }

    /// Batches queued for `tick`.
    #[must_use]
    pub fn queued_batches(&self, tick: Tick) -> usize {
        self.commands.count_at(tick)
    }

    /// Total queued batches.
    #[must_use]
    pub const fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Checksum statistics.
    #[must_use]
    pub const fn desync_stats(&self) -> &DesyncStats {
        self.desync.stats()
    }

    /// Host clock statistics.
    #[must_use]
    pub const fn clock_stats(&self) -> &ClockStats {
        self.clock.stats()
    }

    // =========================================================================
    // SESSION LIFECYCLE
    // =========================================================================

    /// Starts hosting on `port`.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] on a live session,
    /// [`SessionError::TransportBind`] if the port cannot be bound.
    pub fn host(&mut self, port: u16) -> SessionResult<()> {
        if self.role.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.transport
            .bind_and_listen(port)
            .map_err(SessionError::TransportBind)?;

        self.reset_session();
        self.role = Some(SessionRole::Host);
        self.phase = SessionPhase::Lobby;
        self.local_id = PeerId::HOST;
        self.registry.insert(Peer::host(self.now));
        tracing::info!("Hosting session on port {}", port);
        Ok(())
    }

    /// Starts joining the host at `address:port`.
    ///
    /// The outcome arrives as [`SessionEvent::HandshakeAccepted`],
    /// [`SessionEvent::HandshakeRejected`] or
    /// [`SessionEvent::ConnectionFailed`].
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] on a live session,
    /// [`SessionError::TransportConnect`] if the attempt cannot start.
    pub fn connect(&mut self, address: &str, port: u16) -> SessionResult<()> {
        if self.role.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.transport
            .connect(address, port)
            .map_err(SessionError::TransportConnect)?;

        self.reset_session();
        self.role = Some(SessionRole::Client);
        self.phase = SessionPhase::Handshaking;
        self.handshake_started = Some(self.now);
        self.last_rejection = None;
        tracing::info!("Connecting to {}:{}", address, port);
        Ok(())
    }

    /// Leaves the session. Safe to call at any time, any number of times.
    pub fn disconnect(&mut self) {
        let was_active = self.role.is_some();
        self.transport.disconnect();
        self.reset_session();
        if was_active {
            tracing::info!("Session closed");
            self.push_event(SessionEvent::SessionEnded);
        }
    }

    /// Ends the session from inside the protocol handlers.
    fn end_session(&mut self) {
        self.transport.disconnect();
        self.reset_session();
        self.push_event(SessionEvent::SessionEnded);
    }

    fn reset_session(&mut self) {
        self.role = None;
        self.phase = SessionPhase::Idle;
        self.local_id = PeerId::LOCAL;
        self.registry.clear();
        self.ticks.reset(self.config.initial_speed);
        self.clock.reset();
        self.desync = DesyncDetector::new(
            self.config.checksum_interval,
            self.config.checksum_window_ticks,
            self.config.max_pending_checksums,
        );
        self.commands.clear();
        self.next_sequence = 0;
        self.last_tick_sync = 0;
        self.handshakes.clear();
        self.handshake_started = None;
        self.lobby = LobbyUpdate::default();
        self.transfer.reset();
        self.last_heartbeat = self.now;
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Schedules a command batch for `tick` on every peer.
    ///
    /// Ticks that already ran locally, or that the host is known to have
    /// passed, are moved to the next open tick. Without an established
    /// session the batch is dropped and logged.
    ///
    /// # Errors
    ///
    /// Fails if the batch cannot be encoded.
    pub fn submit_command_batch(&mut self, data: &[u8], tick: Tick) -> SessionResult<()> {
        if !self.is_connected() {
            tracing::debug!("Dropping command batch: not connected");
            return Ok(());
        }
        if data.len() > MAX_COMMAND_DATA {
            return Err(ProtocolError::PayloadTooLarge(data.len()).into());
        }

        let open_tick = self.ticks.current_tick().max(self.ticks.host_tick()) + 1;
        let apply_tick = tick.max(open_tick);
        if apply_tick != tick {
            tracing::debug!("Moving command batch from tick {} to {}", tick, apply_tick);
        }

        let batch = CommandBatch {
            origin: self.local_id,
            sequence: self.next_sequence,
            data: data.to_vec(),
        };
        let message = Message::CommandBatch(batch.clone());
        let mode = message.message_type().delivery_mode();
        let bytes = Envelope::at(apply_tick, message)?.encode()?;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        match self.role {
            Some(SessionRole::Host) => self.broadcast_bytes(&bytes, mode, None),
            Some(SessionRole::Client) => self.transport.send(PeerId::HOST, &bytes, mode),
            None => {}
        }
        self.commands.push(apply_tick, batch);
        Ok(())
    }

    // =========================================================================
    // DRIVING
    // =========================================================================

    /// Drains and dispatches every buffered transport event. Never blocks.
    pub fn poll<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        while let Some(event) = self.transport.poll_event() {
            let Some(role) = self.role else {
                continue;
            };
            match (role, event) {
                (SessionRole::Host, TransportEvent::Connected(peer)) => self.host_link_up(peer),
                (SessionRole::Host, TransportEvent::Disconnected(peer)) => self.host_link_down(peer),
                (SessionRole::Client, TransportEvent::Connected(peer)) => self.client_link_up(peer),
                (SessionRole::Client, TransportEvent::Disconnected(peer)) => {
                    self.client_link_down(peer);
                }
                (role, TransportEvent::Data { peer, bytes }) => match Envelope::decode(&bytes) {
                    Ok(envelope) => match role {
                        SessionRole::Host => self.host_message(peer, envelope, sim),
                        SessionRole::Client => self.client_message(peer, envelope, sim),
                    },
                    Err(error) => {
                        tracing::warn!("Dropping malformed message from {}: {}", peer, error);
                    }
                },
            }
        }
    }

    /// Per-frame driver: poll, liveness, then every tick that is due.
    ///
    /// The host runs ticks at the effective speed on a clock fed by
    /// `elapsed`. A client runs as many ticks as it needs to reach the last
    /// announced host tick, bounded per call. Returns the ticks executed.
    pub fn update<S: Simulation + ?Sized>(&mut self, sim: &mut S, elapsed: Duration) -> u32 {
        if self.role.is_none() {
            return 0;
        }
        self.now += elapsed;
        self.poll(sim);
        self.service_liveness();
        if self.phase != SessionPhase::Running {
            return 0;
        }

        let due = match self.role {
            Some(SessionRole::Host) => {
                let rate = self.config.ticks_per_second(self.ticks.running_speed());
                self.clock
                    .advance(elapsed, rate, self.config.max_ticks_per_update)
            }
            Some(SessionRole::Client) => self
                .ticks
                .catch_up_budget(self.config.max_catch_up_ticks),
            None => 0,
        };

        let mut executed = 0;
        while executed < due && self.step(sim) {
            executed += 1;
        }
        executed
    }

    /// Executes exactly one tick if allowed.
    ///
    /// The host may step while running and not paused. A client may step
    /// only while behind the last announced host tick. Returns true if a
    /// tick ran.
    pub fn step<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> bool {
        if !self.can_step() {
            return false;
        }

        let tick = self.ticks.current_tick() + 1;
        for batch in self.commands.take(tick) {
            sim.apply_command(&batch.data);
        }
        sim.advance_one_tick();
        self.ticks.advance();

        if self.desync.is_checksum_tick(tick) {
            let checksum = sim.compute_state_checksum();
            self.exchange_checksum(tick, checksum);
        }
        match self.role {
            Some(SessionRole::Host) => self.host_after_tick(tick),
            Some(SessionRole::Client) => self.client_after_tick(tick),
            None => {}
        }
        true
    }

    fn can_step(&self) -> bool {
        if self.phase != SessionPhase::Running {
            return false;
        }
        match self.role {
            Some(SessionRole::Host) => !self.ticks.is_paused(),
            Some(SessionRole::Client) => {
                self.local_state() == Some(PeerState::Connected)
                    && self.ticks.current_tick() < self.ticks.host_tick()
            }
            None => false,
        }
    }

    fn exchange_checksum(&mut self, tick: Tick, checksum: u32) {
        for outcome in self.desync.record_local(tick, checksum) {
            self.report_checksum(outcome);
        }

        let Ok(wire) = wire_tick(tick) else {
            tracing::warn!("Tick {} no longer fits the wire format, checksum not sent", tick);
            return;
        };
        let message = Message::ChecksumResponse(ChecksumReport {
            tick: wire,
            checksum,
        });
        match self.role {
            Some(SessionRole::Host) => self.broadcast_message(tick, message, None),
            Some(SessionRole::Client) => self.send_message(PeerId::HOST, tick, message),
            None => {}
        }
    }

    fn report_checksum(&mut self, outcome: ChecksumOutcome) {
        match outcome {
            ChecksumOutcome::Verified { peer, tick } => {
                tracing::trace!("Checksum verified with {} at tick {}", peer, tick);
                self.push_event(SessionEvent::ChecksumVerified { peer, tick });
            }
            ChecksumOutcome::Mismatch {
                peer,
                tick,
                local,
                remote,
            } => {
                tracing::warn!(
                    "Desync with {} at tick {}: local {:#010x}, remote {:#010x}",
                    peer,
                    tick,
                    local,
                    remote
                );
                self.push_event(SessionEvent::DesyncDetected {
                    peer,
                    tick,
                    local_checksum: local,
                    remote_checksum: remote,
                });
            }
        }
    }

    fn service_liveness(&mut self) {
        if self.now.saturating_sub(self.last_heartbeat) >= self.config.heartbeat_interval() {
            self.last_heartbeat = self.now;
            let tick = self.ticks.current_tick();
            match self.role {
                Some(SessionRole::Host) => self.broadcast_message(tick, Message::Heartbeat, None),
                Some(SessionRole::Client) if self.phase != SessionPhase::Handshaking => {
                    self.send_message(PeerId::HOST, tick, Message::Heartbeat);
                }
                _ => {}
            }
        }

        match self.role {
            Some(SessionRole::Host) => self.host_timeouts(),
            Some(SessionRole::Client) => self.client_timeouts(),
            None => {}
        }
    }

    // =========================================================================
    // SPEED AND LOBBY
    // =========================================================================

    /// Changes the requested speed. [`SpeedLevel::PAUSED`] pauses.
    ///
    /// A client forwards the request to the host.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidSpeed`] above [`SpeedLevel::MAX`],
    /// [`SessionError::NotConnected`] without a session.
    pub fn set_speed(&mut self, speed: SpeedLevel) -> SessionResult<()> {
        if !speed.is_valid() {
            return Err(SessionError::InvalidSpeed(speed));
        }
        match self.role {
            Some(SessionRole::Host) => self.apply_host_speed(speed),
            Some(SessionRole::Client) => self.request_from_host(Message::GameSpeedChange(speed)),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Pauses or resumes at the requested speed.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] without a session.
    pub fn set_paused(&mut self, paused: bool) -> SessionResult<()> {
        let speed = if paused {
            SpeedLevel::PAUSED
        } else {
            self.ticks.requested()
        };
        self.set_speed(speed)
    }

    /// Sets the local player's readiness.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] without a session.
    pub fn set_ready(&mut self, ready: bool) -> SessionResult<()> {
        match self.role {
            Some(SessionRole::Host) => {
                self.update_lobby_slot(PeerId::HOST, |peer| peer.is_ready = ready);
                Ok(())
            }
            Some(SessionRole::Client) => self.request_from_host(Message::PlayerReady(ready)),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Selects the local player's country.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] without a session.
    pub fn select_country(&mut self, country_id: u16) -> SessionResult<()> {
        match self.role {
            Some(SessionRole::Host) => {
                self.update_lobby_slot(PeerId::HOST, |peer| peer.country_id = country_id);
                Ok(())
            }
            Some(SessionRole::Client) => {
                self.request_from_host(Message::PlayerCountrySelected(country_id))
            }
            None => Err(SessionError::NotConnected),
        }
    }

    fn request_from_host(&mut self, message: Message) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let tick = self.ticks.current_tick();
        self.send_message(PeerId::HOST, tick, message);
        Ok(())
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Pops the oldest pending event.
    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Takes every pending event, oldest first.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= self.config.max_queued_events {
            tracing::warn!("Event queue full, dropping oldest event");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn push_speed_event(&mut self) {
        self.push_event(SessionEvent::SpeedChanged {
            requested: self.ticks.requested(),
            effective: self.ticks.effective(),
            paused: self.ticks.is_paused(),
        });
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn local_state(&self) -> Option<PeerState> {
        self.registry.get(self.local_id).map(|peer| peer.state)
    }

    fn encode(tick: Tick, message: Message) -> Option<Vec<u8>> {
        let message_type = message.message_type();
        match Envelope::at(tick, message).and_then(|envelope| envelope.encode()) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::warn!("Failed to encode {:?}: {}", message_type, error);
                None
            }
        }
    }

    fn send_message(&mut self, peer: PeerId, tick: Tick, message: Message) {
        let mode = message.message_type().delivery_mode();
        if let Some(bytes) = Self::encode(tick, message) {
            self.transport.send(peer, &bytes, mode);
        }
    }

    fn broadcast_message(&mut self, tick: Tick, message: Message, exclude: Option<PeerId>) {
        let mode = message.message_type().delivery_mode();
        if let Some(bytes) = Self::encode(tick, message) {
            self.broadcast_bytes(&bytes, mode, exclude);
        }
    }

    /// Sends to every session member. Links still handshaking are skipped.
    fn broadcast_bytes(
        &mut self,
        bytes: &[u8],
        mode: crate::transport::DeliveryMode,
        exclude: Option<PeerId>,
    ) {
        if self.handshakes.is_empty() {
            self.transport.broadcast(bytes, mode, exclude);
            return;
        }
        for peer in self.registry.member_clients() {
            if Some(peer) != exclude {
                self.transport.send(peer, bytes, mode);
            }
        }
    }
}

impl<T: Transport> Drop for Coordinator<T> {
    fn drop(&mut self) {
        if self.role.is_some() {
            self.transport.disconnect();
        }
    }
}

impl<T: Transport> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("local_id", &self.local_id)
            .field("peers", &self.registry.len())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}
