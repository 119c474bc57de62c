//! Host side of the protocol: handshakes, command routing, progress
//! tracking, speed control and full-state transfers.

use meridian_shared::{PeerId, SpeedLevel, Tick, GAME_VERSION, PROTOCOL_VERSION};

use super::{
    split_state, Coordinator, DisconnectReason, DropReason, Peer, PeerRole, PeerState,
    SessionEvent, SessionPhase, SessionRole,
};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{
    wire_tick, ChecksumReport, CommandBatch, Envelope, Handshake, HandshakeResponse, LobbyState,
    LobbyUpdate, Message, RejectReason, TickAck,
};
use crate::simulation::Simulation;
use crate::transport::Transport;

impl<T: Transport> Coordinator<T> {
    /// Starts the simulation clock for every member.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotHost`] on a client, [`SessionError::WrongPhase`]
    /// outside the lobby, [`SessionError::PlayersNotReady`] if the readiness
    /// gate is enabled and a client is not ready.
    pub fn start_game(&mut self) -> SessionResult<()> {
        if self.role != Some(SessionRole::Host) {
            return Err(SessionError::NotHost);
        }
        if self.phase != SessionPhase::Lobby {
            return Err(SessionError::WrongPhase(self.phase));
        }
        if self.config.require_all_ready {
            let waiting = self.registry.not_ready();
            if !waiting.is_empty() {
                return Err(SessionError::PlayersNotReady(waiting));
            }
        }

        self.phase = SessionPhase::Running;
        self.clock.reset();
        let tick = self.ticks.current_tick();
        let speed = self.ticks.requested();
        tracing::info!(
            "Game started at tick {} with {} players at speed {}",
            tick,
            self.registry.len(),
            speed.0
        );

        self.broadcast_message(tick, Message::GameStart(speed), None);
        self.broadcast_tick_sync();
        self.broadcast_lobby();
        self.push_event(SessionEvent::GameStarted { tick, speed });
        Ok(())
    }

    /// Re-sends the full simulation state to `peer`.
    ///
    /// The peer is `Synchronizing` until it acknowledges the state tick.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotHost`] on a client, [`SessionError::WrongPhase`]
    /// before the game started, [`SessionError::UnknownPeer`] if `peer` is
    /// not a member client, or a protocol error if the state is too large.
    pub fn resync_peer<S: Simulation + ?Sized>(&mut self, peer: PeerId, sim: &S) -> SessionResult<()> {
        if self.role != Some(SessionRole::Host) {
            return Err(SessionError::NotHost);
        }
        if self.phase != SessionPhase::Running {
            return Err(SessionError::WrongPhase(self.phase));
        }
        let is_member_client = self
            .registry
            .get(peer)
            .is_some_and(|record| record.role == PeerRole::Client && record.state.is_member());
        if !is_member_client {
            return Err(SessionError::UnknownPeer(peer));
        }
        self.begin_state_transfer(peer, sim)
    }

    pub(super) fn host_lobby(&self) -> LobbyUpdate {
        LobbyUpdate {
            state: if self.phase == SessionPhase::Running {
                LobbyState::InGame
            } else {
                LobbyState::Waiting
            },
            slots: self.registry.lobby_slots(),
        }
    }

    pub(super) fn host_link_up(&mut self, peer: PeerId) {
        tracing::debug!("Link up from {}, awaiting handshake", peer);
        self.handshakes.insert(peer, self.now);
    }

    pub(super) fn host_link_down(&mut self, peer: PeerId) {
        if self.handshakes.remove(&peer).is_some() {
            tracing::debug!("{} left before completing the handshake", peer);
            return;
        }
        self.drop_client(peer, DisconnectReason::LinkLost);
    }

    pub(super) fn host_message<S: Simulation + ?Sized>(
        &mut self,
        from: PeerId,
        envelope: Envelope,
        sim: &mut S,
    ) {
        if self.handshakes.contains_key(&from) {
            match envelope.message {
                Message::Handshake(handshake) => self.handle_handshake(from, handshake, sim),
                other => tracing::warn!(
                    "Dropping {:?} from {} before handshake",
                    other.message_type(),
                    from
                ),
            }
            return;
        }

        let Some(peer) = self.registry.get_mut(from) else {
            tracing::warn!("Dropping message from unknown {}", from);
            return;
        };
        peer.last_seen = self.now;

        let tick = Tick::from(envelope.target_tick);
        match envelope.message {
            Message::CommandBatch(batch) => self.handle_client_batch(from, tick, batch, sim),
            Message::ChecksumResponse(report) => self.handle_client_checksum(from, report),
            Message::TickAck(ack) => self.handle_ack(from, ack, sim),
            Message::Heartbeat => {
                if let Some(peer) = self.registry.get_mut(from) {
                    peer.last_heartbeat_tick = tick;
                }
            }
            Message::PlayerReady(ready) => self.update_lobby_slot(from, |peer| peer.is_ready = ready),
            Message::PlayerCountrySelected(country) => {
                self.update_lobby_slot(from, |peer| peer.country_id = country);
            }
            Message::GameSpeedChange(speed) => self.handle_speed_request(from, speed),
            Message::Handshake(_) => tracing::warn!("Ignoring repeated handshake from {}", from),
            other => tracing::warn!(
                "Unexpected {:?} from client {}",
                other.message_type(),
                from
            ),
        }
    }

    fn handle_handshake<S: Simulation + ?Sized>(&mut self, from: PeerId, handshake: Handshake, sim: &S) {
        self.handshakes.remove(&from);
        let tick = self.ticks.current_tick();

        let reason = if handshake.protocol_version != PROTOCOL_VERSION {
            RejectReason::VersionMismatch
        } else if handshake.game_version != GAME_VERSION {
            RejectReason::GameVersionMismatch
        } else if self.registry.len() >= self.config.max_players {
            RejectReason::SessionFull
        } else if self.phase == SessionPhase::Running && !self.config.allow_late_join {
            RejectReason::GameInProgress
        } else {
            RejectReason::None
        };

        if reason != RejectReason::None {
            tracing::warn!(
                "Rejecting handshake from {}: {:?} (protocol {}, game {})",
                from,
                reason,
                handshake.protocol_version,
                handshake.game_version
            );
            self.send_message(from, tick, Message::HandshakeResponse(HandshakeResponse::reject(reason)));
            self.transport.disconnect_peer(from);
            self.push_event(SessionEvent::PeerRejected { peer: from, reason });
            return;
        }

        let Ok(wire) = wire_tick(tick) else {
            tracing::warn!("Cannot admit {} at tick {}: tick exceeds wire range", from, tick);
            self.transport.disconnect_peer(from);
            return;
        };
        if !self.registry.insert(Peer::client(from, self.now)) {
            tracing::warn!("{} is already registered, ignoring handshake", from);
            return;
        }
        if let Some(peer) = self.registry.get_mut(from) {
            peer.transition(PeerState::Connected);
        }

        self.send_message(from, tick, Message::HandshakeResponse(HandshakeResponse::accept(from, wire)));
        tracing::info!("{} joined ({} players)", from, self.registry.len());
        self.push_event(SessionEvent::PeerConnected(from));

        if self.phase == SessionPhase::Running {
            if let Err(error) = self.begin_state_transfer(from, sim) {
                tracing::warn!("State transfer to {} failed: {}", from, error);
            }
        }
        self.broadcast_lobby();
    }

    fn handle_client_batch<S: Simulation + ?Sized>(
        &mut self,
        from: PeerId,
        tick: Tick,
        batch: CommandBatch,
        sim: &S,
    ) {
        let state = self.registry.get(from).map(|peer| peer.state);
        let rejection = if state != Some(PeerState::Connected) {
            Some(DropReason::NotSynchronized)
        } else if batch.origin != from {
            Some(DropReason::Unauthorized)
        } else {
            None
        };

        if let Some(reason) = rejection {
            tracing::warn!(
                "Dropping command batch from {} (origin {}) for tick {} at host tick {}: {:?}",
                from,
                batch.origin,
                tick,
                self.ticks.current_tick(),
                reason
            );
            self.push_event(SessionEvent::CommandBatchDropped {
                peer: from,
                tick,
                reason,
            });
            return;
        }

        if tick <= self.ticks.current_tick() {
            self.reschedule_late_batch(from, tick, batch, sim);
            return;
        }
        if !self.commands.push(tick, batch.clone()) {
            tracing::debug!("Duplicate command batch {} from {}", batch.sequence, from);
            return;
        }
        self.broadcast_message(tick, Message::CommandBatch(batch), Some(from));
    }

    /// Moves a batch whose tick already ran here to the next tick.
    ///
    /// If no `TickSync` has announced `tick` yet, the sender cannot have run
    /// it either, and the moved batch reaches it ahead of any announcement
    /// that would let it. Otherwise the sender may already have applied the
    /// batch at the old tick, so it gets the full state with the moved batch
    /// replayed on top.
    fn reschedule_late_batch<S: Simulation + ?Sized>(
        &mut self,
        from: PeerId,
        tick: Tick,
        batch: CommandBatch,
        sim: &S,
    ) {
        if self.commands.contains(batch.origin, batch.sequence) {
            tracing::debug!("Duplicate command batch {} from {}", batch.sequence, from);
            return;
        }
        let current = self.ticks.current_tick();
        let moved = current + 1;
        tracing::warn!(
            "Command batch {} from {} for tick {} arrived at host tick {}, moving it to {}",
            batch.sequence,
            from,
            tick,
            current,
            moved
        );

        self.commands.push(moved, batch.clone());
        self.broadcast_message(moved, Message::CommandBatch(batch.clone()), Some(from));
        self.push_event(SessionEvent::CommandBatchMoved {
            peer: from,
            from_tick: tick,
            to_tick: moved,
        });

        if tick > self.last_tick_sync {
            self.send_message(from, moved, Message::CommandBatch(batch));
            return;
        }
        if let Err(error) = self.begin_state_transfer(from, sim) {
            tracing::warn!("State transfer to {} failed: {}", from, error);
        }
    }

    fn handle_client_checksum(&mut self, from: PeerId, report: ChecksumReport) {
        let tick = Tick::from(report.tick);
        self.registry.record_checksum(from, tick, report.checksum);

        let connected = self
            .registry
            .get(from)
            .is_some_and(|peer| peer.state == PeerState::Connected);
        if !connected {
            tracing::debug!("Ignoring checksum from unsynchronized {}", from);
            return;
        }
        if let Some(outcome) = self.desync.receive_remote(from, tick, report.checksum) {
            self.report_checksum(outcome);
        }
    }

    fn handle_ack<S: Simulation + ?Sized>(&mut self, from: PeerId, ack: TickAck, sim: &S) {
        if !self
            .registry
            .record_ack(from, ack.acknowledged_tick, ack.ticks_behind)
        {
            tracing::debug!("Ignoring stale ack {} from {}", ack.acknowledged_tick, from);
            return;
        }
        let Some(peer) = self.registry.get_mut(from) else {
            return;
        };

        if peer.sync_complete() {
            peer.transition(PeerState::Connected);
            tracing::info!("{} synchronized at tick {}", from, ack.acknowledged_tick);
            self.desync.clear_peer(from);
            self.push_event(SessionEvent::PeerSynchronized(from));
            return;
        }

        let lagging = peer.state == PeerState::Connected
            && ack.ticks_behind > self.config.resync_threshold_ticks;
        if lagging {
            tracing::warn!(
                "{} is {} ticks behind, re-sending full state",
                from,
                ack.ticks_behind
            );
            if let Err(error) = self.begin_state_transfer(from, sim) {
                tracing::warn!("State transfer to {} failed: {}", from, error);
            }
        }
    }

    fn handle_speed_request(&mut self, from: PeerId, speed: SpeedLevel) {
        if !self.config.accept_speed_requests {
            tracing::warn!("Ignoring speed request {} from {}", speed.0, from);
            return;
        }
        tracing::debug!("{} requested speed {}", from, speed.0);
        if let Err(error) = self.apply_host_speed(speed) {
            tracing::warn!("Rejected speed request from {}: {}", from, error);
        }
    }

    pub(super) fn apply_host_speed(&mut self, speed: SpeedLevel) -> SessionResult<()> {
        if !speed.is_valid() {
            return Err(SessionError::InvalidSpeed(speed));
        }
        if speed.is_paused() {
            self.ticks.set_paused(true);
        } else {
            self.ticks.set_paused(false);
            let lag = self.registry.max_ticks_behind();
            self.ticks.set_requested(speed, lag);
        }
        tracing::info!(
            "Game speed {} (effective {}, paused {})",
            self.ticks.requested().0,
            self.ticks.effective().0,
            self.ticks.is_paused()
        );

        let tick = self.ticks.current_tick();
        self.broadcast_message(tick, Message::GameSpeedChange(self.ticks.announced_request()), None);
        if self.phase == SessionPhase::Running {
            self.broadcast_tick_sync();
        }
        self.push_speed_event();
        Ok(())
    }

    pub(super) fn update_lobby_slot(&mut self, peer: PeerId, apply: impl FnOnce(&mut Peer)) {
        let Some(record) = self.registry.get_mut(peer) else {
            return;
        };
        apply(record);
        self.broadcast_lobby();
    }

    pub(super) fn host_after_tick(&mut self, tick: Tick) {
        if tick % self.config.speed_recompute_interval == 0 {
            let lag = self.registry.max_ticks_behind();
            if self.ticks.recompute(lag) {
                tracing::info!(
                    "Effective speed {} (requested {}, max lag {} ticks)",
                    self.ticks.effective().0,
                    self.ticks.requested().0,
                    lag
                );
                self.push_speed_event();
            }
        }
        if tick % self.config.tick_sync_interval == 0 {
            self.broadcast_tick_sync();
        }
    }

    pub(super) fn host_timeouts(&mut self) {
        let now = self.now;
        let handshake_timeout = self.config.handshake_timeout();
        let expired: Vec<PeerId> = self
            .handshakes
            .iter()
            .filter(|&(_, &since)| now.saturating_sub(since) > handshake_timeout)
            .map(|(&peer, _)| peer)
            .collect();
        for peer in expired {
            tracing::warn!("Handshake from {} timed out", peer);
            self.handshakes.remove(&peer);
            self.transport.disconnect_peer(peer);
        }

        let peer_timeout = self.config.peer_timeout();
        let silent: Vec<PeerId> = self
            .registry
            .clients()
            .filter(|peer| peer.is_timed_out(now, peer_timeout))
            .map(|peer| peer.id)
            .collect();
        for peer in silent {
            tracing::warn!("{} timed out", peer);
            self.transport.disconnect_peer(peer);
            self.drop_client(peer, DisconnectReason::Timeout);
        }
    }

    fn drop_client(&mut self, peer: PeerId, reason: DisconnectReason) {
        if self.registry.remove(peer).is_none() {
            return;
        }
        tracing::info!("{} left the session ({:?})", peer, reason);
        self.desync.clear_peer(peer);
        self.push_event(SessionEvent::PeerDisconnected { peer, reason });

        let lag = self.registry.max_ticks_behind();
        if self.ticks.recompute(lag) {
            tracing::info!("Effective speed {} after {} left", self.ticks.effective().0, peer);
            self.push_speed_event();
            if self.phase == SessionPhase::Running {
                self.broadcast_tick_sync();
            }
        }
        self.broadcast_lobby();
    }

    fn begin_state_transfer<S: Simulation + ?Sized>(&mut self, peer: PeerId, sim: &S) -> SessionResult<()> {
        let tick = self.ticks.current_tick();
        wire_tick(tick)?;
        let state = sim.serialize_full_state();
        let chunks = split_state(&state, self.config.state_chunk_size, self.config.compress_state)?;

        let started = self
            .registry
            .get_mut(peer)
            .is_some_and(|record| record.begin_sync(tick));
        if !started {
            return Err(SessionError::UnknownPeer(peer));
        }

        tracing::info!(
            "Sending {} bytes of state in {} chunks to {} at tick {}",
            state.len(),
            chunks.len(),
            peer,
            tick
        );
        for chunk in chunks {
            self.send_message(peer, tick, Message::StateSync(chunk));
        }

        let replay: Vec<(Tick, CommandBatch)> = self
            .commands
            .pending_after(tick)
            .map(|(at, batch)| (at, batch.clone()))
            .collect();
        for (at, batch) in replay {
            self.send_message(peer, at, Message::CommandBatch(batch));
        }

        self.send_message(peer, tick, Message::GameSpeedChange(self.ticks.announced_request()));
        self.send_message(peer, tick, Message::TickSync(self.ticks.tick_sync()));
        self.last_tick_sync = self.last_tick_sync.max(tick);
        self.push_event(SessionEvent::PeerResyncStarted { peer, tick });
        Ok(())
    }

    fn broadcast_tick_sync(&mut self) {
        let sync = self.ticks.tick_sync();
        self.last_tick_sync = self.last_tick_sync.max(sync.current_tick);
        self.broadcast_message(sync.current_tick, Message::TickSync(sync), None);
    }

    fn broadcast_lobby(&mut self) {
        let lobby = self.host_lobby();
        let tick = self.ticks.current_tick();
        self.broadcast_message(tick, Message::LobbyUpdate(lobby.clone()), None);
        self.push_event(SessionEvent::LobbyUpdated(lobby));
    }
}
