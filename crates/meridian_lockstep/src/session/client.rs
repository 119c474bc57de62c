//! Client side of the protocol: joining, mirroring the host's clock and
//! applying full-state transfers.

use meridian_shared::{PeerId, SpeedLevel, Tick, GAME_VERSION, PROTOCOL_VERSION};

use super::{Coordinator, DisconnectReason, Peer, PeerState, SessionEvent, SessionPhase};
use crate::protocol::{
    ChecksumReport, CommandBatch, Envelope, Handshake, HandshakeResponse, Message, StateChunk,
    TickAck,
};
use crate::simulation::Simulation;
use crate::transport::Transport;

impl<T: Transport> Coordinator<T> {
    pub(super) fn client_link_up(&mut self, peer: PeerId) {
        if !peer.is_host() || self.phase != SessionPhase::Handshaking {
            tracing::debug!("Ignoring link up from {}", peer);
            return;
        }
        tracing::debug!("Link to host up, sending handshake");
        self.send_message(
            PeerId::HOST,
            0,
            Message::Handshake(Handshake {
                protocol_version: PROTOCOL_VERSION,
                game_version: GAME_VERSION,
            }),
        );
    }

    pub(super) fn client_link_down(&mut self, peer: PeerId) {
        if !peer.is_host() {
            return;
        }
        if self.phase == SessionPhase::Handshaking {
            tracing::warn!("Could not reach host");
            self.push_event(SessionEvent::ConnectionFailed);
        } else {
            tracing::warn!("Lost connection to host");
            self.push_event(SessionEvent::PeerDisconnected {
                peer: PeerId::HOST,
                reason: DisconnectReason::LinkLost,
            });
        }
        self.end_session();
    }

    pub(super) fn client_message<S: Simulation + ?Sized>(
        &mut self,
        from: PeerId,
        envelope: Envelope,
        sim: &mut S,
    ) {
        if !from.is_host() {
            tracing::warn!("Dropping message from non-host {}", from);
            return;
        }
        if let Some(host) = self.registry.get_mut(PeerId::HOST) {
            host.last_seen = self.now;
        }

        let tick = Tick::from(envelope.target_tick);
        if self.phase == SessionPhase::Handshaking {
            match envelope.message {
                Message::HandshakeResponse(response) => self.handle_handshake_response(response),
                other => tracing::debug!("Ignoring {:?} before handshake", other.message_type()),
            }
            return;
        }

        match envelope.message {
            Message::CommandBatch(batch) => self.handle_host_batch(tick, batch),
            Message::StateSync(chunk) => self.handle_state_chunk(tick, chunk, sim),
            Message::ChecksumResponse(report) => self.handle_host_checksum(report),
            Message::TickSync(sync) => {
                if self.ticks.apply_tick_sync(&sync) {
                    self.push_speed_event();
                }
            }
            Message::GameSpeedChange(speed) => {
                self.ticks.mirror_request(speed);
                self.push_speed_event();
            }
            Message::Heartbeat => {
                if let Some(host) = self.registry.get_mut(PeerId::HOST) {
                    host.last_heartbeat_tick = tick;
                }
            }
            Message::LobbyUpdate(lobby) => {
                self.lobby = lobby.clone();
                self.push_event(SessionEvent::LobbyUpdated(lobby));
            }
            Message::GameStart(speed) => self.handle_game_start(tick, speed),
            Message::HandshakeResponse(_) => tracing::warn!("Ignoring repeated handshake response"),
            other => tracing::warn!("Unexpected {:?} from host", other.message_type()),
        }
    }

    fn handle_handshake_response(&mut self, response: HandshakeResponse) {
        if !response.accepted {
            tracing::warn!("Host rejected handshake: {:?}", response.reject_reason);
            self.last_rejection = Some(response.reject_reason);
            self.push_event(SessionEvent::HandshakeRejected(response.reject_reason));
            self.end_session();
            return;
        }

        let local_id = response.assigned_peer_id;
        self.local_id = local_id;
        self.phase = SessionPhase::Lobby;
        self.handshake_started = None;

        self.registry.insert(Peer::host(self.now));
        let mut local = Peer::client(local_id, self.now);
        local.transition(PeerState::Connected);
        self.registry.insert(local);

        let host_tick = Tick::from(response.current_tick);
        tracing::info!("Joined session as {} at host tick {}", local_id, host_tick);
        self.push_event(SessionEvent::HandshakeAccepted { local_id, host_tick });
    }

    fn handle_host_batch(&mut self, tick: Tick, batch: CommandBatch) {
        if tick <= self.ticks.current_tick() {
            if self.local_state() == Some(PeerState::Synchronizing) {
                tracing::debug!("Skipping batch for tick {} covered by incoming state", tick);
            } else {
                tracing::warn!(
                    "Command batch for tick {} arrived at tick {}",
                    tick,
                    self.ticks.current_tick()
                );
            }
            return;
        }
        if batch.origin == self.local_id {
            // The host moved our batch; it must only run at the new tick.
            if let Some(old) = self.commands.remove(batch.origin, batch.sequence) {
                tracing::info!("Host moved command batch {} from tick {} to {}", batch.sequence, old, tick);
            }
        }
        self.commands.push(tick, batch);
    }

    fn handle_state_chunk<S: Simulation + ?Sized>(&mut self, tick: Tick, chunk: StateChunk, sim: &mut S) {
        let local_id = self.local_id;
        if let Some(local) = self.registry.get_mut(local_id) {
            local.begin_sync(tick);
        }

        let state = match self.transfer.accept(tick, chunk) {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!("Discarding state transfer for tick {}: {}", tick, error);
                self.push_event(SessionEvent::StateSyncFailed { tick });
                return;
            }
        };

        if let Err(error) = sim.deserialize_and_apply_full_state(&state) {
            tracing::warn!("Simulation rejected state for tick {}: {}", tick, error);
            self.push_event(SessionEvent::StateSyncFailed { tick });
            return;
        }

        // Everything the host accepted after `tick` is replayed right behind
        // the state; anything else queued here never reached the host.
        self.ticks.reset_to(tick);
        let stale = self.commands.len();
        self.commands.clear();
        self.desync.reset(tick);
        if let Some(local) = self.registry.get_mut(local_id) {
            local.transition(PeerState::Connected);
        }
        self.phase = SessionPhase::Running;

        tracing::info!(
            "Applied {} bytes of state at tick {} ({} queued batches dropped)",
            state.len(),
            tick,
            stale
        );
        self.push_event(SessionEvent::StateSynchronized { tick });
        self.send_ack();
    }

    fn handle_host_checksum(&mut self, report: ChecksumReport) {
        let tick = Tick::from(report.tick);
        self.registry.record_checksum(PeerId::HOST, tick, report.checksum);
        if self.local_state() != Some(PeerState::Connected) {
            return;
        }
        if let Some(outcome) = self.desync.receive_remote(PeerId::LOCAL, tick, report.checksum) {
            self.report_checksum(outcome);
        }
    }

    fn handle_game_start(&mut self, tick: Tick, speed: SpeedLevel) {
        if self.phase != SessionPhase::Lobby {
            tracing::debug!("Ignoring game start in phase {:?}", self.phase);
            return;
        }
        self.phase = SessionPhase::Running;
        self.ticks.mirror_request(speed);
        tracing::info!("Game started at tick {} with speed {}", tick, speed.0);
        self.push_event(SessionEvent::GameStarted { tick, speed });
    }

    pub(super) fn client_after_tick(&mut self, tick: Tick) {
        if tick % self.config.ack_interval == 0 {
            self.send_ack();
        }
    }

    pub(super) fn client_timeouts(&mut self) {
        let now = self.now;
        if self.phase == SessionPhase::Handshaking {
            let expired = self
                .handshake_started
                .is_some_and(|since| now.saturating_sub(since) > self.config.handshake_timeout());
            if expired {
                tracing::warn!("Handshake timed out");
                self.push_event(SessionEvent::ConnectionFailed);
                self.end_session();
            }
            return;
        }

        let silent = self
            .registry
            .get(PeerId::HOST)
            .is_some_and(|host| host.is_timed_out(now, self.config.peer_timeout()));
        if silent {
            tracing::warn!("Host timed out");
            self.push_event(SessionEvent::PeerDisconnected {
                peer: PeerId::HOST,
                reason: DisconnectReason::Timeout,
            });
            self.end_session();
        }
    }

    fn send_ack(&mut self) {
        let tick = self.ticks.current_tick();
        let ack = TickAck {
            acknowledged_tick: tick,
            ticks_behind: self.ticks.ticks_behind(),
        };
        self.send_message(PeerId::HOST, tick, Message::TickAck(ack));
    }
}
