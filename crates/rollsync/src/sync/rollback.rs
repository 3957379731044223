//! Fixed-tick step: rollback, buffer upkeep, input exchange and simulation.

use rollsync_proto::{
    decode_packet,
    messages::{input::InputTicks, session::StateLog},
};
use tracing::{debug, info, trace, warn};

use super::{SyncManager, SyncState};
use crate::{
    PeerId, Tick,
    error::SyncError,
    event::SyncEvent,
    input::PeerInput,
    input_buffer::PlayerInput,
    object::Prediction,
    state_buffer::StateFrame,
    transport::NetworkAdaptor,
};

impl<A: NetworkAdaptor> SyncManager<A> {
    /// Run one fixed simulation step.
    ///
    /// Fatal errors stop synchronization (after emitting
    /// [`SyncEvent::SyncError`]) and are returned as well.
    pub fn physics_tick(&mut self, delta: f32) -> Result<(), SyncError> {
        self.poll()?;
        if !self.state.is_started() {
            return Ok(());
        }
        if let Err(err) = self.step(delta) {
            return Err(if err.is_fatal() { self.fail(err) } else { err });
        }
        Ok(())
    }

    fn step(&mut self, delta: f32) -> Result<(), SyncError> {
        if self.current_tick == 0 && self.state_buffer.is_empty() {
            self.save_current_state();
        }

        let debug_rollback = self.config.debug_rollback_ticks;
        if debug_rollback > 0 && self.current_tick > debug_rollback + 1 {
            self.rollback_ticks = self.rollback_ticks.max(debug_rollback);
        }
        if self.config.interpolation && self.current_tick > 0 {
            self.rollback_ticks = self.rollback_ticks.max(1);
        }
        if self.rollback_ticks > 0 {
            self.execute_rollback(delta)?;
        }

        if self.is_host() && !self.remote_state_log.is_empty() {
            self.process_logged_remote_state();
        }

        self.record_advantage();

        if self.input_buffer_underruns < 0 {
            self.input_buffer_underruns += 1;
            if self.input_buffer_underruns == 0 {
                info!(tick = self.current_tick, "synchronization regained");
                self.events.emit(SyncEvent::SyncRegained);
                self.skip_ticks = 0;
            } else {
                self.send_input_messages_to_all_peers();
                return Ok(());
            }
        } else if !self.cleanup_buffers() {
            if self.input_buffer_underruns == 0 {
                info!(tick = self.current_tick, "synchronization lost");
                self.state = SyncState::SyncLost;
                self.events.emit(SyncEvent::SyncLost);
            }
            self.input_buffer_underruns += 1;
            if self.input_buffer_underruns >= self.config.max_input_buffer_underruns {
                return Err(SyncError::PersistentDesync {
                    underruns: self.input_buffer_underruns,
                });
            }
            self.send_input_messages_to_all_peers();
            return Ok(());
        } else if self.input_buffer_underruns > 0 {
            self.state = SyncState::Running;
            self.input_buffer_underruns = -self.config.skip_ticks_after_sync_regained;
            if self.input_buffer_underruns == 0 {
                info!(tick = self.current_tick, "synchronization regained");
                self.events.emit(SyncEvent::SyncRegained);
                self.skip_ticks = 0;
            }
        }

        if self.skip_ticks > 0 {
            self.skip_ticks -= 1;
            if self.skip_ticks == 0 {
                for peer in self.peers.values_mut() {
                    peer.clear_advantage();
                }
            } else {
                self.send_input_messages_to_all_peers();
                return Ok(());
            }
        }

        if self.calculate_skip_ticks() {
            return Ok(());
        }

        self.input_tick += 1;
        self.current_tick += 1;

        let local_input = self.objects.collect_local_input(self.local_id);
        let payload = local_input.to_bytes()?;
        self.input_buffer
            .get_or_create(self.input_tick)?
            .players
            .insert(self.local_id, PlayerInput::real(local_input));
        let queued = self.send_queue.push(payload);
        debug_assert_eq!(queued, self.input_tick, "input send queue misaligned");
        self.send_input_messages_to_all_peers();

        self.time_since_last_tick = 0.0;

        if self.current_tick > 0 {
            self.do_tick(delta, false)?;
            if self.config.interpolation {
                self.capture_interpolation_state();
            }
        }
        Ok(())
    }

    /// Restore the snapshot `rollback_ticks + 1` from the newest and replay
    /// forward to the current tick.
    fn execute_rollback(&mut self, delta: f32) -> Result<(), SyncError> {
        let rollback_ticks = self.rollback_ticks;
        let original_tick = self.current_tick;
        let depth = rollback_ticks as usize;
        let available = self.state_buffer.len();

        let Some(origin) = self.state_buffer.from_back(depth) else {
            self.rollback_ticks = 0;
            return Err(SyncError::InsufficientHistory {
                requested: rollback_ticks,
                tick: original_tick,
                available,
            });
        };
        let origin = origin.data.clone();
        self.objects.load_all(&origin);
        self.state_buffer.truncate(available - depth);
        self.current_tick -= rollback_ticks;
        debug!(rollback_ticks, from = original_tick, to = self.current_tick, "state loaded");
        self.events.emit(SyncEvent::StateLoaded { rollback_ticks });

        while self.rollback_ticks > 0 {
            self.current_tick += 1;
            self.do_tick(delta, true)?;
            self.rollback_ticks -= 1;
        }
        debug_assert_eq!(self.current_tick, original_tick, "rollback did not return to the original tick");
        Ok(())
    }

    /// Simulate `current_tick`, predicting input for every peer whose real
    /// input has not arrived.
    fn do_tick(&mut self, delta: f32, is_rollback: bool) -> Result<(), SyncError> {
        let tick = self.current_tick;
        for peer in self.peer_ids() {
            let needs_prediction = self
                .input_buffer
                .get(tick)
                .is_none_or(|f| f.is_player_input_predicted(peer));
            if !needs_prediction {
                continue;
            }

            let predicted = match self.input_buffer.get(tick - 1) {
                Some(previous) => {
                    let previous = previous.player_input(peer).cloned().unwrap_or_default();
                    let last_real = self
                        .peers
                        .get(&peer)
                        .map_or(0, |p| p.last_remote_tick_received);
                    let ctx = Prediction {
                        ticks_since_real_input: tick - last_real,
                        staleness_ticks: self.config.prediction_staleness_ticks,
                    };
                    self.objects.predict_input(peer, &previous, ctx)
                }
                None => PeerInput::new(),
            };
            self.input_buffer
                .get_or_create(tick)?
                .players
                .insert(peer, PlayerInput::predicted(predicted));
        }

        let frame = self.input_buffer.get(tick).ok_or(SyncError::BufferExhaustion {
            tick,
            start_tick: self.input_buffer.start_tick(),
        })?;
        self.objects.tick_all(delta, frame);
        self.save_current_state();

        self.events.emit(SyncEvent::TickFinished { is_rollback });
        Ok(())
    }

    fn save_current_state(&mut self) {
        let tick = self.current_tick;
        if tick < 0 {
            return;
        }
        let frame = StateFrame::new(tick, self.objects.save_all());

        // Only forward snapshots that no later correction can change, once.
        let resolved = self
            .peers
            .values()
            .all(|p| p.last_remote_tick_received >= tick);
        if self.config.log_state
            && !self.is_host()
            && tick > self.last_state_logged
            && resolved
        {
            let log = StateLog {
                tick,
                data: frame.data.clone(),
            };
            match self.send_control_to_host(&log) {
                Ok(()) => self.last_state_logged = tick,
                Err(err) => warn!(tick, error = %err, "failed to forward state log"),
            }
        }

        self.state_buffer.append(frame);
    }

    /// Keep the `(from, to)` states of the last tick for interpolation and
    /// put objects back at `from`.
    fn capture_interpolation_state(&mut self) {
        let (Some(to), Some(from)) = (self.state_buffer.from_back(0), self.state_buffer.from_back(1))
        else {
            return;
        };
        self.interpolation_state = to
            .data
            .iter()
            .filter_map(|(path, to_state)| {
                let from_state = from.data.get(path)?;
                Some((path.clone(), (from_state.clone(), to_state.clone())))
            })
            .collect();
        let from = from.data.clone();
        self.objects.load_all(&from);
    }

    fn process_logged_remote_state(&mut self) {
        let peers = self.peer_ids();
        let mismatches = self
            .remote_state_log
            .check(&self.input_buffer, &self.state_buffer, &peers);
        for mismatch in mismatches {
            warn!(tick = mismatch.tick, peer = mismatch.peer, "remote state mismatch");
            self.events.emit(SyncEvent::RemoteStateMismatch {
                tick: mismatch.tick,
                peer: mismatch.peer,
                local_state: mismatch.local,
                remote_state: mismatch.remote,
            });
        }
    }

    /// Update each peer's local lag and advantage history.
    fn record_advantage(&mut self) {
        let window = self.config.ticks_to_recalculate_advantage;
        for peer in self.peers.values_mut() {
            peer.local_lag = (self.input_tick + 1) - peer.last_remote_tick_received;
            peer.record_advantage(window);
        }
    }

    /// Schedule skip ticks when some peer lags at least two ticks behind us.
    fn calculate_skip_ticks(&mut self) -> bool {
        let max_advantage = self
            .peers
            .values()
            .map(|p| p.calculated_advantage)
            .fold(0.0_f32, f32::max);
        if max_advantage >= 2.0 && self.skip_ticks == 0 {
            self.skip_ticks = (max_advantage / 2.0) as Tick;
            debug!(skip_ticks = self.skip_ticks, max_advantage, "skip ticks flagged");
            self.events.emit(SyncEvent::SkipTickFlagged {
                skip_ticks: self.skip_ticks,
            });
            return true;
        }
        false
    }

    /// Oldest local tick any peer still needs. With no peers nothing is
    /// outstanding.
    fn minimum_next_tick_requested(&self) -> Tick {
        self.peers
            .values()
            .map(|p| p.next_local_tick_requested)
            .min()
            .unwrap_or(self.input_tick + 1)
    }

    /// Drop outbound input every peer has acknowledged.
    pub(super) fn retire_acknowledged_input(&mut self) {
        let floor = self.minimum_next_tick_requested();
        self.send_queue.retire_acknowledged(floor);
    }

    /// Retire acknowledged outbound input and history nobody can roll back
    /// to. `false` when state history is blocked on missing remote input.
    fn cleanup_buffers(&mut self) -> bool {
        self.retire_acknowledged_input();

        let peers = self.peer_ids();
        if let Err(blocked) =
            self.state_buffer
                .cleanup(self.config.max_buffer_size, &self.input_buffer, &peers)
        {
            warn!(
                state_tick = blocked.state_tick,
                input_tick = blocked.input_tick,
                missing = ?blocked.missing_peers,
                "state buffer cleanup blocked"
            );
            return false;
        }

        self.input_buffer
            .cleanup(self.current_tick, self.config.max_buffer_size, &peers);
        true
    }

    /// Apply an `InputTicks` message from `peer`.
    ///
    /// Ticks already received or already retired are ignored, which makes
    /// redelivery harmless. A real input that contradicts the one a past tick
    /// was simulated with flags a rollback to that tick.
    pub(super) fn receive_input_tick(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), SyncError> {
        if !self.state.is_started() {
            return Ok(());
        }
        if !self.peers.contains_key(&peer) {
            return Err(SyncError::UnknownPeer(peer));
        }

        let msg: InputTicks = decode_packet(bytes)?.decode()?;
        let ticks = msg.decode_ticks()?;
        let Some(&(first_tick, _)) = ticks.first() else {
            return Ok(());
        };
        if first_tick >= self.input_tick + self.config.max_buffer_size as Tick {
            return Err(SyncError::ProtocolViolation {
                peer,
                reason: format!("input for tick {first_tick} is too far in the future"),
            });
        }

        let last_received = self
            .peers
            .get(&peer)
            .map_or(0, |p| p.last_remote_tick_received);

        for (remote_tick, payload) in ticks {
            if remote_tick <= last_received || remote_tick < self.input_buffer.start_tick() {
                continue;
            }
            let remote_input = match PeerInput::from_bytes(&payload) {
                Ok(input) => input,
                Err(err) => {
                    return Err(SyncError::ProtocolViolation {
                        peer,
                        reason: format!("undecodable input for tick {remote_tick}: {err}"),
                    });
                }
            };

            let current_tick = self.current_tick;
            let rollback_ticks = self.rollback_ticks;
            let frame = self.input_buffer.get_or_create(remote_tick)?;
            if !frame.is_player_input_predicted(peer) {
                continue;
            }

            let tick_delta = current_tick - remote_tick;
            let previous = frame
                .players
                .insert(peer, PlayerInput::real(remote_input.clone()));
            if tick_delta >= 0 && rollback_ticks <= tick_delta {
                let local_input = previous.map(|p| p.input).unwrap_or_default();
                if !local_input.same_as(&remote_input) {
                    self.rollback_ticks = tick_delta + 1;
                    debug!(
                        tick = remote_tick,
                        peer,
                        local = %local_input.fingerprint(),
                        remote = %remote_input.fingerprint(),
                        "misprediction, rollback flagged"
                    );
                    self.events.emit(SyncEvent::RollbackFlagged {
                        tick: remote_tick,
                        peer,
                        local_input,
                        remote_input,
                    });
                }
            }
        }

        let start_tick = self.input_buffer.start_tick();
        let input_tick = self.input_tick;
        let Some(record) = self.peers.get_mut(&peer) else {
            return Err(SyncError::UnknownPeer(peer));
        };
        // Retired frames were complete, so the peer's input for them arrived.
        record.last_remote_tick_received = record.last_remote_tick_received.max(start_tick - 1);
        while self
            .input_buffer
            .get(record.last_remote_tick_received + 1)
            .is_some_and(|f| !f.is_player_input_predicted(peer))
        {
            record.last_remote_tick_received += 1;
        }
        trace!(peer, last_remote_tick_received = record.last_remote_tick_received, "input received");

        if msg.next_tick_requested > input_tick + 1 {
            return Err(SyncError::ProtocolViolation {
                peer,
                reason: format!(
                    "acknowledged tick {} that was never sent (newest is {input_tick})",
                    msg.next_tick_requested - 1
                ),
            });
        }
        record.next_local_tick_requested = record.next_local_tick_requested.max(msg.next_tick_requested);
        record.remote_lag = (record.last_remote_tick_received + 1) - record.next_local_tick_requested;
        self.retire_acknowledged_input();
        Ok(())
    }
}
