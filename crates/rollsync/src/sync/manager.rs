use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use rollsync_proto::{
    Message, MsgId, decode_packet, encode_message,
    messages::{
        session::{StartSync, StateLog, StopSync},
        sync::{Ping, Pong},
    },
};
use tracing::{debug, error, info, warn};

use super::SyncState;
use crate::{
    PeerId, Tick,
    config::SyncConfig,
    desync::RemoteStateLog,
    error::SyncError,
    event::{EventBus, SyncEvent},
    input::{ObjectInput, PeerInput},
    input_buffer::InputBuffer,
    object::ObjectRegistry,
    peer::Peer,
    send_queue::InputSendQueue,
    state_buffer::{StateBuffer, StateFrame},
    transport::{NetworkAdaptor, TransportEvent},
};

/// Rollback synchronization for one participant.
///
/// Not thread-safe by itself: `physics_tick` and `process` must be called
/// from the same loop.
#[derive(Debug)]
pub struct SyncManager<A: NetworkAdaptor> {
    pub(super) config: SyncConfig,
    pub(super) local_id: PeerId,
    pub(super) host_id: PeerId,
    pub(super) adaptor: A,
    pub(super) objects: ObjectRegistry,
    pub(super) peers: BTreeMap<PeerId, Peer>,

    pub(super) input_buffer: InputBuffer,
    pub(super) state_buffer: StateBuffer,
    pub(super) send_queue: InputSendQueue,
    pub(super) remote_state_log: RemoteStateLog,
    /// Object path -> (previous tick state, current tick state).
    pub(super) interpolation_state: BTreeMap<String, (Vec<u8>, Vec<u8>)>,

    pub(super) state: SyncState,
    pub(super) input_tick: Tick,
    pub(super) current_tick: Tick,
    pub(super) skip_ticks: Tick,
    pub(super) rollback_ticks: Tick,
    /// Positive: consecutive blocked cleanups. Negative: cooldown after regaining sync.
    pub(super) input_buffer_underruns: i32,
    /// Newest tick whose snapshot was forwarded to the host.
    pub(super) last_state_logged: Tick,

    pub(super) time_since_last_tick: f32,
    time_since_last_ping_ms: f32,
    pub(super) events: EventBus,
}

impl<A: NetworkAdaptor> SyncManager<A> {
    /// Create a stopped manager. `host_id` is the participant allowed to start
    /// and stop the session; it may equal `local_id`.
    pub fn new(
        local_id: PeerId,
        host_id: PeerId,
        config: SyncConfig,
        adaptor: A,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let current_tick = -config.input_delay;
        Ok(Self {
            config,
            local_id,
            host_id,
            adaptor,
            objects: ObjectRegistry::new(),
            peers: BTreeMap::new(),
            input_buffer: InputBuffer::new(1),
            state_buffer: StateBuffer::new(0),
            send_queue: InputSendQueue::new(1),
            remote_state_log: RemoteStateLog::new(),
            interpolation_state: BTreeMap::new(),
            state: SyncState::Stopped,
            input_tick: 0,
            current_tick,
            skip_ticks: 0,
            rollback_ticks: 0,
            input_buffer_underruns: 0,
            last_state_logged: 0,
            time_since_last_tick: 0.0,
            time_since_last_ping_ms: 0.0,
            events: EventBus::default(),
        })
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&mut self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Peers
    // ---------------------------------------------------------------------

    pub fn add_peer(&mut self, id: PeerId) -> Result<(), SyncError> {
        if id == self.local_id {
            return Err(SyncError::LocalPeer(id));
        }
        if self.peers.contains_key(&id) {
            return Err(SyncError::DuplicatePeer(id));
        }
        self.peers.insert(id, Peer::new(id));
        info!(peer = id, "peer added");
        self.events.emit(SyncEvent::PeerAdded(id));
        Ok(())
    }

    /// Removing the last peer of a running session stops it.
    pub fn remove_peer(&mut self, id: PeerId) -> Result<(), SyncError> {
        if self.peers.remove(&id).is_none() {
            return Err(SyncError::UnknownPeer(id));
        }
        self.remote_state_log.remove_peer(id);
        info!(peer = id, "peer removed");
        self.events.emit(SyncEvent::PeerRemoved(id));

        if self.peers.is_empty() && self.state != SyncState::Stopped {
            self.stop();
        } else {
            self.retire_acknowledged_input();
        }
        Ok(())
    }

    pub fn has_peer(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub(super) fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Host only. Peers are told to start right away; the host itself waits
    /// half of the highest peer RTT so everyone begins at roughly the same
    /// moment. The wait is counted down by [`process`](Self::process).
    pub fn start(&mut self) -> Result<(), SyncError> {
        if !self.is_host() {
            return Err(SyncError::NotHost("start synchronization"));
        }
        if self.state != SyncState::Stopped {
            return Ok(());
        }

        let highest_rtt = self.peers.values().map(|p| p.rtt).max().unwrap_or(0);
        self.broadcast_control(&StartSync);

        let delay_ms = highest_rtt / 2;
        if delay_ms == 0 {
            self.begin();
        } else {
            info!(delay_ms, "delaying host start");
            self.state = SyncState::Starting {
                remaining_ms: delay_ms as f32,
            };
        }
        Ok(())
    }

    /// The host tells every peer to stop as well; other participants only
    /// stop themselves.
    pub fn stop(&mut self) {
        if self.state == SyncState::Stopped {
            return;
        }
        if self.is_host() {
            self.broadcast_control(&StopSync);
        }
        self.halt();
    }

    /// Clear every buffer and counter back to the pre-start state.
    pub fn reset(&mut self) {
        self.input_tick = 0;
        self.current_tick = self.input_tick - self.config.input_delay;
        self.skip_ticks = 0;
        self.rollback_ticks = 0;
        self.input_buffer_underruns = 0;
        self.last_state_logged = 0;
        self.input_buffer.clear(1);
        self.state_buffer.clear(0);
        self.send_queue.clear(1);
        self.interpolation_state.clear();
        self.time_since_last_tick = 0.0;
        self.remote_state_log.clear();
    }

    fn begin(&mut self) {
        self.reset();
        self.state = SyncState::Running;
        self.adaptor.start();
        info!(local = self.local_id, peers = self.peers.len(), "synchronization started");
        self.events.emit(SyncEvent::SyncStarted);
    }

    fn halt(&mut self) {
        self.state = SyncState::Stopping;
        self.adaptor.stop();
        self.reset();
        for peer in self.peers.values_mut() {
            peer.clear();
        }
        self.state = SyncState::Stopped;
        info!(local = self.local_id, "synchronization stopped");
        self.events.emit(SyncEvent::SyncStopped);
    }

    /// Report a fatal error, stop, and hand the error back to the caller.
    pub(super) fn fail(&mut self, err: SyncError) -> SyncError {
        error!(error = %err, "network sync lost");
        self.events.emit(SyncEvent::SyncError {
            message: err.to_string(),
        });
        self.stop();
        err
    }

    // ---------------------------------------------------------------------
    // Render-rate entry point
    // ---------------------------------------------------------------------

    /// Per rendered frame: advances the start countdown and the ping timer,
    /// drains the transport and blends interpolated object state.
    pub fn process(&mut self, delta: f32) -> Result<(), SyncError> {
        let delta_ms = delta * 1000.0;

        if let SyncState::Starting { remaining_ms } = self.state {
            let remaining_ms = remaining_ms - delta_ms;
            if remaining_ms <= 0.0 {
                self.begin();
            } else {
                self.state = SyncState::Starting { remaining_ms };
            }
        }

        self.time_since_last_ping_ms += delta_ms;
        if self.time_since_last_ping_ms >= self.config.ping_interval_ms as f32 {
            self.time_since_last_ping_ms = 0.0;
            self.ping_peers();
        }

        self.poll()?;

        if !self.state.is_started() {
            return Ok(());
        }
        self.time_since_last_tick += delta;
        if self.config.interpolation {
            let weight = (self.time_since_last_tick / self.config.tick_time()).min(1.0);
            self.objects
                .interpolate_all(&self.interpolation_state, weight);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------------

    pub(super) fn poll(&mut self) -> Result<(), SyncError> {
        for event in self.adaptor.poll() {
            self.handle_transport_event(event)?;
        }
        Ok(())
    }

    fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SyncError> {
        let (peer, result) = match event {
            TransportEvent::InputReceived { peer, bytes } => {
                (peer, self.receive_input_tick(peer, &bytes))
            }
            TransportEvent::Pinged { peer, bytes } => (peer, self.on_pinged(peer, &bytes)),
            TransportEvent::PingedBack { peer, bytes } => {
                (peer, self.on_pinged_back(peer, &bytes))
            }
            TransportEvent::ControlReceived { peer, bytes } => {
                (peer, self.on_control(peer, &bytes))
            }
            TransportEvent::PeerDisconnected(peer) => {
                if self.peers.contains_key(&peer) {
                    (peer, self.remove_peer(peer))
                } else {
                    (peer, Ok(()))
                }
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(self.fail(err)),
            Err(err) => {
                warn!(peer, error = %err, "discarding message");
                Ok(())
            }
        }
    }

    fn ping_peers(&mut self) {
        let now = now_ms();
        let bytes = match encode_message(&Ping { local_time: now }) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode ping");
                return;
            }
        };
        for peer in self.peers.values_mut() {
            peer.last_ping_sent_at = now;
            self.adaptor.ping_peer(peer.id, &bytes);
        }
    }

    fn on_pinged(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), SyncError> {
        if peer == self.local_id {
            return Ok(());
        }
        let ping: Ping = decode_packet(bytes)?.decode()?;
        let pong = Pong {
            local_time: ping.local_time,
            remote_time: now_ms(),
        };
        self.adaptor.ping_back_peer(peer, &encode_message(&pong)?);
        Ok(())
    }

    fn on_pinged_back(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), SyncError> {
        let pong: Pong = decode_packet(bytes)?.decode()?;
        let record = self
            .peers
            .get_mut(&peer)
            .ok_or(SyncError::UnknownPeer(peer))?;
        record.record_pong(now_ms(), pong.local_time, pong.remote_time);
        let rtt = record.rtt;
        debug!(peer, rtt, "pinged back");
        self.events.emit(SyncEvent::PeerPingedBack { peer, rtt });
        Ok(())
    }

    fn on_control(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), SyncError> {
        let packet = decode_packet(bytes)?;
        match packet.msg_id() {
            MsgId::StartSync | MsgId::StopSync if peer != self.host_id => {
                Err(SyncError::ProtocolViolation {
                    peer,
                    reason: format!("{:?} from a participant that is not the host", packet.msg_id()),
                })
            }
            MsgId::StartSync => {
                packet.decode::<StartSync>()?;
                if !self.is_host() && self.state == SyncState::Stopped {
                    self.begin();
                }
                Ok(())
            }
            MsgId::StopSync => {
                packet.decode::<StopSync>()?;
                if !self.is_host() && self.state != SyncState::Stopped {
                    self.halt();
                }
                Ok(())
            }
            MsgId::StateLog => {
                let log: StateLog = packet.decode()?;
                if !self.is_host() || !self.state.is_started() {
                    return Ok(());
                }
                if log.tick <= 0 || log.tick >= self.input_tick + self.config.max_buffer_size as Tick {
                    return Err(SyncError::ProtocolViolation {
                        peer,
                        reason: format!("state log for tick {} is outside the input window", log.tick),
                    });
                }
                if log.tick < self.state_buffer.start_tick() {
                    debug!(peer, tick = log.tick, "dropping remote state older than local history");
                    return Ok(());
                }
                self.remote_state_log
                    .log(peer, StateFrame::new(log.tick, log.data));
                Ok(())
            }
            other => Err(SyncError::ProtocolViolation {
                peer,
                reason: format!("{other:?} is not a control message"),
            }),
        }
    }

    fn broadcast_control<T: Message>(&mut self, msg: &T) {
        let bytes = match encode_message(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(msg_id = ?T::msg_id(), error = %err, "failed to encode control message");
                return;
            }
        };
        for &peer in self.peers.keys() {
            self.adaptor.send_control(peer, &bytes);
        }
    }

    pub(super) fn send_control_to_host<T: Message>(&mut self, msg: &T) -> Result<(), SyncError> {
        let bytes = encode_message(msg)?;
        self.adaptor.send_control(self.host_id, &bytes);
        Ok(())
    }

    /// Resend every unacknowledged local input to each peer.
    pub(super) fn send_input_messages_to_all_peers(&mut self) {
        for peer in self.peers.values() {
            let messages = self.send_queue.messages_for(
                peer.next_local_tick_requested,
                peer.last_remote_tick_received + 1,
                self.config.max_input_frames_per_message,
                self.config.max_messages_at_once,
            );
            for msg in messages {
                let bytes = match encode_message(&msg) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(peer = peer.id, error = %err, "failed to encode input message");
                        continue;
                    }
                };
                if bytes.len() > self.config.debug_message_bytes {
                    warn!(peer = peer.id, bytes = bytes.len(), ticks = msg.len(), "sending oversized input message");
                }
                self.adaptor.send_input(peer.id, &bytes);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn host_id(&self) -> PeerId {
        self.host_id
    }

    pub fn is_host(&self) -> bool {
        self.local_id == self.host_id
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    pub fn input_tick(&self) -> Tick {
        self.input_tick
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn skip_ticks(&self) -> Tick {
        self.skip_ticks
    }

    pub fn rollback_ticks(&self) -> Tick {
        self.rollback_ticks
    }

    pub fn input_buffer_underruns(&self) -> i32 {
        self.input_buffer_underruns
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.objects
    }

    pub fn input_buffer(&self) -> &InputBuffer {
        &self.input_buffer
    }

    pub fn state_buffer(&self) -> &StateBuffer {
        &self.state_buffer
    }

    pub fn send_queue(&self) -> &InputSendQueue {
        &self.send_queue
    }

    pub fn adaptor(&self) -> &A {
        &self.adaptor
    }

    pub fn adaptor_mut(&mut self) -> &mut A {
        &mut self.adaptor
    }

    /// Newest real input received from `peer` (the local peer's newest
    /// generated input for the local id).
    pub fn latest_input_from_peer(&self, peer: PeerId) -> Option<&PeerInput> {
        let tick = if peer == self.local_id {
            self.input_tick
        } else {
            self.peers.get(&peer)?.last_remote_tick_received
        };
        self.input_buffer.get(tick)?.player_input(peer)
    }

    /// Newest real input for the object at `path`, from its authority.
    pub fn latest_input_for_object(&self, path: &str) -> Option<&ObjectInput> {
        let authority = self.objects.authority_of(path)?;
        self.latest_input_from_peer(authority)?.get(path)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
