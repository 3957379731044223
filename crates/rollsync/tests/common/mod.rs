#![allow(dead_code)]

use crossbeam_channel::Receiver;
use rollsync::{
    LoopbackAdaptor, LoopbackNetwork, Networkable, NetworkedInputs, ObjectInput, PeerId,
    PeerInput, SyncConfig, SyncEvent, SyncManager, Tick,
};
use rollsync_proto::{encode_message, messages::input::InputTicks};

pub const DT: f32 = 1.0 / 60.0;

/// Order-sensitive accumulator. Each tick folds the first input byte (plus
/// one, so "no input" differs from zero) and an optional bias into `value`.
pub struct Mixer {
    value: u64,
    bias: u64,
    script: Vec<u8>,
    cursor: usize,
}

impl Mixer {
    pub fn scripted(script: Vec<u8>) -> Self {
        Self {
            value: 0,
            bias: 0,
            script,
            cursor: 0,
        }
    }

    /// A copy that simulates differently from everyone else.
    pub fn biased(mut self, bias: u64) -> Self {
        self.bias = bias;
        self
    }
}

pub fn mix(value: u64, input: Option<u8>) -> u64 {
    value
        .wrapping_mul(31)
        .wrapping_add(input.map_or(0, |b| b as u64 + 1))
}

impl Networkable for Mixer {
    fn tick(&mut self, _delta: f32, input: &ObjectInput) {
        self.value = mix(self.value, input.data.first().copied()).wrapping_add(self.bias);
    }

    fn save_state(&self) -> Vec<u8> {
        self.value.to_le_bytes().to_vec()
    }

    fn load_state(&mut self, state: &[u8]) {
        self.value = u64::from_le_bytes(state.try_into().unwrap_or([0; 8]));
    }
}

impl NetworkedInputs for Mixer {
    fn collect_local_input(&mut self) -> Option<ObjectInput> {
        let byte = self.script.get(self.cursor).copied();
        self.cursor += 1;
        byte.map(|b| ObjectInput::new(vec![b]))
    }
}

/// Value of a [`Mixer`] after simulating ticks `1..=tick` with `script`.
pub fn expected_value(script: &[u8], tick: Tick) -> u64 {
    (0..tick as usize).fold(0, |value, i| mix(value, script.get(i).copied()))
}

pub fn decode_value(blob: &[u8]) -> u64 {
    u64::from_le_bytes(blob.try_into().expect("mixer state is 8 bytes"))
}

pub fn path_of(peer: PeerId) -> String {
    format!("/players/p{peer}")
}

/// An engine with one [`Mixer`] per participant. `scripts[i]` drives
/// participant `ids[i]`.
pub fn engine(
    net: &LoopbackNetwork,
    local: PeerId,
    host: PeerId,
    config: SyncConfig,
    ids: &[PeerId],
    scripts: &[Vec<u8>],
) -> SyncManager<LoopbackAdaptor> {
    let mut manager = SyncManager::new(local, host, config, net.adaptor(local)).unwrap();
    for (&id, script) in ids.iter().zip(scripts) {
        manager
            .objects_mut()
            .register_with_inputs(path_of(id), id, Mixer::scripted(script.clone()))
            .unwrap();
        if id != local {
            manager.add_peer(id).unwrap();
        }
    }
    manager
}

pub fn drain(rx: &Receiver<SyncEvent>) -> Vec<SyncEvent> {
    rx.try_iter().collect()
}

pub fn input_of(peer: PeerId, byte: u8) -> PeerInput {
    let mut input = PeerInput::new();
    input.insert(path_of(peer), ObjectInput::new(vec![byte]));
    input
}

/// Encoded `InputTicks` as a remote participant would send it.
pub fn input_message(next_tick_requested: Tick, ticks: &[(Tick, PeerInput)]) -> Vec<u8> {
    let mut msg = InputTicks::new(next_tick_requested);
    for (tick, input) in ticks {
        msg.push(*tick, &input.to_bytes().unwrap());
    }
    encode_message(&msg).unwrap()
}

/// Snapshot value of `path` at `tick`, if still retained.
pub fn snapshot_value(
    manager: &SyncManager<LoopbackAdaptor>,
    tick: Tick,
    path: &str,
) -> Option<u64> {
    manager
        .state_buffer()
        .get(tick)
        .and_then(|f| f.data.get(path))
        .map(|b| decode_value(b))
}
