//! Authority-side desync detection.
//!
//! Non-authoritative peers forward snapshots of ticks whose input was fully
//! resolved. The authority queues them per peer and compares each one with
//! its own snapshot of the same tick once that snapshot is final.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::{
    PeerId, Tick,
    input_buffer::InputBuffer,
    state_buffer::{StateBuffer, StateFrame},
};

/// A remote snapshot that disagrees with the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMismatch {
    pub tick: Tick,
    pub peer: PeerId,
    pub local: StateFrame,
    pub remote: StateFrame,
}

#[derive(Debug, Default)]
pub struct RemoteStateLog {
    logged: BTreeMap<PeerId, VecDeque<StateFrame>>,
}

impl RemoteStateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, peer: PeerId, frame: StateFrame) {
        self.logged.entry(peer).or_default().push_back(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.logged.values().all(VecDeque::is_empty)
    }

    pub fn pending(&self, peer: PeerId) -> usize {
        self.logged.get(&peer).map_or(0, VecDeque::len)
    }

    pub fn remove_peer(&mut self, peer: PeerId) {
        self.logged.remove(&peer);
    }

    pub fn clear(&mut self) {
        self.logged.clear();
    }

    /// Compare every queued snapshot whose tick is final locally.
    ///
    /// A snapshot stays queued while any local input up to its tick is
    /// incomplete or the local snapshot does not exist yet. Snapshots older
    /// than the local retained window can no longer be checked and are dropped.
    pub fn check(
        &mut self,
        inputs: &InputBuffer,
        states: &StateBuffer,
        peers: &[PeerId],
    ) -> Vec<StateMismatch> {
        let mut mismatches = Vec::new();
        for (&peer, queue) in &mut self.logged {
            while let Some(remote) = queue.front() {
                let tick = remote.tick;
                if !(inputs.start_tick()..=tick).all(|t| inputs.is_complete(t, peers)) {
                    break;
                }
                if tick < states.start_tick() {
                    debug!(peer, tick, "dropping remote state older than local history");
                    queue.pop_front();
                    continue;
                }
                let Some(local) = states.get(tick) else {
                    break;
                };
                let local = local.clone();
                let Some(remote) = queue.pop_front() else {
                    break;
                };
                if local.data != remote.data {
                    mismatches.push(StateMismatch {
                        tick,
                        peer,
                        local,
                        remote,
                    });
                }
            }
        }
        mismatches
    }
}
