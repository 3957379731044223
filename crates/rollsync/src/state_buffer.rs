//! Tick-indexed snapshots of every simulated object's state.
//!
//! Modeled as a ring of the most recent snapshots, but eviction is gated on
//! input completeness: a snapshot may still be needed as a rollback origin
//! until the input of the following tick is final.

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

use crate::{PeerId, Tick, input_buffer::InputBuffer};

/// Serialized state of every registered object after simulating `tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFrame {
    pub tick: Tick,
    /// Object path -> opaque state blob.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl StateFrame {
    pub fn new(tick: Tick, data: BTreeMap<String, Vec<u8>>) -> Self {
        Self { tick, data }
    }
}

/// Eviction was refused because a peer's input is still missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "attempting to retire state frame {state_tick}, but input frame {input_tick} is still missing input (missing peer(s): {missing_peers:?})"
)]
pub struct CleanupBlocked {
    pub state_tick: Tick,
    pub input_tick: Tick,
    pub missing_peers: Vec<PeerId>,
}

#[derive(Debug)]
pub struct StateBuffer {
    /// Stored snapshots (oldest first).
    frames: VecDeque<StateFrame>,
    start_tick: Tick,
}

impl StateBuffer {
    pub fn new(start_tick: Tick) -> Self {
        Self {
            frames: VecDeque::new(),
            start_tick,
        }
    }

    /// Push the snapshot of the newest simulated tick.
    pub fn append(&mut self, frame: StateFrame) {
        debug_assert_eq!(
            frame.tick,
            self.start_tick + self.frames.len() as Tick,
            "state buffer tick misaligned"
        );
        self.frames.push_back(frame);
    }

    pub fn get(&self, tick: Tick) -> Option<&StateFrame> {
        if tick < self.start_tick {
            return None;
        }
        let frame = self.frames.get((tick - self.start_tick) as usize)?;
        debug_assert_eq!(frame.tick, tick, "state buffer tick misaligned");
        Some(frame)
    }

    /// `from_back(0)` is the newest snapshot.
    pub fn from_back(&self, n: usize) -> Option<&StateFrame> {
        let index = self.frames.len().checked_sub(n + 1)?;
        self.frames.get(index)
    }

    pub fn latest(&self) -> Option<&StateFrame> {
        self.frames.back()
    }

    pub fn start_tick(&self) -> Tick {
        self.start_tick
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Keep only the oldest `len` snapshots.
    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }

    /// Evict down to `max_size` snapshots. Each eviction of tick `T` requires
    /// the input frame `T + 1` to be complete.
    pub fn cleanup(
        &mut self,
        max_size: usize,
        inputs: &InputBuffer,
        peers: &[PeerId],
    ) -> Result<(), CleanupBlocked> {
        while self.frames.len() > max_size {
            let Some(oldest) = self.frames.front() else {
                break;
            };
            let input_tick = oldest.tick + 1;
            if !inputs.is_complete(input_tick, peers) {
                let missing_peers = inputs
                    .get(input_tick)
                    .map(|f| f.missing_peers(peers))
                    .unwrap_or_else(|| peers.to_vec());
                return Err(CleanupBlocked {
                    state_tick: oldest.tick,
                    input_tick,
                    missing_peers,
                });
            }
            self.frames.pop_front();
            self.start_tick += 1;
        }
        Ok(())
    }

    pub fn clear(&mut self, start_tick: Tick) {
        self.frames.clear();
        self.start_tick = start_tick;
    }
}
