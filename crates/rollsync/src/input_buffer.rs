//! Tick-indexed history of every peer's input.

use std::collections::{BTreeMap, VecDeque};

use crate::{PeerId, Tick, error::SyncError, input::PeerInput};

/// One peer's input for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerInput {
    pub input: PeerInput,
    /// True while the value is a stand-in awaiting the peer's real input.
    pub predicted: bool,
}

impl PlayerInput {
    pub fn real(input: PeerInput) -> Self {
        Self {
            input,
            predicted: false,
        }
    }

    pub fn predicted(input: PeerInput) -> Self {
        Self {
            input,
            predicted: true,
        }
    }
}

/// All inputs known for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFrame {
    pub tick: Tick,
    pub players: BTreeMap<PeerId, PlayerInput>,
}

impl InputFrame {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            players: BTreeMap::new(),
        }
    }

    pub fn player_input(&self, peer: PeerId) -> Option<&PeerInput> {
        self.players.get(&peer).map(|p| &p.input)
    }

    /// Missing entries count as predicted.
    pub fn is_player_input_predicted(&self, peer: PeerId) -> bool {
        self.players.get(&peer).is_none_or(|p| p.predicted)
    }

    pub fn is_complete(&self, peers: &[PeerId]) -> bool {
        peers.iter().all(|&p| !self.is_player_input_predicted(p))
    }

    pub fn missing_peers(&self, peers: &[PeerId]) -> Vec<PeerId> {
        peers
            .iter()
            .copied()
            .filter(|&p| self.is_player_input_predicted(p))
            .collect()
    }
}

/// Contiguous run of [`InputFrame`]s from `start_tick` to the highest tick.
#[derive(Debug)]
pub struct InputBuffer {
    frames: VecDeque<InputFrame>,
    start_tick: Tick,
}

impl InputBuffer {
    pub fn new(start_tick: Tick) -> Self {
        Self {
            frames: VecDeque::new(),
            start_tick,
        }
    }

    pub fn start_tick(&self) -> Tick {
        self.start_tick
    }

    pub fn highest_tick(&self) -> Option<Tick> {
        self.frames.back().map(|f| f.tick)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn index_of(&self, tick: Tick) -> Option<usize> {
        if tick < self.start_tick {
            return None;
        }
        let index = (tick - self.start_tick) as usize;
        (index < self.frames.len()).then_some(index)
    }

    pub fn get(&self, tick: Tick) -> Option<&InputFrame> {
        let frame = self.frames.get(self.index_of(tick)?)?;
        debug_assert_eq!(frame.tick, tick, "input buffer tick misaligned");
        Some(frame)
    }

    pub fn get_mut(&mut self, tick: Tick) -> Option<&mut InputFrame> {
        let index = self.index_of(tick)?;
        self.frames.get_mut(index)
    }

    /// Return the frame for `tick`, appending empty frames for every tick up
    /// to it. Ticks below the retained start are gone for good.
    pub fn get_or_create(&mut self, tick: Tick) -> Result<&mut InputFrame, SyncError> {
        if tick < self.start_tick {
            return Err(SyncError::BufferExhaustion {
                tick,
                start_tick: self.start_tick,
            });
        }
        let mut next = self.start_tick + self.frames.len() as Tick;
        while next <= tick {
            self.frames.push_back(InputFrame::new(next));
            next += 1;
        }
        let index = (tick - self.start_tick) as usize;
        self.frames
            .get_mut(index)
            .ok_or(SyncError::BufferExhaustion {
                tick,
                start_tick: self.start_tick,
            })
    }

    /// Retired ticks were complete when they left; ticks not materialized yet
    /// are still pending.
    pub fn is_complete(&self, tick: Tick, peers: &[PeerId]) -> bool {
        if tick < self.start_tick {
            return true;
        }
        self.get(tick).is_some_and(|f| f.is_complete(peers))
    }

    /// Drop complete frames that fell more than `max_size` ticks behind `current_tick`.
    pub fn cleanup(&mut self, current_tick: Tick, max_size: usize, peers: &[PeerId]) {
        while current_tick - self.start_tick > max_size as Tick {
            match self.frames.front() {
                Some(front) if front.is_complete(peers) => {
                    self.frames.pop_front();
                    self.start_tick += 1;
                }
                _ => break,
            }
        }
    }

    pub fn clear(&mut self, start_tick: Tick) {
        self.frames.clear();
        self.start_tick = start_tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ObjectInput;

    fn some_input(data: &[u8]) -> PeerInput {
        let mut input = PeerInput::new();
        input.insert("/p", ObjectInput::new(data));
        input
    }

    #[test]
    fn get_or_create_fills_gaps() {
        let mut buf = InputBuffer::new(1);
        buf.get_or_create(4).unwrap();
        assert_eq!(buf.len(), 4);
        for tick in 1..=4 {
            assert_eq!(buf.get(tick).unwrap().tick, tick);
        }
        assert!(buf.get(0).is_none());
        assert!(buf.get(5).is_none());
        assert_eq!(buf.highest_tick(), Some(4));
    }

    #[test]
    fn get_or_create_below_start_is_exhaustion() {
        let mut buf = InputBuffer::new(10);
        let err = buf.get_or_create(9).unwrap_err();
        assert!(matches!(
            err,
            SyncError::BufferExhaustion {
                tick: 9,
                start_tick: 10
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn completeness_tracks_real_entries() {
        let mut buf = InputBuffer::new(1);
        let peers = [2, 3];
        let frame = buf.get_or_create(1).unwrap();
        frame.players.insert(2, PlayerInput::real(some_input(b"a")));
        frame.players.insert(3, PlayerInput::predicted(some_input(b"a")));

        assert!(!buf.is_complete(1, &peers));
        assert_eq!(buf.get(1).unwrap().missing_peers(&peers), vec![3]);

        buf.get_mut(1)
            .unwrap()
            .players
            .insert(3, PlayerInput::real(some_input(b"b")));
        assert!(buf.is_complete(1, &peers));

        // Not materialized yet: pending.
        assert!(!buf.is_complete(2, &peers));
        // With no remote peers every existing frame is complete.
        assert!(buf.is_complete(1, &[]));
    }

    #[test]
    fn cleanup_keeps_incomplete_front() {
        let mut buf = InputBuffer::new(1);
        let peers = [2];
        for tick in 1..=10 {
            let frame = buf.get_or_create(tick).unwrap();
            if tick != 3 {
                frame.players.insert(2, PlayerInput::real(PeerInput::new()));
            }
        }

        buf.cleanup(10, 4, &peers);
        // Ticks 1 and 2 are gone, tick 3 blocks further eviction.
        assert_eq!(buf.start_tick(), 3);
        assert!(buf.is_complete(2, &peers));

        buf.get_mut(3)
            .unwrap()
            .players
            .insert(2, PlayerInput::real(PeerInput::new()));
        buf.cleanup(10, 4, &peers);
        assert_eq!(buf.start_tick(), 6);
    }
}
