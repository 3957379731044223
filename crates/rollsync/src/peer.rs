//! Per-remote-participant timing and buffer-cursor state.

use crate::{PeerId, Tick};

/// Timing and acknowledgment state kept for one remote participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: PeerId,
    /// Round-trip time of the last ping, in milliseconds.
    pub rtt: u64,
    /// Estimated `remote clock - local clock`, in milliseconds.
    pub clock_offset: i64,
    pub last_ping_sent_at: u64,
    pub last_ping_received_at: u64,
    /// Highest tick up to which this peer's input arrived without gaps.
    pub last_remote_tick_received: Tick,
    /// Oldest local tick this peer still needs (its acknowledgment cursor).
    pub next_local_tick_requested: Tick,
    /// How far our input generation is ahead of what this peer sent us.
    pub local_lag: Tick,
    /// How far this peer is ahead of what we acknowledged to it.
    pub remote_lag: Tick,
    advantage_history: Vec<Tick>,
    pub calculated_advantage: f32,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            rtt: 0,
            clock_offset: 0,
            last_ping_sent_at: 0,
            last_ping_received_at: 0,
            last_remote_tick_received: 0,
            next_local_tick_requested: 1,
            local_lag: 0,
            remote_lag: 0,
            advantage_history: Vec::new(),
            calculated_advantage: 0.0,
        }
    }

    /// Apply a pong: `local_time` is our clock when the ping left, `remote_time`
    /// the peer's clock when it answered, `now` our clock on arrival.
    pub fn record_pong(&mut self, now: u64, local_time: u64, remote_time: u64) {
        self.last_ping_received_at = now;
        self.rtt = now.saturating_sub(local_time);
        self.clock_offset = remote_time as i64 - local_time as i64 - (self.rtt / 2) as i64;
    }

    /// Record the current lag difference. Once `ticks_to_calculate` samples
    /// were collected (or immediately when it is 0) the mean becomes the new
    /// `calculated_advantage` and the samples are discarded.
    pub fn record_advantage(&mut self, ticks_to_calculate: usize) {
        self.advantage_history
            .push(self.local_lag - self.remote_lag);
        if ticks_to_calculate == 0 || self.advantage_history.len() >= ticks_to_calculate {
            let total: i64 = self.advantage_history.iter().map(|&x| x as i64).sum();
            self.calculated_advantage = total as f32 / self.advantage_history.len() as f32;
            self.advantage_history.clear();
        }
    }

    pub fn clear_advantage(&mut self) {
        self.calculated_advantage = 0.0;
        self.advantage_history.clear();
    }

    pub fn advantage_history(&self) -> &[Tick] {
        &self.advantage_history
    }

    /// Forget everything learned about this peer except its id.
    pub fn clear(&mut self) {
        *self = Self::new(self.id);
    }
}
