//! The fixed-tick synchronization loop.
//!
//! [`SyncManager`] owns every buffer and peer record. It is driven from two
//! entry points:
//! - `physics_tick(delta)`: once per fixed step; rollback, buffer upkeep,
//!   input exchange and simulation
//! - `process(delta)`: once per rendered frame; start countdown, pings and
//!   interpolation

mod manager;
mod rollback;

pub use manager::SyncManager;

/// Lifecycle of a [`SyncManager`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SyncState {
    #[default]
    Stopped,
    /// Host only: waiting half the highest peer RTT before starting locally.
    Starting { remaining_ms: f32 },
    Running,
    /// State history cannot be retired because remote input is missing.
    SyncLost,
    Stopping,
}

impl SyncState {
    /// Whether fixed ticks are being processed.
    pub fn is_started(&self) -> bool {
        matches!(self, SyncState::Running | SyncState::SyncLost)
    }
}
