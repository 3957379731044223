//! Rollback state synchronization for fixed-tick multiplayer simulations.
//!
//! Every participant predicts remote inputs, simulates locally each tick and,
//! when real remote input later disagrees with the prediction, restores an
//! older snapshot and resimulates forward.
//!
//! # Architecture
//!
//! - [`sync`]: the synchronization loop ([`SyncManager`]) and rollback
//! - [`input_buffer`] / [`state_buffer`]: tick-indexed input and state history
//! - [`peer`]: per-remote timing and advantage accounting
//! - [`send_queue`]: outbound local input awaiting acknowledgment
//! - [`desync`]: authority-side comparison of forwarded snapshots
//! - [`object`]: the simulated-object contract and registry
//! - [`transport`]: the network adaptor boundary and an in-process loopback
//! - [`event`]: lifecycle events
//! - [`config`] / [`error`]: configuration and error types

pub mod config;
pub mod desync;
pub mod error;
pub mod event;
pub mod input;
pub mod input_buffer;
pub mod object;
pub mod peer;
pub mod send_queue;
pub mod state_buffer;
pub mod sync;
pub mod transport;

/// One fixed simulation step.
pub type Tick = rollsync_proto::Tick;

/// Identifier of a participant, as assigned by the transport.
pub type PeerId = u32;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::SyncError;
pub use event::SyncEvent;
pub use input::{ObjectInput, PeerInput};
pub use object::{Networkable, NetworkedInputs, ObjectRegistry, Prediction};
pub use peer::Peer;
pub use state_buffer::StateFrame;
pub use sync::{SyncManager, SyncState};
pub use transport::{
    NetworkAdaptor, TransportEvent,
    loopback::{LinkConditions, LoopbackAdaptor, LoopbackNetwork},
};
