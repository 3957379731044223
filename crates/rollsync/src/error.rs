//! Synchronization error types.

use rollsync_proto::ProtoError;
use thiserror::Error;

use crate::{PeerId, Tick};

#[derive(Error, Debug)]
pub enum SyncError {
    /// A message referenced a tick outside any valid window or carried a
    /// malformed payload. The message is discarded; never fatal.
    #[error("protocol violation from peer {peer}: {reason}")]
    ProtocolViolation { peer: PeerId, reason: String },

    #[error("requested input frame {tick} not found in buffer (retained from {start_tick})")]
    BufferExhaustion { tick: Tick, start_tick: Tick },

    #[error("can't rollback {requested} tick(s) on tick {tick}, available state: {available}")]
    InsufficientHistory {
        requested: Tick,
        tick: Tick,
        available: usize,
    },

    #[error("unable to regain synchronization after {underruns} attempts")]
    PersistentDesync { underruns: i32 },

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer {0} already exists")]
    DuplicatePeer(PeerId),

    #[error("peer {0} is the local peer")]
    LocalPeer(PeerId),

    #[error("object {0:?} is already registered")]
    DuplicateObject(String),

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("input encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),
}

impl SyncError {
    /// Fatal errors stop synchronization; everything else is reported and
    /// the offending message or call is dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::BufferExhaustion { .. }
                | SyncError::InsufficientHistory { .. }
                | SyncError::PersistentDesync { .. }
        )
    }
}
