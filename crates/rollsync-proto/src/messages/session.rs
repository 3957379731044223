use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Tick;

/// Host -> peers: begin the fixed-tick loop now.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartSync;

/// Host -> peers: stop and reset.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopSync;

/// Peer -> host: a saved snapshot whose input was fully resolved when it was taken.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateLog {
    pub tick: Tick,
    /// Object path -> opaque state blob.
    pub data: BTreeMap<String, Vec<u8>>,
}
