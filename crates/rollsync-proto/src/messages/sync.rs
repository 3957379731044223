use serde::{Deserialize, Serialize};

/// Clock probe. `local_time` is the sender's monotonic clock in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub local_time: u64,
}

/// Echo of a [`Ping`], stamped with the responder's clock.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub local_time: u64,
    pub remote_time: u64,
}
