//! Boundary to whatever moves bytes between peers.
//!
//! The engine never blocks on the network: it hands outbound packets to the
//! adaptor and drains whatever the adaptor collected on `poll()`.

pub mod loopback;

use crate::PeerId;

/// Something the adaptor received on behalf of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    InputReceived { peer: PeerId, bytes: Vec<u8> },
    Pinged { peer: PeerId, bytes: Vec<u8> },
    PingedBack { peer: PeerId, bytes: Vec<u8> },
    /// Start/stop broadcasts and forwarded state logs.
    ControlReceived { peer: PeerId, bytes: Vec<u8> },
    PeerDisconnected(PeerId),
}

/// Transport used by a [`SyncManager`](crate::SyncManager).
///
/// Delivery may be unreliable and unordered; input messages are resent until
/// acknowledged.
pub trait NetworkAdaptor {
    /// Called when synchronization starts.
    fn start(&mut self) {}

    /// Called when synchronization stops.
    fn stop(&mut self) {}

    fn send_input(&mut self, peer: PeerId, bytes: &[u8]);

    fn ping_peer(&mut self, peer: PeerId, bytes: &[u8]);

    fn ping_back_peer(&mut self, peer: PeerId, bytes: &[u8]);

    fn send_control(&mut self, peer: PeerId, bytes: &[u8]);

    /// Everything that arrived since the last poll. Must not block.
    fn poll(&mut self) -> Vec<TransportEvent>;
}
