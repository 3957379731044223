//! In-process transport connecting several engines through a shared hub.
//!
//! Time on the hub is measured in steps; the driver calls
//! [`LoopbackNetwork::advance`] once per tick. Each directed link can delay,
//! randomly drop or completely block traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::trace;

use super::{NetworkAdaptor, TransportEvent};
use crate::PeerId;

/// Behaviour of one directed link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditions {
    /// Steps between send and delivery.
    pub delay_steps: u64,
    /// Probability in `[0, 1]` that a packet is lost.
    pub drop_rate: f64,
    /// Drop everything.
    pub blocked: bool,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            delay_steps: 0,
            drop_rate: 0.0,
            blocked: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Input,
    Ping,
    PingBack,
    Control,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u64,
    event: TransportEvent,
}

#[derive(Debug)]
struct Hub {
    now: u64,
    inboxes: BTreeMap<PeerId, Vec<InFlight>>,
    links: HashMap<(PeerId, PeerId), LinkConditions>,
    default_link: LinkConditions,
    rng: StdRng,
    sent: u64,
    dropped: u64,
}

impl Hub {
    fn link(&self, from: PeerId, to: PeerId) -> LinkConditions {
        self.links
            .get(&(from, to))
            .copied()
            .unwrap_or(self.default_link)
    }

    fn send(&mut self, from: PeerId, to: PeerId, channel: Channel, bytes: &[u8]) {
        self.sent += 1;
        let link = self.link(from, to);
        if link.blocked || (link.drop_rate > 0.0 && self.rng.random::<f64>() < link.drop_rate) {
            self.dropped += 1;
            trace!(from, to, ?channel, "loopback packet dropped");
            return;
        }
        let Some(inbox) = self.inboxes.get_mut(&to) else {
            self.dropped += 1;
            return;
        };
        let bytes = bytes.to_vec();
        let event = match channel {
            Channel::Input => TransportEvent::InputReceived { peer: from, bytes },
            Channel::Ping => TransportEvent::Pinged { peer: from, bytes },
            Channel::PingBack => TransportEvent::PingedBack { peer: from, bytes },
            Channel::Control => TransportEvent::ControlReceived { peer: from, bytes },
        };
        inbox.push(InFlight {
            deliver_at: self.now + link.delay_steps,
            event,
        });
    }

    fn take_ready(&mut self, id: PeerId) -> Vec<TransportEvent> {
        let now = self.now;
        let Some(inbox) = self.inboxes.get_mut(&id) else {
            return Vec::new();
        };
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(inbox).into_iter().partition(|m| m.deliver_at <= now);
        *inbox = waiting;
        let mut ready = ready;
        ready.sort_by_key(|m| m.deliver_at);
        ready.into_iter().map(|m| m.event).collect()
    }
}

/// Shared hub handle. Cloning shares the same hub.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packet loss is drawn from a generator seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                now: 0,
                inboxes: BTreeMap::new(),
                links: HashMap::new(),
                default_link: LinkConditions::default(),
                rng: StdRng::seed_from_u64(seed),
                sent: 0,
                dropped: 0,
            })),
        }
    }

    /// Attach a participant and return its adaptor.
    pub fn adaptor(&self, id: PeerId) -> LoopbackAdaptor {
        self.hub.lock().inboxes.entry(id).or_default();
        LoopbackAdaptor {
            id,
            hub: Arc::clone(&self.hub),
        }
    }

    pub fn set_link(&self, from: PeerId, to: PeerId, conditions: LinkConditions) {
        self.hub.lock().links.insert((from, to), conditions);
    }

    pub fn set_default_link(&self, conditions: LinkConditions) {
        self.hub.lock().default_link = conditions;
    }

    /// Advance hub time by one step.
    pub fn advance(&self) {
        self.hub.lock().now += 1;
    }

    pub fn now(&self) -> u64 {
        self.hub.lock().now
    }

    /// Detach `peer` and notify everyone else.
    pub fn disconnect(&self, peer: PeerId) {
        let mut hub = self.hub.lock();
        hub.inboxes.remove(&peer);
        let now = hub.now;
        for inbox in hub.inboxes.values_mut() {
            inbox.push(InFlight {
                deliver_at: now,
                event: TransportEvent::PeerDisconnected(peer),
            });
        }
    }

    /// `(sent, dropped)` packet counters.
    pub fn stats(&self) -> (u64, u64) {
        let hub = self.hub.lock();
        (hub.sent, hub.dropped)
    }
}

/// One participant's end of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackAdaptor {
    id: PeerId,
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackAdaptor {
    pub fn id(&self) -> PeerId {
        self.id
    }
}

impl NetworkAdaptor for LoopbackAdaptor {
    fn send_input(&mut self, peer: PeerId, bytes: &[u8]) {
        self.hub.lock().send(self.id, peer, Channel::Input, bytes);
    }

    fn ping_peer(&mut self, peer: PeerId, bytes: &[u8]) {
        self.hub.lock().send(self.id, peer, Channel::Ping, bytes);
    }

    fn ping_back_peer(&mut self, peer: PeerId, bytes: &[u8]) {
        self.hub.lock().send(self.id, peer, Channel::PingBack, bytes);
    }

    fn send_control(&mut self, peer: PeerId, bytes: &[u8]) {
        self.hub.lock().send(self.id, peer, Channel::Control, bytes);
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.hub.lock().take_ready(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_delivery() {
        let net = LoopbackNetwork::new();
        let mut a = net.adaptor(1);
        let mut b = net.adaptor(2);
        net.set_link(1, 2, LinkConditions {
            delay_steps: 2,
            ..Default::default()
        });

        a.send_input(2, b"hello");
        assert!(b.poll().is_empty());
        net.advance();
        assert!(b.poll().is_empty());
        net.advance();
        assert_eq!(
            b.poll(),
            vec![TransportEvent::InputReceived {
                peer: 1,
                bytes: b"hello".to_vec()
            }]
        );

        // The reverse link has no delay.
        b.send_control(1, b"x");
        assert_eq!(a.poll().len(), 1);
    }

    #[test]
    fn blocked_links_drop_everything() {
        let net = LoopbackNetwork::new();
        let mut a = net.adaptor(1);
        let mut b = net.adaptor(2);
        net.set_link(1, 2, LinkConditions {
            blocked: true,
            ..Default::default()
        });
        a.ping_peer(2, b"p");
        net.advance();
        assert!(b.poll().is_empty());
        assert_eq!(net.stats(), (1, 1));
    }

    #[test]
    fn disconnect_notifies_remaining_peers() {
        let net = LoopbackNetwork::new();
        let mut a = net.adaptor(1);
        let _b = net.adaptor(2);
        net.disconnect(2);
        assert_eq!(a.poll(), vec![TransportEvent::PeerDisconnected(2)]);
        a.send_input(2, b"lost");
        assert_eq!(net.stats(), (1, 1));
    }

    #[test]
    fn loss_is_reproducible_per_seed() {
        let run = |seed| {
            let net = LoopbackNetwork::with_seed(seed);
            let mut a = net.adaptor(1);
            let mut b = net.adaptor(2);
            net.set_default_link(LinkConditions {
                drop_rate: 0.5,
                ..Default::default()
            });
            for i in 0..64u8 {
                a.send_input(2, &[i]);
            }
            b.poll().len()
        };
        assert_eq!(run(7), run(7));
        let received = run(7);
        assert!(received > 0 && received < 64);
    }
}
