//! Lifecycle events emitted by the synchronization loop.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::{PeerId, Tick, input::PeerInput, state_buffer::StateFrame};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SyncStarted,
    SyncStopped,
    /// Buffer cleanup is blocked by missing remote input.
    SyncLost,
    SyncRegained,
    /// Terminal error; synchronization was stopped.
    SyncError {
        message: String,
    },
    SkipTickFlagged {
        skip_ticks: Tick,
    },
    /// A real remote input contradicted the input used to simulate `tick`.
    RollbackFlagged {
        tick: Tick,
        peer: PeerId,
        local_input: PeerInput,
        remote_input: PeerInput,
    },
    RemoteStateMismatch {
        tick: Tick,
        peer: PeerId,
        local_state: StateFrame,
        remote_state: StateFrame,
    },
    StateLoaded {
        rollback_ticks: Tick,
    },
    TickFinished {
        is_rollback: bool,
    },
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
    PeerPingedBack {
        peer: PeerId,
        rtt: u64,
    },
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<SyncEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Receiver<SyncEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Subscribers whose receiver was dropped are forgotten.
    pub(crate) fn emit(&mut self, event: SyncEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event() {
        let mut bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(SyncEvent::SyncStarted);
        bus.emit(SyncEvent::PeerAdded(4));

        assert_eq!(a.try_iter().count(), 2);
        let events: Vec<_> = b.try_iter().collect();
        assert_eq!(events, vec![SyncEvent::SyncStarted, SyncEvent::PeerAdded(4)]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(SyncEvent::SyncStopped);
        assert_eq!(bus.subscribers.len(), 1);
        assert_eq!(kept.try_recv().unwrap(), SyncEvent::SyncStopped);
    }
}
