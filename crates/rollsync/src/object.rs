//! Simulated-object contract and registry.
//!
//! Objects register once with the path that identifies them across peers and
//! the peer that owns their input. Whether an object supplies its own input
//! is decided at registration, not looked up per call.

use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    PeerId, Tick,
    error::SyncError,
    input::{ObjectInput, PeerInput},
    input_buffer::InputFrame,
};

/// State capabilities every simulated object has.
pub trait Networkable {
    /// Advance one tick with the resolved input (empty if none).
    fn tick(&mut self, delta: f32, input: &ObjectInput);

    fn save_state(&self) -> Vec<u8>;

    fn load_state(&mut self, state: &[u8]);

    /// Render-time blend between two saved states.
    fn interpolate_state(&mut self, _from: &[u8], _to: &[u8], _weight: f32) {}
}

/// Context handed to [`NetworkedInputs::predict_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    /// Ticks since the owning peer's last real input.
    pub ticks_since_real_input: Tick,
    /// Configured threshold for the default prediction.
    pub staleness_ticks: Tick,
}

impl Prediction {
    pub fn is_stale(&self) -> bool {
        self.ticks_since_real_input > self.staleness_ticks
    }
}

/// Input capabilities of objects driven by a peer's input.
pub trait NetworkedInputs {
    /// Sample local input; `None` means "no input this tick".
    fn collect_local_input(&mut self) -> Option<ObjectInput>;

    /// Stand-in for a remote input that has not arrived yet. The default
    /// repeats the previous input until it goes stale, then drops it.
    fn predict_input(&self, previous: &ObjectInput, ctx: Prediction) -> Option<ObjectInput> {
        if ctx.is_stale() {
            None
        } else {
            Some(previous.clone())
        }
    }
}

/// Objects that both hold state and produce input.
pub trait NetworkedObject: Networkable + NetworkedInputs {
    fn as_networkable(&self) -> &dyn Networkable;
    fn as_networkable_mut(&mut self) -> &mut dyn Networkable;
}

impl<T: Networkable + NetworkedInputs> NetworkedObject for T {
    fn as_networkable(&self) -> &dyn Networkable {
        self
    }

    fn as_networkable_mut(&mut self) -> &mut dyn Networkable {
        self
    }
}

enum Capabilities {
    State(Box<dyn Networkable>),
    StateAndInput(Box<dyn NetworkedObject>),
}

struct Entry {
    path: String,
    authority: PeerId,
    object: Capabilities,
}

impl Entry {
    fn state(&self) -> &dyn Networkable {
        match &self.object {
            Capabilities::State(o) => o.as_ref(),
            Capabilities::StateAndInput(o) => o.as_networkable(),
        }
    }

    fn state_mut(&mut self) -> &mut dyn Networkable {
        match &mut self.object {
            Capabilities::State(o) => o.as_mut(),
            Capabilities::StateAndInput(o) => o.as_networkable_mut(),
        }
    }
}

/// Registry of simulated objects, iterated in registration order.
#[derive(Default)]
pub struct ObjectRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.path, e.authority)))
            .finish()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &mut self,
        path: String,
        authority: PeerId,
        object: Capabilities,
    ) -> Result<(), SyncError> {
        if self.contains(&path) {
            return Err(SyncError::DuplicateObject(path));
        }
        self.entries.push(Entry {
            path,
            authority,
            object,
        });
        Ok(())
    }

    /// Register an object that only carries state.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        authority: PeerId,
        object: impl Networkable + 'static,
    ) -> Result<(), SyncError> {
        self.insert(path.into(), authority, Capabilities::State(Box::new(object)))
    }

    /// Register an object whose input is produced by its authority peer.
    pub fn register_with_inputs(
        &mut self,
        path: impl Into<String>,
        authority: PeerId,
        object: impl NetworkedObject + 'static,
    ) -> Result<(), SyncError> {
        self.insert(
            path.into(),
            authority,
            Capabilities::StateAndInput(Box::new(object)),
        )
    }

    pub fn unregister(&mut self, path: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        before != self.entries.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn authority_of(&self, path: &str) -> Option<PeerId> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.authority)
    }

    /// Current state blob of one object.
    pub fn state_of(&self, path: &str) -> Option<Vec<u8>> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.state().save_state())
    }

    /// Input of every object the local peer is authoritative for.
    pub fn collect_local_input(&mut self, local: PeerId) -> PeerInput {
        let mut out = PeerInput::new();
        for entry in self.entries.iter_mut().filter(|e| e.authority == local) {
            if let Capabilities::StateAndInput(object) = &mut entry.object {
                if let Some(input) = object.collect_local_input() {
                    out.insert(entry.path.clone(), input);
                }
            }
        }
        out
    }

    /// Predicted input of `peer` derived from its previous tick's input.
    /// Objects without input capabilities repeat the previous value.
    pub fn predict_input(&self, peer: PeerId, previous: &PeerInput, ctx: Prediction) -> PeerInput {
        let mut out = PeerInput::new();
        for entry in self.entries.iter().filter(|e| e.authority == peer) {
            let Some(prev) = previous.get(&entry.path) else {
                continue;
            };
            let predicted = match &entry.object {
                Capabilities::StateAndInput(object) => object.predict_input(prev, ctx),
                Capabilities::State(_) => Some(prev.clone()),
            };
            if let Some(input) = predicted {
                out.insert(entry.path.clone(), input);
            }
        }
        out
    }

    /// Dispatch every object's tick with the input its authority provided.
    /// Iterates newest registration first.
    pub fn tick_all(&mut self, delta: f32, frame: &InputFrame) {
        let empty = ObjectInput::default();
        for entry in self.entries.iter_mut().rev() {
            let input = frame
                .player_input(entry.authority)
                .and_then(|p| p.get(&entry.path))
                .unwrap_or(&empty);
            entry.state_mut().tick(delta, input);
        }
    }

    pub fn save_all(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries
            .iter()
            .map(|e| (e.path.clone(), e.state().save_state()))
            .collect()
    }

    pub fn load_all(&mut self, state: &BTreeMap<String, Vec<u8>>) {
        for (path, blob) in state {
            match self.entries.iter_mut().find(|e| &e.path == path) {
                Some(entry) => entry.state_mut().load_state(blob),
                None => warn!(path = %path, "unable to restore state of missing object"),
            }
        }
    }

    pub fn interpolate_all(&mut self, states: &BTreeMap<String, (Vec<u8>, Vec<u8>)>, weight: f32) {
        for entry in &mut self.entries {
            if let Some((from, to)) = states.get(&entry.path) {
                entry.state_mut().interpolate_state(from, to, weight);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_buffer::PlayerInput;

    #[derive(Default)]
    struct Counter {
        value: u8,
        next_input: Option<u8>,
    }

    impl Networkable for Counter {
        fn tick(&mut self, _delta: f32, input: &ObjectInput) {
            self.value = self
                .value
                .wrapping_add(input.data.first().copied().unwrap_or(0));
        }

        fn save_state(&self) -> Vec<u8> {
            vec![self.value]
        }

        fn load_state(&mut self, state: &[u8]) {
            self.value = state[0];
        }
    }

    impl NetworkedInputs for Counter {
        fn collect_local_input(&mut self) -> Option<ObjectInput> {
            self.next_input.map(|v| ObjectInput::new(vec![v]))
        }
    }

    struct Wall;

    impl Networkable for Wall {
        fn tick(&mut self, _delta: f32, _input: &ObjectInput) {}
        fn save_state(&self) -> Vec<u8> {
            vec![0xFF]
        }
        fn load_state(&mut self, _state: &[u8]) {}
    }

    fn registry() -> ObjectRegistry {
        let mut reg = ObjectRegistry::new();
        reg.register_with_inputs(
            "/p1",
            1,
            Counter {
                value: 0,
                next_input: Some(3),
            },
        )
        .unwrap();
        reg.register_with_inputs("/p2", 2, Counter::default()).unwrap();
        reg.register("/wall", 1, Wall).unwrap();
        reg
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let mut reg = registry();
        assert!(matches!(
            reg.register("/wall", 2, Wall),
            Err(SyncError::DuplicateObject(_))
        ));
        assert!(reg.unregister("/wall"));
        assert!(!reg.contains("/wall"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn local_input_only_from_owned_objects() {
        let mut reg = registry();
        let input = reg.collect_local_input(1);
        assert_eq!(input.len(), 1);
        assert_eq!(input.get("/p1").unwrap().data, vec![3]);
        assert!(reg.collect_local_input(2).is_empty());
    }

    #[test]
    fn default_prediction_repeats_until_stale() {
        let reg = registry();
        let mut previous = PeerInput::new();
        previous.insert("/p2", ObjectInput::new(vec![7]));

        let fresh = Prediction {
            ticks_since_real_input: 2,
            staleness_ticks: 5,
        };
        let predicted = reg.predict_input(2, &previous, fresh);
        assert_eq!(predicted.get("/p2").unwrap().data, vec![7]);

        let stale = Prediction {
            ticks_since_real_input: 6,
            staleness_ticks: 5,
        };
        assert!(reg.predict_input(2, &previous, stale).is_empty());
    }

    #[test]
    fn tick_routes_inputs_by_authority_and_save_load_round() {
        let mut reg = registry();
        let mut frame = InputFrame::new(1);
        let mut p1 = PeerInput::new();
        p1.insert("/p1", ObjectInput::new(vec![4]));
        let mut p2 = PeerInput::new();
        p2.insert("/p2", ObjectInput::new(vec![9]));
        // An input for /p2 from the wrong peer is ignored.
        p1.insert("/p2", ObjectInput::new(vec![100]));
        frame.players.insert(1, PlayerInput::real(p1));
        frame.players.insert(2, PlayerInput::real(p2));

        let before = reg.save_all();
        reg.tick_all(1.0 / 60.0, &frame);
        assert_eq!(reg.state_of("/p1"), Some(vec![4]));
        assert_eq!(reg.state_of("/p2"), Some(vec![9]));

        reg.load_all(&before);
        assert_eq!(reg.state_of("/p1"), Some(vec![0]));
        assert_eq!(reg.state_of("/wall"), Some(vec![0xFF]));
    }
}
