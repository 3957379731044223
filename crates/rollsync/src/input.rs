//! Per-object and per-peer input values.

use std::collections::BTreeMap;

use ring::digest::{Context, Digest, SHA256};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Input produced by one simulated object for one tick.
///
/// `data` is the networked payload. `debug` is scratch data that travels with
/// the input but is excluded from the determinism comparison.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectInput {
    pub data: Vec<u8>,
    #[serde(default)]
    pub debug: Vec<u8>,
}

impl ObjectInput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            debug: Vec::new(),
        }
    }

    pub fn with_debug(mut self, debug: impl Into<Vec<u8>>) -> Self {
        self.debug = debug.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.debug.is_empty()
    }
}

/// Everything one peer contributes for one tick, keyed by object path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerInput {
    objects: BTreeMap<String, ObjectInput>,
}

impl PeerInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, input: ObjectInput) {
        self.objects.insert(path.into(), input);
    }

    pub fn get(&self, path: &str) -> Option<&ObjectInput> {
        self.objects.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<ObjectInput> {
        self.objects.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectInput)> {
        self.objects.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialized form placed in the send queue and on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Digest of the canonical form used to decide whether a prediction was right.
    ///
    /// The canonical form is, for every object in path order:
    /// `u32 LE path length, path bytes, u32 LE data length, data bytes`.
    /// `debug` fields are not part of it.
    pub fn digest(&self) -> Digest {
        let mut ctx = Context::new(&SHA256);
        for (path, input) in &self.objects {
            ctx.update(&(path.len() as u32).to_le_bytes());
            ctx.update(path.as_bytes());
            ctx.update(&(input.data.len() as u32).to_le_bytes());
            ctx.update(&input.data);
        }
        ctx.finish()
    }

    /// True if both inputs would drive the simulation identically.
    pub fn same_as(&self, other: &PeerInput) -> bool {
        self.digest().as_ref() == other.digest().as_ref()
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.digest().as_ref()[..6])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(entries: &[(&str, &[u8])]) -> PeerInput {
        let mut out = PeerInput::new();
        for (path, data) in entries {
            out.insert(*path, ObjectInput::new(*data));
        }
        out
    }

    #[test]
    fn debug_fields_do_not_affect_comparison() {
        let a = input(&[("/players/1", b"left")]);
        let mut b = PeerInput::new();
        b.insert(
            "/players/1",
            ObjectInput::new(&b"left"[..]).with_debug(&b"frame-time=16ms"[..]),
        );

        assert_ne!(a, b);
        assert!(a.same_as(&b));
    }

    #[test]
    fn differing_data_or_paths_are_detected() {
        let idle = input(&[("/players/1", b"")]);
        let left = input(&[("/players/1", b"left")]);
        let other_path = input(&[("/players/2", b"")]);

        assert!(!idle.same_as(&left));
        assert!(!idle.same_as(&other_path));
        assert!(!PeerInput::new().same_as(&idle));
    }

    #[test]
    fn canonical_form_is_not_ambiguous_across_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = input(&[("ab", b"c")]);
        let b = input(&[("a", b"bc")]);
        assert!(!a.same_as(&b));
    }

    #[test]
    fn serialized_input_decodes_with_debug_data() {
        let mut original = input(&[("/a", b"1"), ("/b", b"22")]);
        original.insert("/c", ObjectInput::new(&b"3"[..]).with_debug(&b"dbg"[..]));

        let bytes = original.to_bytes().unwrap();
        let decoded = PeerInput::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.fingerprint(), original.fingerprint());
    }
}
