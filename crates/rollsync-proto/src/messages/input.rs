use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Tick, error::ProtoError};

/// A batch of local inputs for consecutive or non-consecutive ticks.
///
/// `inputs` maps the decimal tick number to the hex-encoded serialized input
/// of the sender for that tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct InputTicks {
    /// The oldest tick of the receiver's input the sender still needs.
    pub next_tick_requested: Tick,
    pub inputs: BTreeMap<String, String>,
}

impl InputTicks {
    pub fn new(next_tick_requested: Tick) -> Self {
        Self {
            next_tick_requested,
            inputs: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, tick: Tick, payload: &[u8]) {
        self.inputs.insert(tick.to_string(), hex::encode(payload));
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Decode every entry, sorted by ascending tick.
    pub fn decode_ticks(&self) -> Result<Vec<(Tick, Vec<u8>)>, ProtoError> {
        let mut out = Vec::with_capacity(self.inputs.len());
        for (key, value) in &self.inputs {
            let tick: Tick = key
                .parse()
                .map_err(|_| ProtoError::BadTickKey(key.clone()))?;
            out.push((tick, hex::decode(value)?));
        }
        // String keys sort lexically ("10" < "9"), so order numerically here.
        out.sort_by_key(|(tick, _)| *tick);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_orders_ticks_numerically() {
        let mut msg = InputTicks::new(4);
        msg.push(10, &[0xAA]);
        msg.push(9, &[0xBB, 0x01]);
        msg.push(11, &[]);

        let ticks = msg.decode_ticks().unwrap();
        let order: Vec<Tick> = ticks.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![9, 10, 11]);
        assert_eq!(ticks[0].1, vec![0xBB, 0x01]);
        assert!(ticks[2].1.is_empty());
    }

    #[test]
    fn decode_rejects_bad_keys_and_hex() {
        let mut msg = InputTicks::new(1);
        msg.inputs.insert("seven".into(), "00".into());
        assert!(matches!(msg.decode_ticks(), Err(ProtoError::BadTickKey(_))));

        let mut msg = InputTicks::new(1);
        msg.inputs.insert("7".into(), "zz".into());
        assert!(matches!(msg.decode_ticks(), Err(ProtoError::Hex(_))));
    }
}
