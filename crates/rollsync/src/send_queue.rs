//! Outbound local input awaiting acknowledgment, and message batching.

use std::collections::VecDeque;

use rollsync_proto::messages::input::InputTicks;

use crate::Tick;

/// Serialized local inputs, one entry per generated tick, oldest first.
#[derive(Debug)]
pub struct InputSendQueue {
    entries: VecDeque<Vec<u8>>,
    start_tick: Tick,
}

impl Default for InputSendQueue {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InputSendQueue {
    pub fn new(start_tick: Tick) -> Self {
        Self {
            entries: VecDeque::new(),
            start_tick,
        }
    }

    pub fn start_tick(&self) -> Tick {
        self.start_tick
    }

    /// Tick the next pushed entry will get.
    pub fn next_tick(&self) -> Tick {
        self.start_tick + self.entries.len() as Tick
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the serialized input of the newest tick and return that tick.
    pub fn push(&mut self, payload: Vec<u8>) -> Tick {
        let tick = self.next_tick();
        self.entries.push_back(payload);
        tick
    }

    pub fn get(&self, tick: Tick) -> Option<&[u8]> {
        if tick < self.start_tick {
            return None;
        }
        self.entries
            .get((tick - self.start_tick) as usize)
            .map(Vec::as_slice)
    }

    /// Drop every entry below `floor`, the minimum tick any peer still requests.
    pub fn retire_acknowledged(&mut self, floor: Tick) {
        while self.start_tick < floor && self.entries.pop_front().is_some() {
            self.start_tick += 1;
        }
    }

    fn messages_in_range(
        &self,
        first_index: usize,
        last_index: usize,
        reverse: bool,
        frames_per_message: usize,
        next_tick_requested: Tick,
        out: &mut Vec<InputTicks>,
    ) {
        if first_index > last_index || last_index >= self.entries.len() {
            return;
        }
        let indexes: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((first_index..=last_index).rev())
        } else {
            Box::new(first_index..=last_index)
        };

        let mut msg = InputTicks::new(next_tick_requested);
        for index in indexes {
            msg.push(self.start_tick + index as Tick, &self.entries[index]);
            if msg.len() == frames_per_message {
                out.push(std::mem::replace(
                    &mut msg,
                    InputTicks::new(next_tick_requested),
                ));
            }
        }
        if !msg.is_empty() {
            out.push(msg);
        }
    }

    /// Build the messages for a peer whose acknowledgment cursor is
    /// `from_tick`. `next_tick_requested` is our own cursor for that peer.
    ///
    /// When more ticks are outstanding than `frames_per_message *
    /// max_messages` the newest ones are always sent, plus the oldest
    /// unacknowledged ones; the middle range waits for a later cycle.
    pub fn messages_for(
        &self,
        from_tick: Tick,
        next_tick_requested: Tick,
        frames_per_message: usize,
        max_messages: usize,
    ) -> Vec<InputTicks> {
        let mut out = Vec::new();
        if self.entries.is_empty() {
            return out;
        }
        let first_index = (from_tick - self.start_tick).max(0) as usize;
        let last_index = self.entries.len() - 1;
        if first_index > last_index {
            return out;
        }

        let max_ticks = frames_per_message * max_messages;
        if last_index + 1 - first_index <= max_ticks {
            self.messages_in_range(
                first_index,
                last_index,
                true,
                frames_per_message,
                next_tick_requested,
                &mut out,
            );
            return out;
        }

        let new_messages = max_messages.div_ceil(2);
        let old_messages = max_messages / 2;

        self.messages_in_range(
            last_index + 1 - new_messages * frames_per_message,
            last_index,
            true,
            frames_per_message,
            next_tick_requested,
            &mut out,
        );
        if old_messages > 0 {
            self.messages_in_range(
                first_index,
                first_index + old_messages * frames_per_message - 1,
                false,
                frames_per_message,
                next_tick_requested,
                &mut out,
            );
        }
        out
    }

    pub fn clear(&mut self, start_tick: Tick) {
        self.entries.clear();
        self.start_tick = start_tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(ticks: std::ops::RangeInclusive<Tick>) -> InputSendQueue {
        let mut q = InputSendQueue::new(*ticks.start());
        for tick in ticks {
            assert_eq!(q.push(vec![tick as u8]), tick);
        }
        q
    }

    fn ticks_of(messages: &[InputTicks]) -> Vec<Vec<Tick>> {
        messages
            .iter()
            .map(|m| {
                m.decode_ticks()
                    .unwrap()
                    .into_iter()
                    .map(|(t, _)| t)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn small_backlog_is_sent_whole() {
        let q = queue_with(1..=7);
        let messages = q.messages_for(1, 4, 5, 2);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.next_tick_requested == 4));

        let mut all: Vec<Tick> = ticks_of(&messages).concat();
        all.sort();
        assert_eq!(all, (1..=7).collect::<Vec<_>>());
        // The first message holds the newest ticks.
        assert_eq!(ticks_of(&messages)[0], vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn large_backlog_keeps_newest_and_oldest() {
        let q = queue_with(1..=40);
        let messages = q.messages_for(1, 1, 5, 2);
        let ticks = ticks_of(&messages);
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0], vec![36, 37, 38, 39, 40]);
        assert_eq!(ticks[1], vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn large_backlog_with_single_message_sends_only_newest() {
        let q = queue_with(1..=20);
        let ticks = ticks_of(&q.messages_for(3, 1, 4, 1));
        assert_eq!(ticks, vec![vec![17, 18, 19, 20]]);
    }

    #[test]
    fn acknowledged_ticks_are_not_resent() {
        let mut q = queue_with(1..=6);
        q.retire_acknowledged(5);
        assert_eq!(q.start_tick(), 5);
        assert_eq!(q.len(), 2);
        assert!(q.get(4).is_none());
        assert_eq!(q.get(6), Some(&[6u8][..]));

        let ticks = ticks_of(&q.messages_for(6, 1, 5, 2));
        assert_eq!(ticks, vec![vec![6]]);
        assert!(q.messages_for(7, 1, 5, 2).is_empty());
    }

    #[test]
    fn retire_never_passes_the_newest_tick() {
        let mut q = queue_with(1..=3);
        q.retire_acknowledged(100);
        assert!(q.is_empty());
        assert_eq!(q.start_tick(), 4);
        assert_eq!(q.next_tick(), 4);
    }
}
