//! Message size limits for the rollsync protocol.

use crate::msg_id::MsgId;

/// Maximum payload size for control messages (input batches, ping/pong,
/// start/stop), in bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 16 * 1024;

/// Maximum payload size for state snapshots forwarded for desync checks.
pub const MAX_DATA_PAYLOAD: usize = 1024 * 1024;

/// Returns `true` if the message may carry a full simulation snapshot.
#[inline]
pub const fn is_data_message(msg_id: MsgId) -> bool {
    matches!(msg_id, MsgId::StateLog)
}

/// Returns the maximum payload size allowed for the given message ID.
#[inline]
pub const fn max_payload_for(msg_id: MsgId) -> usize {
    if is_data_message(msg_id) {
        MAX_DATA_PAYLOAD
    } else {
        MAX_CONTROL_PAYLOAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_log_uses_large_limit() {
        assert!(is_data_message(MsgId::StateLog));
        assert_eq!(max_payload_for(MsgId::StateLog), MAX_DATA_PAYLOAD);
    }

    #[test]
    fn control_messages_use_small_limit() {
        assert!(!is_data_message(MsgId::InputTicks));
        assert!(!is_data_message(MsgId::Ping));
        assert_eq!(max_payload_for(MsgId::Pong), MAX_CONTROL_PAYLOAD);
    }
}
