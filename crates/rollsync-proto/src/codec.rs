use crate::{
    constants::HEADER_LEN,
    error::ProtoError,
    header::Header,
    limits::max_payload_for,
    messages::Message,
    packet::PacketView,
};

/// Encode a message that implements the [`Message`] trait into a packet.
///
/// The header is constructed from the message type's `msg_id()`, and the
/// payload limit is selected based on the message type.
pub fn encode_message<T: Message>(payload: &T) -> Result<Vec<u8>, ProtoError> {
    let msg_id = T::msg_id();
    let payload_bytes = postcard::to_stdvec(payload)?;
    if payload_bytes.len() > max_payload_for(msg_id) {
        return Err(ProtoError::PayloadTooLarge(payload_bytes.len()));
    }

    let header = Header::new(msg_id, payload_bytes.len() as u32);
    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Split a packet into its header and payload, enforcing the size limit of
/// the announced message type.
pub fn decode_packet(packet: &[u8]) -> Result<PacketView<'_>, ProtoError> {
    let (header, payload) = Header::parse(packet)?;
    if payload.len() > max_payload_for(header.msg_id) {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }
    Ok(PacketView::new(header, payload))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::messages::{input::InputTicks, session::StateLog, sync::Pong};
    use crate::msg_id::MsgId;

    #[test]
    fn input_ticks_survive_the_wire() {
        let mut msg = InputTicks::new(12);
        msg.push(14, b"left");
        msg.push(15, b"");

        let bytes = encode_message(&msg).unwrap();
        let view = decode_packet(&bytes).unwrap();
        assert_eq!(view.msg_id(), MsgId::InputTicks);

        let decoded: InputTicks = view.decode().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decoding_as_wrong_type_is_rejected() {
        let bytes = encode_message(&Pong {
            local_time: 1,
            remote_time: 2,
        })
        .unwrap();
        let view = decode_packet(&bytes).unwrap();
        let err = view.decode::<InputTicks>().unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedMsgId { .. }));
    }

    #[test]
    fn oversized_control_payload_is_refused() {
        let mut msg = InputTicks::new(0);
        msg.push(1, &vec![0u8; crate::limits::MAX_CONTROL_PAYLOAD]);
        assert!(matches!(
            encode_message(&msg),
            Err(ProtoError::PayloadTooLarge(_))
        ));

        // The same bytes fit in a state log.
        let mut data = BTreeMap::new();
        data.insert("/root/player".to_string(), vec![0u8; 64 * 1024]);
        assert!(encode_message(&StateLog { tick: 3, data }).is_ok());
    }
}
