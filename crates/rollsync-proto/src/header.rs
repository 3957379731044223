use crate::{
    constants::{HEADER_LEN, MAGIC, VERSION},
    error::ProtoError,
    msg_id::MsgId,
};

/// Fixed-size prefix of every packet.
///
/// Layout (little-endian):
///
/// | bytes | field        |
/// |-------|--------------|
/// | 0..2  | `MAGIC`      |
/// | 2     | `VERSION`    |
/// | 3     | message id   |
/// | 4..6  | unused, zero |
/// | 6..10 | payload size |
///
/// The version is not stored: a header that parses always carries the
/// version this build speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_id: MsgId,
    pub payload_len: u32,
}

impl Header {
    pub const LEN: usize = HEADER_LEN;

    pub fn new(msg_id: MsgId, payload_len: u32) -> Self {
        Self {
            msg_id,
            payload_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..2].copy_from_slice(&MAGIC);
        out[2] = VERSION;
        out[3] = self.msg_id as u8;
        out[6..].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Parse `[Header][Payload]`, returning the header and the payload slice.
    ///
    /// The buffer must hold exactly the announced payload, nothing more.
    pub fn parse(packet: &[u8]) -> Result<(Header, &[u8]), ProtoError> {
        let (head, payload) = packet
            .split_first_chunk::<HEADER_LEN>()
            .ok_or(ProtoError::TooShort)?;

        if head[..2] != MAGIC {
            return Err(ProtoError::BadMagic);
        }
        if head[2] != VERSION {
            return Err(ProtoError::UnsupportedVersion(head[2]));
        }
        let msg_id = MsgId::from_repr(head[3]).ok_or(ProtoError::UnknownMsgId(head[3]))?;

        let mut len = [0u8; 4];
        len.copy_from_slice(&head[6..]);
        let payload_len = u32::from_le_bytes(len);
        if payload.len() != payload_len as usize {
            return Err(ProtoError::LengthMismatch);
        }

        Ok((Header::new(msg_id, payload_len), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::Header;
    use crate::constants::{HEADER_LEN, MAGIC, VERSION};
    use crate::error::ProtoError;
    use crate::msg_id::MsgId;

    fn packet(msg_id: MsgId, payload: &[u8]) -> Vec<u8> {
        let mut out = Header::new(msg_id, payload.len() as u32).to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn layout_is_stable() {
        let bytes = Header::new(MsgId::StateLog, 0x3344).to_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..2], &MAGIC);
        assert_eq!(bytes[2], VERSION);
        assert_eq!(bytes[3], MsgId::StateLog as u8);
        assert_eq!(&bytes[4..6], &[0, 0]);
        assert_eq!(&bytes[6..], &[0x44, 0x33, 0, 0]);
    }

    #[test]
    fn payload_must_match_announced_length() {
        let good = packet(MsgId::Ping, &[1, 2, 3]);
        let (header, payload) = Header::parse(&good).unwrap();
        assert_eq!(header, Header::new(MsgId::Ping, 3));
        assert_eq!(payload, &[1, 2, 3]);

        let mut trailing = good.clone();
        trailing.push(9);
        assert!(matches!(
            Header::parse(&trailing),
            Err(ProtoError::LengthMismatch)
        ));
        assert!(matches!(
            Header::parse(&good[..good.len() - 1]),
            Err(ProtoError::LengthMismatch)
        ));
        assert!(matches!(
            Header::parse(&good[..HEADER_LEN - 1]),
            Err(ProtoError::TooShort)
        ));
    }

    #[test]
    fn foreign_packets_are_rejected() {
        let good = packet(MsgId::Ping, &[]);

        let mut other_version = good.clone();
        other_version[2] = 99;
        assert!(matches!(
            Header::parse(&other_version),
            Err(ProtoError::UnsupportedVersion(99))
        ));

        let mut unknown_id = good.clone();
        unknown_id[3] = 0xEE;
        assert!(matches!(
            Header::parse(&unknown_id),
            Err(ProtoError::UnknownMsgId(0xEE))
        ));

        let mut not_ours = good;
        not_ours[0] = b'X';
        assert!(matches!(Header::parse(&not_ours), Err(ProtoError::BadMagic)));
    }
}
