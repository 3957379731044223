use crate::{error::ProtoError, header::Header, messages::Message, msg_id::MsgId};

#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub fn new(header: Header, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    pub fn msg_id(&self) -> MsgId {
        self.header.msg_id
    }

    /// Decode the payload as `T`, checking that the header announced `T`.
    pub fn decode<T: Message>(&self) -> Result<T, ProtoError> {
        if self.header.msg_id != T::msg_id() {
            return Err(ProtoError::UnexpectedMsgId {
                expected: T::msg_id(),
                actual: self.header.msg_id,
            });
        }
        Ok(postcard::from_bytes(self.payload)?)
    }
}
