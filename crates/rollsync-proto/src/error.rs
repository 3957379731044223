use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("buffer too short")]
    TooShort,
    #[error("payload length mismatch")]
    LengthMismatch,
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("unknown msg id: {0}")]
    UnknownMsgId(u8),
    #[error("unexpected msg id: expected {expected:?}, got {actual:?}")]
    UnexpectedMsgId {
        expected: crate::msg_id::MsgId,
        actual: crate::msg_id::MsgId,
    },
    #[error("invalid tick key: {0:?}")]
    BadTickKey(String),
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("postcard decode error: {0}")]
    Postcard(#[from] postcard::Error),
}
