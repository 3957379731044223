use crate::msg_id::MsgId;
use serde::de::DeserializeOwned;

pub mod input;
pub mod session;
pub mod sync;

/// A trait for all rollsync protocol messages.
///
/// Each message type implements this trait to declare its associated `MsgId`,
/// enabling automatic header construction during encoding.
pub trait Message: serde::Serialize + DeserializeOwned + Send + 'static {
    /// Returns the message identifier for this message type.
    fn msg_id() -> MsgId;
}

macro_rules! impl_message {
    ($($ty:ty => $id:ident),* $(,)?) => {
        $(
            impl Message for $ty {
                fn msg_id() -> MsgId {
                    MsgId::$id
                }
            }
        )*
    };
}

impl_message! {
    input::InputTicks => InputTicks,
    sync::Ping => Ping,
    sync::Pong => Pong,
    session::StartSync => StartSync,
    session::StopSync => StopSync,
    session::StateLog => StateLog,
}
