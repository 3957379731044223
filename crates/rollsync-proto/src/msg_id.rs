use strum::FromRepr;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum MsgId {
    InputTicks = 1,

    Ping = 10,
    Pong = 11,

    StartSync = 20,
    StopSync = 21,

    StateLog = 30,
}
