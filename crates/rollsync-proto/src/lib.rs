//! Wire protocol for the rollsync engine.
//!
//! Every packet is `[Header][postcard payload]`. The header carries a magic,
//! an explicit protocol version and the message id, so peers running an
//! incompatible build reject packets instead of misreading them.

pub mod codec;
pub mod constants;
pub mod error;
pub mod header;
pub mod limits;
pub mod messages;
pub mod msg_id;
pub mod packet;

pub use codec::{decode_packet, encode_message};
pub use error::ProtoError;
pub use messages::Message;
pub use msg_id::MsgId;
pub use packet::PacketView;

/// Tick number as carried on the wire.
pub type Tick = i32;
