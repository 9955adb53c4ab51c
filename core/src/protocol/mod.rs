//! Wire protocol: packet types and the binary codec

mod codec;
pub mod constants;
mod packet;

pub use codec::Codec;
pub use packet::{Packet, PacketType};
