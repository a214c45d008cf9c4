pub mod datagram;
pub mod fragment;
pub mod packet;

pub use datagram::Datagram;
pub use packet::{Priority, Sequence, WirePacket, MAX_MESSAGE_SIZE};
