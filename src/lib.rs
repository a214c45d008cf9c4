//! A message transport over UDP for real-time applications such as multiplayer games. It trades
//!  full reliability for latency: the sender decides per message how much it needs.
//!
//! ## Delivery classes
//!
//! * *low priority* messages are best effort. They are fragmented and reassembled, but a lost
//!   fragment means the whole message is lost, and partial messages expire after a timeout
//! * *high priority* messages are acknowledged per fragment and retransmitted until the ACK
//!   arrives, with a retransmission timeout derived from measured round trip times
//! * *sequenced* messages are delivered in the order they were sent, per peer. They are always
//!   sent with high priority, and a receiver holds back early arrivals until the gap is filled
//!
//! Duplicates (e.g. retransmissions after a lost ACK) are detected by the receiver and delivered
//!  only once. There is no handshake: a connection exists as soon as the first datagram is sent to
//!  or received from a peer, and it is torn down after a configurable idle timeout. Heartbeats
//!  keep quiet connections alive.
//!
//! ## Header
//!
//! Each datagram carries one or more packets, each with a header. All numbers are little endian:
//!
//! ```ascii
//!  0: packet id (u32) - 0 for unfragmented low priority messages, unique per sender otherwise
//!  4: fragment offset (u16) - position of this fragment's payload in the message
//!  6: fragment size (u16) - number of payload bytes, or 0xFFFF for an ACK
//!  8: total message size (u16)
//! 10: flags (u8):
//!     * bit 0: high priority
//!     * bit 1: reserved, must be 0
//!     * bit 2-7: sequence number, 0 for unsequenced messages
//! 11: message type (u8) - only in the first fragment of a message, absent in ACKs
//! ```
//!
//! An ACK echoes the packet id and offset of the fragment it acknowledges. An ACK for id 0 and
//!  offset 0 is a heartbeat.
//!
//! Sequence numbers run from 1 to 63 and then wrap to 1.
//!
//! ## Payload
//!
//! Message payloads are opaque to the transport. [buffer::TypedBuffer] and
//!  [typed_message::TypedMessage] provide a field encoding (little-endian numbers,
//!  NUL terminated strings) for application messages.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod end_point;
pub mod error;
pub mod message;
pub mod ordered_channel;
pub mod peer;
pub mod reassembly;
pub mod reliability;
pub mod safe_converter;
pub mod send_pipeline;
pub mod stats;
pub mod typed_message;
pub mod util;
pub mod wire;

#[cfg(test)]
pub mod test_util;
