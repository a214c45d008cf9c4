use crate::message::Message;
use crate::safe_converter::PrecheckedCast;
use crate::wire::packet::{WirePacket, MAX_MESSAGE_SIZE};
use tracing::trace;

/// Splits a message into wire packets carrying at most `max_fragment_size` payload bytes each.
///  Fragments are contiguous and in offset order, and all of them share `packet_id`. An empty
///  message still yields one (empty) packet so that its type reaches the receiver.
///
/// The caller is responsible for rejecting messages larger than [MAX_MESSAGE_SIZE].
pub fn fragment(message: &Message, packet_id: u32, max_fragment_size: usize) -> Vec<WirePacket> {
    assert!(max_fragment_size > 0);
    assert!(message.len() <= MAX_MESSAGE_SIZE);

    let payload = message.payload();
    let total_size: u16 = payload.len().prechecked_cast();

    if payload.is_empty() {
        return vec![
            WirePacket::data(packet_id, 0, 0, message.priority, message.sequence, message.message_type, payload.clone())
        ];
    }

    let mut result = Vec::with_capacity(payload.len().div_ceil(max_fragment_size));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + max_fragment_size).min(payload.len());
        result.push(WirePacket::data(
            packet_id,
            offset.prechecked_cast(),
            total_size,
            message.priority,
            message.sequence,
            message.message_type,
            payload.slice(offset..end),
        ));
        offset = end;
    }

    trace!("fragmented {:?} into {} packets", message, result.len());
    result
}

/// true if the message has to be split into more than one packet
pub fn is_fragmented(message_len: usize, max_fragment_size: usize) -> bool {
    message_len > max_fragment_size
}
