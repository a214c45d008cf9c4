use crate::error::FrameError;
use crate::safe_converter::SafeCast;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{Debug, Formatter};

/// The largest message that can be represented: the total size is a u16 on the wire
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// packet id + offset + fragment size + total size + flags
pub const MIN_HEADER_LEN: usize = 4 + 2 + 2 + 2 + 1;
/// plus the message type, which is only present on a message's first fragment
pub const MAX_HEADER_LEN: usize = MIN_HEADER_LEN + 1;

/// Fragment size value that marks a packet as an acknowledgement
pub const ACK_SENTINEL: u16 = u16::MAX;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct PacketFlags: u8 {
        const HIGH_PRIORITY = 0b0000_0001;
        const RESERVED      = 0b0000_0010;
    }
}

const SEQUENCE_SHIFT: u8 = 2;


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// best effort, fire and forget
    Low,
    /// acknowledged by the receiver, retransmitted until it is
    High,
}

/// The ordered-channel slot of a message: 0 means 'unordered', 1 to 63 are rolling sequence
///  numbers wrapping from 63 back to 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Sequence(u8);

impl Debug for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            write!(f, "seq(-)")
        }
        else {
            write!(f, "seq({})", self.0)
        }
    }
}

impl Sequence {
    pub const UNORDERED: Sequence = Sequence(0);
    pub const FIRST: Sequence = Sequence(1);
    pub const MAX_RAW: u8 = 63;
    /// number of distinct ordered slots
    pub const MODULUS: u8 = 63;

    pub fn new(raw: u8) -> Option<Sequence> {
        if raw <= Self::MAX_RAW {
            Some(Sequence(raw))
        }
        else {
            None
        }
    }

    pub fn to_raw(self) -> u8 {
        self.0
    }

    pub fn is_ordered(self) -> bool {
        self.0 != 0
    }

    /// the slot after this one, skipping the 'unordered' value on wrap-around
    pub fn next(self) -> Sequence {
        if self.0 >= Self::MAX_RAW {
            Self::FIRST
        }
        else {
            Sequence(self.0 + 1)
        }
    }

    /// Number of steps from `self` forward to `other` on the 1..=63 ring. Both must be ordered.
    pub fn distance_to(self, other: Sequence) -> u8 {
        debug_assert!(self.is_ordered() && other.is_ordered());
        (other.0 + Self::MODULUS - self.0) % Self::MODULUS
    }
}


/// One fragment of a message as it travels on the wire, or an acknowledgement.
///
/// `retransmission` is local bookkeeping of the sender and not part of the wire format.
#[derive(Clone, PartialEq, Eq)]
pub struct WirePacket {
    pub packet_id: u32,
    pub offset: u16,
    pub fragment_size: u16,
    pub total_size: u16,
    pub priority: Priority,
    pub sequence: Sequence,
    /// present exactly on the first fragment (offset 0) of data packets
    pub message_type: Option<u8>,
    pub payload: Bytes,
    pub retransmission: bool,
}

impl Debug for WirePacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_ack() {
            return write!(f, "ACK{{id:{}, offs:{}}}", self.packet_id, self.offset);
        }
        write!(f, "WirePacket{{id:{}, offs:{}, size:{}, total:{}, {:?}, {:?}, type:{:?}{}}}",
               self.packet_id, self.offset, self.fragment_size, self.total_size, self.priority, self.sequence, self.message_type,
               if self.retransmission { ", retransmission" } else { "" })
    }
}

impl WirePacket {
    /// A data fragment. The message type is kept only for the first fragment.
    pub fn data(
        packet_id: u32,
        offset: u16,
        total_size: u16,
        priority: Priority,
        sequence: Sequence,
        message_type: u8,
        payload: Bytes,
    ) -> WirePacket {
        let sentinel: usize = ACK_SENTINEL.safe_cast();
        assert!(payload.len() < sentinel, "fragment payload collides with the ACK sentinel");

        WirePacket {
            packet_id,
            offset,
            fragment_size: payload.len() as u16,
            total_size,
            priority,
            sequence,
            message_type: if offset == 0 { Some(message_type) } else { None },
            payload,
            retransmission: false,
        }
    }

    /// Acknowledges the fragment (`packet_id`, `offset`). ACKs are never acknowledged themselves.
    pub fn ack(packet_id: u32, offset: u16) -> WirePacket {
        WirePacket {
            packet_id,
            offset,
            fragment_size: ACK_SENTINEL,
            total_size: 0,
            priority: Priority::Low,
            sequence: Sequence::UNORDERED,
            message_type: None,
            payload: Bytes::new(),
            retransmission: false,
        }
    }

    /// keep-alive frame: an ACK for packet id 0, which never refers to a tracked packet
    pub fn heartbeat() -> WirePacket {
        Self::ack(0, 0)
    }

    pub fn is_ack(&self) -> bool {
        self.fragment_size == ACK_SENTINEL
    }

    pub fn is_heartbeat(&self) -> bool {
        self.is_ack() && self.packet_id == 0
    }

    /// number of payload bytes this packet carries
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn encoded_len(&self) -> usize {
        let type_len = if self.message_type.is_some() { 1 } else { 0 };
        MIN_HEADER_LEN + type_len + self.payload.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = PacketFlags::empty();
        if self.priority == Priority::High {
            flags |= PacketFlags::HIGH_PRIORITY;
        }

        buf.put_u32_le(self.packet_id);
        buf.put_u16_le(self.offset);
        buf.put_u16_le(self.fragment_size);
        buf.put_u16_le(self.total_size);
        buf.put_u8(flags.bits() | (self.sequence.to_raw() << SEQUENCE_SHIFT));
        if let Some(message_type) = self.message_type {
            buf.put_u8(message_type);
        }
        buf.put_slice(&self.payload);
    }

    /// Parses one packet from the start of `buf`, advancing it past the packet. Payload bytes are
    ///  shared with `buf` rather than copied.
    pub fn parse(buf: &mut Bytes) -> Result<WirePacket, FrameError> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(FrameError::HeaderTooShort { needed: MIN_HEADER_LEN, available: buf.len() });
        }

        let mut header = &buf[..MIN_HEADER_LEN];
        let packet_id = header.get_u32_le();
        let offset = header.get_u16_le();
        let fragment_size = header.get_u16_le();
        let total_size = header.get_u16_le();
        let raw_flags = header.get_u8();

        let flags = PacketFlags::from_bits_retain(raw_flags & 0b11);
        if flags.contains(PacketFlags::RESERVED) {
            return Err(FrameError::ReservedFlag(raw_flags));
        }
        let priority = if flags.contains(PacketFlags::HIGH_PRIORITY) { Priority::High } else { Priority::Low };
        let sequence = Sequence(raw_flags >> SEQUENCE_SHIFT);

        if fragment_size == ACK_SENTINEL {
            buf.advance(MIN_HEADER_LEN);
            return Ok(WirePacket {
                packet_id,
                offset,
                fragment_size,
                total_size,
                priority,
                sequence,
                message_type: None,
                payload: Bytes::new(),
                retransmission: false,
            });
        }

        let header_len = if offset == 0 { MAX_HEADER_LEN } else { MIN_HEADER_LEN };
        if buf.len() < header_len {
            return Err(FrameError::HeaderTooShort { needed: header_len, available: buf.len() });
        }
        let declared: usize = fragment_size.safe_cast();
        if declared > buf.len() - header_len {
            return Err(FrameError::FragmentTooLarge { declared, available: buf.len() - header_len });
        }

        let message_type = if offset == 0 { Some(buf[MIN_HEADER_LEN]) } else { None };
        buf.advance(header_len);
        let payload = buf.split_to(declared);

        Ok(WirePacket {
            packet_id,
            offset,
            fragment_size,
            total_size,
            priority,
            sequence,
            message_type,
            payload,
            retransmission: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unordered(0, Sequence::FIRST)]
    #[case::first(1, Sequence(2))]
    #[case::wrap(63, Sequence::FIRST)]
    fn test_sequence_next(#[case] raw: u8, #[case] expected: Sequence) {
        assert_eq!(Sequence::new(raw).unwrap().next(), expected);
    }

    #[rstest]
    #[case::same(5, 5, 0)]
    #[case::ahead(5, 7, 2)]
    #[case::behind(7, 5, 61)]
    #[case::across_wrap(62, 2, 3)]
    fn test_sequence_distance(#[case] from: u8, #[case] to: u8, #[case] expected: u8) {
        assert_eq!(Sequence(from).distance_to(Sequence(to)), expected);
    }

    #[test]
    fn test_sequence_range() {
        assert!(Sequence::new(63).is_some());
        assert!(Sequence::new(64).is_none());
    }

    #[test]
    fn test_encode_first_fragment() {
        let packet = WirePacket::data(0x01020304, 0, 12, Priority::High, Sequence(3), 7, Bytes::from_static(b"hello wo"));

        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(buf.len(), packet.encoded_len());
        assert_eq!(&buf[..], &[
            4,3,2,1,
            0,0,
            8,0,
            12,0,
            0b0000_1101,
            7,
            b'h',b'e',b'l',b'l',b'o',b' ',b'w',b'o',
        ]);
    }

    #[test]
    fn test_encode_continuation_has_no_type() {
        let packet = WirePacket::data(9, 8, 12, Priority::Low, Sequence::UNORDERED, 7, Bytes::from_static(b"rld\0"));

        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(&buf[..], &[9,0,0,0, 8,0, 4,0, 12,0, 0, b'r',b'l',b'd',0]);
        assert_eq!(packet.message_type, None);
    }

    #[test]
    fn test_encode_ack() {
        let mut buf = BytesMut::new();
        WirePacket::ack(5, 16).encode(&mut buf);
        assert_eq!(&buf[..], &[5,0,0,0, 16,0, 0xff,0xff, 0,0, 0]);
        assert_eq!(buf.len(), MIN_HEADER_LEN);
    }

    #[rstest]
    #[case::first(WirePacket::data(77, 0, 3, Priority::High, Sequence(63), 200, Bytes::from_static(&[1,2,3])))]
    #[case::middle(WirePacket::data(77, 10, 30, Priority::Low, Sequence::UNORDERED, 200, Bytes::from_static(&[4,5])))]
    #[case::empty_message(WirePacket::data(0, 0, 0, Priority::Low, Sequence::UNORDERED, 1, Bytes::new()))]
    #[case::ack(WirePacket::ack(123, 456))]
    #[case::heartbeat(WirePacket::heartbeat())]
    fn test_parse_encoded(#[case] packet: WirePacket) {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        buf.put_u8(99);

        let mut raw = buf.freeze();
        let parsed = WirePacket::parse(&mut raw).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(&raw[..], &[99]);
    }

    #[rstest]
    #[case::empty(vec![], FrameError::HeaderTooShort { needed: 11, available: 0 })]
    #[case::short_header(vec![1,0,0,0, 0,0, 1,0, 1], FrameError::HeaderTooShort { needed: 11, available: 9 })]
    #[case::missing_type(vec![1,0,0,0, 0,0, 0,0, 0,0, 0], FrameError::HeaderTooShort { needed: 12, available: 11 })]
    #[case::reserved_flag(vec![1,0,0,0, 0,0, 0,0, 0,0, 2, 5], FrameError::ReservedFlag(2))]
    #[case::fragment_too_large(vec![1,0,0,0, 0,0, 3,0, 3,0, 0, 5, 1,2], FrameError::FragmentTooLarge { declared: 3, available: 2 })]
    fn test_parse_malformed(#[case] raw: Vec<u8>, #[case] expected: FrameError) {
        let mut raw = Bytes::from(raw);
        assert_eq!(WirePacket::parse(&mut raw), Err(expected));
    }

    #[test]
    fn test_parse_leaves_bounds_to_reassembly() {
        // offset 4 + size 2 exceeds the total of 5: the reassembler has to see this to discard
        //  the partial message for the id
        let mut raw = Bytes::from(vec![1,0,0,0, 4,0, 2,0, 5,0, 0, 1,2]);
        let parsed = WirePacket::parse(&mut raw).unwrap();
        assert_eq!((parsed.packet_id, parsed.offset, parsed.fragment_size, parsed.total_size), (1, 4, 2, 5));
        assert!(raw.is_empty());
    }

    #[test]
    fn test_parse_shares_payload() {
        let mut buf = BytesMut::new();
        WirePacket::data(1, 0, 2, Priority::Low, Sequence::UNORDERED, 3, Bytes::from_static(&[8, 9])).encode(&mut buf);
        let mut raw = buf.freeze();
        let parsed = WirePacket::parse(&mut raw).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(&[8, 9]));
        assert!(raw.is_empty());
    }
}
