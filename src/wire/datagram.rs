use crate::wire::packet::WirePacket;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

/// One or more wire packets that travel in a single UDP datagram. Packets are simply concatenated,
///  each one's header giving its length.
#[derive(Debug, Clone)]
pub struct Datagram {
    packets: Vec<WirePacket>,
    encoded_len: usize,
}

impl Datagram {
    pub fn new(first: WirePacket) -> Datagram {
        let encoded_len = first.encoded_len();
        Datagram {
            packets: vec![first],
            encoded_len,
        }
    }

    pub fn packets(&self) -> &[WirePacket] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<WirePacket> {
        self.packets
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    fn contains_retransmission(&self) -> bool {
        self.packets.iter().any(|p| p.retransmission)
    }

    fn contains_unsequenced(&self) -> bool {
        self.packets.iter().any(|p| !p.sequence.is_ordered())
    }

    /// Appends `packet` if the combined encoding fits into `max_datagram_size`. Retransmissions
    ///  always travel on their own, so they are neither merged into a datagram nor is anything
    ///  merged into theirs. The packet is handed back if it was not merged.
    pub fn try_merge(&mut self, packet: WirePacket, max_datagram_size: usize) -> Result<(), WirePacket> {
        if packet.retransmission || self.contains_retransmission() {
            return Err(packet);
        }
        if self.encoded_len + packet.encoded_len() > max_datagram_size {
            return Err(packet);
        }

        self.encoded_len += packet.encoded_len();
        self.packets.push(packet);
        Ok(())
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for p in &self.packets {
            p.encode(buf);
        }
    }

    /// Parses all packets in a received datagram. Parsing stops at the first malformed packet:
    ///  everything before it is returned, the rest is dropped since packet boundaries cannot be
    ///  known after it.
    pub fn split(mut raw: Bytes) -> Vec<WirePacket> {
        let mut result = Vec::new();
        while !raw.is_empty() {
            match WirePacket::parse(&mut raw) {
                Ok(p) => result.push(p),
                Err(e) => {
                    debug!("dropping malformed packet and the rest of its datagram ({} bytes): {}", raw.len(), e);
                    break;
                }
            }
        }
        result
    }
}

/// Groups packets into as few datagrams as possible, preserving their order.
///
/// A sequenced packet following unsequenced ones starts a new datagram so that ordered traffic
///  is not held back behind best-effort traffic.
pub fn batch(packets: impl IntoIterator<Item = WirePacket>, max_datagram_size: usize) -> Vec<Datagram> {
    let mut result = Vec::new();
    let mut current: Option<Datagram> = None;

    for packet in packets {
        let Some(mut datagram) = current.take() else {
            current = Some(Datagram::new(packet));
            continue;
        };

        if packet.sequence.is_ordered() && datagram.contains_unsequenced() {
            trace!("sequenced packet after unsequenced packets: flushing datagram");
            result.push(datagram);
            current = Some(Datagram::new(packet));
            continue;
        }

        match datagram.try_merge(packet, max_datagram_size) {
            Ok(()) => current = Some(datagram),
            Err(packet) => {
                result.push(datagram);
                current = Some(Datagram::new(packet));
            }
        }
    }

    if let Some(datagram) = current {
        result.push(datagram);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::packet::{Priority, Sequence, MAX_HEADER_LEN, MIN_HEADER_LEN};
    use rstest::rstest;

    fn data(id: u32, len: usize, sequence: u8) -> WirePacket {
        WirePacket::data(id, 0, len as u16, Priority::Low, Sequence::new(sequence).unwrap(), 1, Bytes::from(vec![7u8; len]))
    }

    fn retransmitted(mut p: WirePacket) -> WirePacket {
        p.retransmission = true;
        p
    }

    #[test]
    fn test_merge_fits() {
        let mut d = Datagram::new(data(1, 10, 0));
        assert!(d.try_merge(WirePacket::ack(4, 0), 100).is_ok());
        assert!(d.try_merge(data(2, 10, 0), 100).is_ok());
        assert_eq!(d.packets().len(), 3);
        assert_eq!(d.encoded_len(), 2 * (MAX_HEADER_LEN + 10) + MIN_HEADER_LEN);

        let mut buf = BytesMut::new();
        d.encode(&mut buf);
        assert_eq!(buf.len(), d.encoded_len());
    }

    #[rstest]
    #[case::exact(2 * (MAX_HEADER_LEN + 10), true)]
    #[case::one_short(2 * (MAX_HEADER_LEN + 10) - 1, false)]
    fn test_merge_size_limit(#[case] max_datagram_size: usize, #[case] expected: bool) {
        let mut d = Datagram::new(data(1, 10, 0));
        assert_eq!(d.try_merge(data(2, 10, 0), max_datagram_size).is_ok(), expected);
    }

    #[rstest]
    #[case::retransmission_into(data(1, 1, 0), retransmitted(data(2, 1, 0)))]
    #[case::into_retransmission(retransmitted(data(1, 1, 0)), data(2, 1, 0))]
    fn test_retransmission_never_merged(#[case] first: WirePacket, #[case] second: WirePacket) {
        let mut d = Datagram::new(first);
        let rejected = d.try_merge(second.clone(), 1000).unwrap_err();
        assert_eq!(rejected, second);
        assert_eq!(d.packets().len(), 1);
    }

    #[test]
    fn test_split_merged() {
        let mut d = Datagram::new(data(1, 3, 0));
        d.try_merge(WirePacket::ack(9, 16), 1000).unwrap();
        d.try_merge(WirePacket::data(2, 5, 8, Priority::High, Sequence::UNORDERED, 1, Bytes::from_static(b"abc")), 1000).unwrap();

        let mut buf = BytesMut::new();
        d.encode(&mut buf);
        let packets = Datagram::split(buf.freeze());
        assert_eq!(packets, d.into_packets());
    }

    #[test]
    fn test_split_stops_at_malformed() {
        let mut buf = BytesMut::new();
        data(1, 3, 0).encode(&mut buf);
        WirePacket::ack(2, 0).encode(&mut buf);
        // reserved flag bit set
        buf.extend_from_slice(&[1,0,0,0, 0,0, 0,0, 0,0, 2, 5]);
        data(3, 3, 0).encode(&mut buf);

        let packets = Datagram::split(buf.freeze());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].packet_id, 1);
        assert!(packets[1].is_ack());
    }

    #[test]
    fn test_split_empty() {
        assert!(Datagram::split(Bytes::new()).is_empty());
    }

    #[test]
    fn test_batch_merges_in_order() {
        let datagrams = batch(vec![data(1, 10, 0), data(2, 10, 0), data(3, 10, 0)], 2 * (MAX_HEADER_LEN + 10));
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].packets().iter().map(|p| p.packet_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(datagrams[1].packets().iter().map(|p| p.packet_id).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_batch_sequenced_after_unsequenced() {
        let datagrams = batch(vec![data(1, 1, 0), data(2, 1, 3), data(3, 1, 4), data(4, 1, 0)], 1000);
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].packets().len(), 1);
        assert_eq!(datagrams[1].packets().iter().map(|p| p.packet_id).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_batch_retransmissions_separate() {
        let datagrams = batch(vec![retransmitted(data(1, 1, 0)), retransmitted(data(2, 1, 0)), data(3, 1, 0)], 1000);
        assert_eq!(datagrams.len(), 3);
    }

    #[test]
    fn test_batch_empty() {
        assert!(batch(Vec::new(), 1000).is_empty());
    }
}
