pub mod rtt;

use crate::error::TransportError;
use crate::reliability::rtt::RttEstimator;
use crate::wire::packet::{Priority, WirePacket};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};


/// Bookkeeping for one high-priority packet that was sent but not acknowledged yet
#[derive(Debug, Clone)]
pub struct AckWaitEntry {
    pub packet: WirePacket,
    /// time of the most recent (re)transmission
    pub sent_at: Instant,
    pub rto: Duration,
    pub retransmitted: bool,
    pub retransmit_count: u32,
}

impl AckWaitEntry {
    pub fn deadline(&self) -> Instant {
        self.sent_at + self.rto
    }
}

/// Result of a matched acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub freed_bytes: usize,
    /// `None` if the packet was retransmitted, making the sample ambiguous
    pub rtt_sample: Option<Duration>,
}

/// Acknowledgement tracking, retransmission and send window for one peer.
///
/// In-flight packets live in a map keyed by (packet id, offset). Their retransmission deadlines
///  are additionally kept in a min-heap so that `tick` only touches expired entries. Heap entries
///  are not removed when a packet is acknowledged or rescheduled; stale ones are skipped when
///  they surface.
pub struct ReliabilityManager {
    rtt: RttEstimator,
    wait_set: FxHashMap<(u32, u16), AckWaitEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, u32, u16)>>,
    window_used: usize,
    window_capacity: usize,
    total_retransmits: u64,
}

impl ReliabilityManager {
    pub fn new(rtt: RttEstimator, window_capacity: usize) -> ReliabilityManager {
        ReliabilityManager {
            rtt,
            wait_set: Default::default(),
            deadlines: Default::default(),
            window_used: 0,
            window_capacity,
            total_retransmits: 0,
        }
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn window_used(&self) -> usize {
        self.window_used
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    pub fn available_window(&self) -> usize {
        self.window_capacity - self.window_used
    }

    pub fn in_flight(&self) -> usize {
        self.wait_set.len()
    }

    pub fn total_retransmits(&self) -> u64 {
        self.total_retransmits
    }

    pub fn entry(&self, packet_id: u32, offset: u16) -> Option<&AckWaitEntry> {
        self.wait_set.get(&(packet_id, offset))
    }

    /// Registers a packet that is about to be transmitted, handing it back for transmission.
    ///  Low-priority packets pass through without bookkeeping; high-priority packets are tracked
    ///  until acknowledged, and refused if their payload does not fit the free window.
    pub fn send(&mut self, packet: WirePacket, now: Instant) -> Result<WirePacket, TransportError> {
        if packet.priority == Priority::Low || packet.is_ack() {
            return Ok(packet);
        }

        let needed = packet.payload_len();
        if needed > self.available_window() {
            debug!("send window full: {} bytes needed, {} available", needed, self.available_window());
            return Err(TransportError::WindowFull { needed, available: self.available_window() });
        }

        let key = (packet.packet_id, packet.offset);
        if let Some(previous) = self.wait_set.remove(&key) {
            // a packet id was reused while its previous incarnation is still unacknowledged
            debug!("replacing unacknowledged packet {}@{}", key.0, key.1);
            self.window_used -= previous.packet.payload_len();
        }

        let entry = AckWaitEntry {
            packet: packet.clone(),
            sent_at: now,
            rto: self.rtt.rto(),
            retransmitted: false,
            retransmit_count: 0,
        };
        self.deadlines.push(Reverse((entry.deadline(), key.0, key.1)));
        self.wait_set.insert(key, entry);
        self.window_used += needed;

        trace!("awaiting ACK for {}@{}, window {}/{}", key.0, key.1, self.window_used, self.window_capacity);
        Ok(packet)
    }

    /// Handles an acknowledgement. Unknown (packet id, offset) pairs, e.g. late ACKs for packets
    ///  that were acknowledged before, are ignored.
    pub fn on_ack(&mut self, packet_id: u32, offset: u16, now: Instant) -> Option<AckOutcome> {
        let Some(entry) = self.wait_set.remove(&(packet_id, offset)) else {
            trace!("ACK for {}@{} matches no in-flight packet", packet_id, offset);
            return None;
        };

        let freed_bytes = entry.packet.payload_len();
        self.window_used -= freed_bytes;

        let rtt_sample = if entry.retransmitted {
            None
        }
        else {
            let sample = now.saturating_duration_since(entry.sent_at);
            self.rtt.update(sample);
            Some(sample)
        };

        trace!("ACK for {}@{}: rtt sample {:?}, rto now {:?}", packet_id, offset, rtt_sample, self.rtt.rto());
        Some(AckOutcome { freed_bytes, rtt_sample })
    }

    /// Returns the packets whose retransmission timeout expired, flagged as retransmissions. Each
    ///  of them is rescheduled with a doubled (bounded) timeout.
    pub fn tick(&mut self, now: Instant) -> Vec<WirePacket> {
        let mut result = Vec::new();

        while let Some(&Reverse((deadline, packet_id, offset))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let Some(entry) = self.wait_set.get_mut(&(packet_id, offset)) else {
                continue;
            };
            if entry.deadline() != deadline {
                continue;
            }

            entry.rto = self.rtt.backoff(entry.rto);
            entry.sent_at = now;
            entry.retransmitted = true;
            entry.retransmit_count += 1;
            self.total_retransmits += 1;
            self.deadlines.push(Reverse((entry.deadline(), packet_id, offset)));

            debug!("retransmitting {}@{} (#{}), next timeout {:?}", packet_id, offset, entry.retransmit_count, entry.rto);
            let mut packet = entry.packet.clone();
            packet.retransmission = true;
            result.push(packet);
        }

        result
    }

    /// the earliest pending retransmission deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.wait_set.values()
            .map(|e| e.deadline())
            .min()
    }

    /// gives up on everything in flight, e.g. because the peer is gone
    pub fn clear(&mut self) {
        if !self.wait_set.is_empty() {
            debug!("dropping {} unacknowledged packets", self.wait_set.len());
        }
        self.wait_set.clear();
        self.deadlines.clear();
        self.window_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::packet::Sequence;
    use bytes::Bytes;
    use rstest::rstest;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn manager(window: usize) -> ReliabilityManager {
        // initial RTO: 100 + 4 * 50 = 300ms
        ReliabilityManager::new(RttEstimator::new(ms(100), ms(50), ms(1000)), window)
    }

    fn packet(id: u32, offset: u16, len: usize, priority: Priority) -> WirePacket {
        WirePacket::data(id, offset, 2000, priority, Sequence::UNORDERED, 1, Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn test_low_priority_untracked() {
        let now = Instant::now();
        let mut m = manager(100);
        let p = packet(0, 0, 50, Priority::Low);
        assert_eq!(m.send(p.clone(), now).unwrap(), p);
        assert_eq!(m.in_flight(), 0);
        assert_eq!(m.window_used(), 0);
        assert!(m.tick(now + ms(10_000)).is_empty());
    }

    #[test]
    fn test_ack_clears_wait_set() {
        let now = Instant::now();
        let mut m = manager(1000);
        m.send(packet(1, 0, 100, Priority::High), now).unwrap();
        m.send(packet(1, 100, 30, Priority::High), now).unwrap();
        assert_eq!(m.window_used(), 130);
        assert_eq!(m.in_flight(), 2);
        assert_eq!(m.entry(1, 0).unwrap().rto, ms(300));

        let outcome = m.on_ack(1, 100, now + ms(40)).unwrap();
        assert_eq!(outcome, AckOutcome { freed_bytes: 30, rtt_sample: Some(ms(40)) });
        assert_eq!(m.window_used(), 100);
        assert!(m.entry(1, 100).is_none());
        assert!(m.entry(1, 0).is_some());
        assert_eq!(m.rtt().smoothed(), ms(40));

        assert!(m.on_ack(1, 100, now + ms(50)).is_none());
        assert_eq!(m.window_used(), 100);
    }

    #[test]
    fn test_ack_for_unknown_offset() {
        let now = Instant::now();
        let mut m = manager(1000);
        m.send(packet(1, 0, 100, Priority::High), now).unwrap();
        assert!(m.on_ack(1, 1, now).is_none());
        assert!(m.on_ack(2, 0, now).is_none());
        assert_eq!(m.in_flight(), 1);
    }

    #[rstest]
    #[case::fits(100, 100, true)]
    #[case::too_big(100, 101, false)]
    fn test_window(#[case] window: usize, #[case] len: usize, #[case] accepted: bool) {
        let now = Instant::now();
        let mut m = manager(window);
        let result = m.send(packet(1, 0, len, Priority::High), now);
        assert_eq!(result.is_ok(), accepted);
        if !accepted {
            assert_eq!(result.unwrap_err(), TransportError::WindowFull { needed: len, available: window });
            assert_eq!(m.in_flight(), 0);
        }
    }

    #[test]
    fn test_window_frees_on_ack() {
        let now = Instant::now();
        let mut m = manager(100);
        m.send(packet(1, 0, 80, Priority::High), now).unwrap();
        assert!(m.send(packet(2, 0, 80, Priority::High), now).is_err());

        m.on_ack(1, 0, now + ms(10));
        assert!(m.send(packet(2, 0, 80, Priority::High), now).is_ok());
    }

    #[test]
    fn test_retransmission_progress() {
        let start = Instant::now();
        let mut m = manager(1000);
        m.send(packet(7, 16, 10, Priority::High), start).unwrap();

        assert!(m.tick(start + ms(299)).is_empty());

        let mut now = start;
        let mut expected_rto = ms(300);
        for n in 1..=5u32 {
            now += expected_rto;
            let retransmitted = m.tick(now);
            assert_eq!(retransmitted.len(), 1);
            assert_eq!(retransmitted[0].packet_id, 7);
            assert_eq!(retransmitted[0].offset, 16);
            assert!(retransmitted[0].retransmission);

            expected_rto = (expected_rto * 2).min(ms(1000));
            let entry = m.entry(7, 16).unwrap();
            assert_eq!(entry.retransmit_count, n);
            assert!(entry.retransmitted);
            assert_eq!(entry.rto, expected_rto);

            // nothing else is due right after the retransmission
            assert!(m.tick(now).is_empty());
        }
        assert_eq!(m.total_retransmits(), 5);
        assert_eq!(m.entry(7, 16).unwrap().rto, ms(1000));
    }

    #[test]
    fn test_ack_after_retransmission_takes_no_sample() {
        let start = Instant::now();
        let mut m = manager(1000);
        m.send(packet(7, 0, 10, Priority::High), start).unwrap();
        m.tick(start + ms(300));

        let outcome = m.on_ack(7, 0, start + ms(320)).unwrap();
        assert_eq!(outcome.rtt_sample, None);
        assert_eq!(m.rtt().smoothed(), ms(100));
        assert_eq!(m.in_flight(), 0);
        assert_eq!(m.window_used(), 0);

        // the stale heap entry is skipped
        assert!(m.tick(start + ms(10_000)).is_empty());
    }

    #[test]
    fn test_tick_only_expired() {
        let start = Instant::now();
        let mut m = manager(1000);
        m.send(packet(1, 0, 10, Priority::High), start).unwrap();
        m.send(packet(2, 0, 10, Priority::High), start + ms(100)).unwrap();
        assert_eq!(m.next_deadline(), Some(start + ms(300)));

        let retransmitted = m.tick(start + ms(350));
        assert_eq!(retransmitted.iter().map(|p| p.packet_id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(m.next_deadline(), Some(start + ms(400)));
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut m = manager(1000);
        m.send(packet(1, 0, 10, Priority::High), now).unwrap();
        m.clear();
        assert_eq!(m.in_flight(), 0);
        assert_eq!(m.window_used(), 0);
        assert!(m.tick(now + ms(10_000)).is_empty());
    }
}
