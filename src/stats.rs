use std::time::Duration;

/// Snapshot of a connection's state, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub smoothed_rtt: Duration,
    pub rtt_deviation: Duration,
    pub rto: Duration,

    pub window_used: usize,
    pub window_capacity: usize,
    /// number of unacknowledged high-priority packets
    pub in_flight: usize,
    pub total_retransmits: u64,

    pub pending_reassemblies: usize,
    pub held_back_ordered: usize,
    /// ordered messages dropped for exceeding the hold-back capacity, see [crate::ordered_channel::OrderedChannel]
    pub dropped_ordered: u64,

    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub heartbeats_sent: u64,
}

/// Datagram and byte counters for one direction of traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounter {
    pub datagrams: u64,
    pub bytes: u64,
}

impl TrafficCounter {
    pub fn record(&mut self, datagrams: usize, bytes: usize) {
        self.datagrams += datagrams as u64;
        self.bytes += bytes as u64;
    }
}
