use crate::wire::packet::{Sequence, MAX_HEADER_LEN, MAX_MESSAGE_SIZE};
use anyhow::bail;
use std::net::SocketAddr;
use std::time::Duration;

pub struct TransportConfig {
    pub self_addr: SocketAddr,

    /// This is the UDP payload size the transport assumes, i.e. the maximum size of a datagram
    ///  it sends. Datagrams exceeding the path MTU are fragmented by IP or dropped, so this must
    ///  be supported by all network routes between the peers.
    ///
    /// With full Ethernet frames and no optional IP headers, this is `1500 - 20 - 8 = 1472` for
    ///  IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    pub max_datagram_size: usize,

    /// Payload bytes per wire packet. Bigger messages are split into fragments of this size. Must
    ///  leave room for the packet header inside a datagram.
    pub max_fragment_size: usize,

    /// Maximum number of *bytes* of high-priority payload in flight (unacknowledged) per peer.
    ///  Must be at least the maximum message size, otherwise some messages could never be sent.
    pub send_window_bytes: usize,

    /// RTT assumed before the first sample
    pub initial_rtt: Duration,
    pub rto_min: Duration,
    pub rto_max: Duration,

    /// A connection without received traffic for this long is torn down
    pub idle_timeout: Duration,
    /// A heartbeat is sent to peers that were sent nothing for this long, keeping the connection
    ///  alive on their side
    pub heartbeat_interval: Duration,
    /// interval of the timer driver (retransmission, expiry, idle checks)
    pub tick_interval: Duration,
    /// upper bound for a single blocking receive call
    pub recv_timeout: Duration,
    /// Best-effort partial messages are discarded after this time
    pub reassembly_timeout: Duration,

    /// number of (packet id, offset) pairs remembered per peer for duplicate detection
    pub history_capacity: usize,
    pub max_pending_reassemblies: usize,
    /// number of sequence slots beyond the expected one for which ordered messages are held back
    pub hold_back_capacity: u8,

    /// This is the number of buffers that will be pooled at a given time - buffers in excess of this
    ///  number are discarded when they are returned.
    pub buffer_pool_size: usize,
}

impl TransportConfig {
    /// defaults for IPV4 with end-to-end full Ethernet MTU, without optional headers
    pub fn default_ipv4(self_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            self_addr,
            max_datagram_size: 1472,
            max_fragment_size: 1472 - MAX_HEADER_LEN,
            send_window_bytes: 64 * 1024,
            initial_rtt: Duration::from_millis(200),
            rto_min: Duration::from_millis(100),
            rto_max: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            tick_interval: Duration::from_millis(20),
            recv_timeout: Duration::from_millis(20),
            reassembly_timeout: Duration::from_secs(5),
            history_capacity: 256,
            max_pending_reassemblies: 128,
            hold_back_capacity: 16,
            buffer_pool_size: 64,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_size < 64 || self.max_datagram_size > 65507 {
            bail!("max datagram size must be between 64 and 65507, is {}", self.max_datagram_size);
        }
        if self.max_fragment_size == 0 || self.max_fragment_size + MAX_HEADER_LEN > self.max_datagram_size {
            bail!("max fragment size {} plus header ({} bytes) must fit into a datagram of {} bytes", self.max_fragment_size, MAX_HEADER_LEN, self.max_datagram_size);
        }
        if self.send_window_bytes < MAX_MESSAGE_SIZE {
            bail!("send window of {} bytes is smaller than the maximum message size {}", self.send_window_bytes, MAX_MESSAGE_SIZE);
        }
        if self.rto_min > self.initial_rtt || self.initial_rtt > self.rto_max {
            bail!("initial RTT {:?} must be between RTO min {:?} and RTO max {:?}", self.initial_rtt, self.rto_min, self.rto_max);
        }
        if self.rto_min.is_zero() {
            bail!("RTO min must be positive");
        }
        if self.hold_back_capacity == 0 || self.hold_back_capacity > Sequence::MODULUS / 2 {
            bail!("hold-back capacity must be between 1 and {}, is {}", Sequence::MODULUS / 2, self.hold_back_capacity);
        }
        if self.history_capacity == 0 || self.max_pending_reassemblies == 0 {
            bail!("history capacity and max pending reassemblies must be positive");
        }
        if self.idle_timeout.is_zero() || self.heartbeat_interval.is_zero() || self.tick_interval.is_zero() || self.recv_timeout.is_zero() {
            bail!("timeouts and intervals must be positive");
        }
        if self.heartbeat_interval >= self.idle_timeout {
            bail!("heartbeat interval {:?} must be shorter than the idle timeout {:?}", self.heartbeat_interval, self.idle_timeout);
        }

        Ok(())
    }
}
