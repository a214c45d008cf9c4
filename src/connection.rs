use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::message::Message;
use crate::ordered_channel::OrderedChannel;
use crate::peer::PeerId;
use crate::reassembly::Reassembler;
use crate::reliability::rtt::RttEstimator;
use crate::reliability::ReliabilityManager;
use crate::stats::{ConnectionStats, TrafficCounter};
use crate::wire::fragment::{fragment, is_fragmented};
use crate::wire::packet::{Priority, Sequence, WirePacket};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};


/// What the I/O driver has to do after a received packet was processed
#[derive(Debug, Default)]
pub struct ReceiveOutcome {
    pub ack: Option<WirePacket>,
    /// completed messages, in delivery order
    pub delivered: Vec<Message>,
}

/// What the timer driver has to do for a connection
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub retransmits: Vec<WirePacket>,
    pub heartbeat: Option<WirePacket>,
    /// the peer was silent for longer than the idle timeout, and the connection must be torn down
    pub idle: bool,
}

/// All per-peer protocol state. A connection is mutated by both the receive loop and the timer
///  loop, which serialize their access through a lock around it.
pub struct Connection {
    peer: PeerId,
    addr: SocketAddr,
    next_packet_id: u32,

    reliability: ReliabilityManager,
    reassembler: Reassembler,
    ordered: OrderedChannel,

    idle_timeout: Duration,
    heartbeat_interval: Duration,
    last_received: Instant,
    last_sent: Instant,

    sent: TrafficCounter,
    received: TrafficCounter,
    heartbeats_sent: u64,
    closed: bool,
}

impl Connection {
    pub fn new(peer: PeerId, addr: SocketAddr, config: &TransportConfig, packet_id_seed: u32, now: Instant) -> Connection {
        Connection {
            peer,
            addr,
            next_packet_id: packet_id_seed,
            reliability: ReliabilityManager::new(
                RttEstimator::new(config.initial_rtt, config.rto_min, config.rto_max),
                config.send_window_bytes,
            ),
            reassembler: Reassembler::new(peer, config.history_capacity, config.max_pending_reassemblies, config.reassembly_timeout),
            ordered: OrderedChannel::new(config.hold_back_capacity),
            idle_timeout: config.idle_timeout,
            heartbeat_interval: config.heartbeat_interval,
            last_received: now,
            last_sent: now,
            sent: Default::default(),
            received: Default::default(),
            heartbeats_sent: 0,
            closed: false,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// a fresh nonzero packet id: 0 is reserved for unfragmented best-effort messages
    fn allocate_packet_id(&mut self) -> u32 {
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        let result = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        result
    }

    pub fn next_sequence(&mut self) -> Sequence {
        self.ordered.next_sequence()
    }

    /// Turns an outgoing message into wire packets, registering high-priority packets for
    ///  acknowledgement. A high-priority message is refused as a whole if it does not fit the
    ///  free send window.
    pub fn prepare_send(&mut self, message: &Message, max_fragment_size: usize, now: Instant) -> Result<Vec<WirePacket>, TransportError> {
        if message.priority == Priority::High && message.len() > self.reliability.available_window() {
            debug!("{:?}: send window full - refusing message of {} bytes", self.peer, message.len());
            return Err(TransportError::WindowFull { needed: message.len(), available: self.reliability.available_window() });
        }

        let packet_id = if message.priority == Priority::High || is_fragmented(message.len(), max_fragment_size) {
            self.allocate_packet_id()
        }
        else {
            0
        };

        let mut result = Vec::new();
        for packet in fragment(message, packet_id, max_fragment_size) {
            result.push(self.reliability.send(packet, now)?);
        }
        trace!("{:?}: prepared {:?} as {} packets with id {}", self.peer, message, result.len(), packet_id);
        Ok(result)
    }

    /// Processes one received packet. ACKs update the reliability state; high-priority data is
    ///  acknowledged even if it turns out to be a duplicate, since the duplicate may be a
    ///  retransmission caused by a lost ACK.
    pub fn on_packet(&mut self, packet: WirePacket, now: Instant) -> ReceiveOutcome {
        if self.closed {
            trace!("{:?}: connection is closed - ignoring packet", self.peer);
            return Default::default();
        }
        self.last_received = now;

        if packet.is_ack() {
            if !packet.is_heartbeat() {
                self.reliability.on_ack(packet.packet_id, packet.offset, now);
            }
            return Default::default();
        }

        let ack = if packet.priority == Priority::High {
            Some(WirePacket::ack(packet.packet_id, packet.offset))
        }
        else {
            None
        };

        let delivered = match self.reassembler.accept(packet, now) {
            Some(message) => self.ordered.accept(message),
            None => Vec::new(),
        };

        ReceiveOutcome { ack, delivered }
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.received.record(1, bytes);
    }

    pub fn record_sent(&mut self, datagrams: usize, bytes: usize, now: Instant) {
        if datagrams > 0 {
            self.sent.record(datagrams, bytes);
            self.last_sent = now;
        }
    }

    /// Periodic housekeeping: retransmissions, expiry of best-effort partial messages, idle
    ///  detection and heartbeats
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        if self.closed {
            return Default::default();
        }

        if now.saturating_duration_since(self.last_received) >= self.idle_timeout {
            debug!("{:?}: no traffic for {:?}", self.peer, self.idle_timeout);
            return TickOutcome { idle: true, ..Default::default() };
        }

        let retransmits = self.reliability.tick(now);
        self.reassembler.expire(now);

        let heartbeat = if retransmits.is_empty() && now.saturating_duration_since(self.last_sent) >= self.heartbeat_interval {
            trace!("{:?}: sending heartbeat", self.peer);
            self.heartbeats_sent += 1;
            Some(WirePacket::heartbeat())
        }
        else {
            None
        };

        TickOutcome { retransmits, heartbeat, idle: false }
    }

    /// Discards all state for the peer. Packets arriving afterwards are ignored.
    pub fn teardown(&mut self) {
        debug!("{:?}: tearing down connection", self.peer);
        self.closed = true;
        self.reliability.clear();
        self.reassembler.clear();
        self.ordered.clear();
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            smoothed_rtt: self.reliability.rtt().smoothed(),
            rtt_deviation: self.reliability.rtt().deviation(),
            rto: self.reliability.rtt().rto(),
            window_used: self.reliability.window_used(),
            window_capacity: self.reliability.window_capacity(),
            in_flight: self.reliability.in_flight(),
            total_retransmits: self.reliability.total_retransmits(),
            pending_reassemblies: self.reassembler.pending(),
            held_back_ordered: self.ordered.held_back(),
            dropped_ordered: self.ordered.dropped(),
            datagrams_sent: self.sent.datagrams,
            bytes_sent: self.sent.bytes,
            datagrams_received: self.received.datagrams,
            bytes_received: self.received.bytes,
            heartbeats_sent: self.heartbeats_sent,
        }
    }
}
