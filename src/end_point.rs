use crate::buffer::buffer_pool::DatagramBufferPool;
use crate::buffer::{FieldReader, TypedBuffer};
use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::dispatcher::{ConsumerId, Dispatcher, MessageConsumer, SubscriptionFlags};
use crate::error::TransportError;
use crate::message::Message;
use crate::peer::{PeerId, PeerRegistry};
use crate::send_pipeline::{DatagramSocket, SendPipeline};
use crate::stats::ConnectionStats;
use crate::typed_message::TypedMessage;
use crate::util::random::{PacketIdSource, RngPacketIdSource};
use crate::wire::datagram::Datagram;
use crate::wire::packet::{Priority, Sequence, MAX_MESSAGE_SIZE};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, span, trace, Instrument, Level};

/// EndPoint is the place where all parts of the transport come together: it owns the socket and
///  the per-peer connections, drives them from a receive loop and a timer loop, and has the API
///  for application code to send messages and subscribe to received ones.
pub struct EndPoint {
    config: Arc<TransportConfig>,
    socket: Arc<dyn DatagramSocket>,
    send_pipeline: SendPipeline,
    peers: Arc<dyn PeerRegistry>,
    packet_ids: Arc<dyn PacketIdSource>,
    connections: RwLock<FxHashMap<PeerId, Arc<Mutex<Connection>>>>,
    dispatcher: Arc<Dispatcher>,
    shutdown: AtomicBool,
    datagram_counter: AtomicU64,
}

impl EndPoint {
    /// binds a UDP socket to the configured address
    pub async fn bind(config: TransportConfig, peers: Arc<dyn PeerRegistry>) -> anyhow::Result<Arc<EndPoint>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound socket to {:?}", socket.local_addr()?);

        Ok(Arc::new(Self::new(config, socket, peers, Arc::new(RngPacketIdSource {}))?))
    }

    pub fn new(
        config: TransportConfig,
        socket: Arc<dyn DatagramSocket>,
        peers: Arc<dyn PeerRegistry>,
        packet_ids: Arc<dyn PacketIdSource>,
    ) -> anyhow::Result<EndPoint> {
        config.validate()?;

        let buffer_pool = Arc::new(DatagramBufferPool::new(config.max_datagram_size, config.buffer_pool_size));
        let send_pipeline = SendPipeline::new(socket.clone(), buffer_pool, config.max_datagram_size);

        Ok(EndPoint {
            config: Arc::new(config),
            socket,
            send_pipeline,
            peers,
            packet_ids,
            connections: Default::default(),
            dispatcher: Default::default(),
            shutdown: AtomicBool::new(false),
            datagram_counter: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.send_pipeline.local_addr()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn subscribe(&self, message_type: u8, consumer: Arc<dyn MessageConsumer>, flags: SubscriptionFlags) {
        self.dispatcher.subscribe(message_type, consumer, flags).await
    }

    pub async fn unsubscribe(&self, message_type: u8, consumer: ConsumerId) -> bool {
        self.dispatcher.unsubscribe(message_type, consumer).await
    }

    pub async fn unsubscribe_all(&self, consumer: ConsumerId) -> usize {
        self.dispatcher.unsubscribe_all(consumer).await
    }

    async fn get_or_create_connection(&self, peer: PeerId, addr: SocketAddr, now: Instant) -> Arc<Mutex<Connection>> {
        if let Some(connection) = self.connections.read().await.get(&peer) {
            return connection.clone();
        }

        let mut connections = self.connections.write().await;
        connections.entry(peer)
            .or_insert_with(|| {
                info!("new connection to {:?} at {:?}", peer, addr);
                Arc::new(Mutex::new(Connection::new(peer, addr, &self.config, self.packet_ids.next_u32(), now)))
            })
            .clone()
    }

    /// removes the connection unless it was replaced by a new one in the meantime
    async fn remove_connection(&self, peer: PeerId, connection: &Arc<Mutex<Connection>>) {
        let mut connections = self.connections.write().await;
        if connections.get(&peer).map(|c| Arc::ptr_eq(c, connection)).unwrap_or(false) {
            connections.remove(&peer);
        }
    }

    /// Sends a message to a peer. Sequenced messages are always sent with high priority, since
    ///  a lost message would block its ordered channel for good.
    pub async fn submit(&self, peer: PeerId, message_type: u8, priority: Priority, sequence: Sequence, payload: &[u8]) -> Result<(), TransportError> {
        self.submit_message(Message::new(peer, message_type, priority, sequence, Bytes::copy_from_slice(payload))).await
    }

    /// sends a buffer's content, refusing buffers that overran while they were written
    pub async fn submit_buffer(&self, peer: PeerId, message_type: u8, priority: Priority, sequence: Sequence, buffer: TypedBuffer) -> Result<(), TransportError> {
        if buffer.overrun() {
            debug!("message of type {} to {:?} overran its buffer - not sending", message_type, peer);
            return Err(TransportError::Overrun);
        }
        self.submit_message(Message::from_buffer(peer, message_type, priority, sequence, buffer)).await
    }

    pub async fn send_typed<M: TypedMessage>(&self, peer: PeerId, priority: Priority, sequence: Sequence, message: &M) -> Result<(), TransportError> {
        self.submit_buffer(peer, M::MESSAGE_TYPE, priority, sequence, message.to_buffer()).await
    }

    async fn submit_message(&self, mut message: Message) -> Result<(), TransportError> {
        if message.len() > MAX_MESSAGE_SIZE {
            debug!("message to {:?} has {} bytes, exceeding the maximum message size", message.peer, message.len());
            return Err(TransportError::MessageTooLarge { len: message.len(), max: MAX_MESSAGE_SIZE });
        }

        let Some(addr) = self.peers.address_of(message.peer) else {
            debug!("no address for {:?} - not sending", message.peer);
            return Err(TransportError::UnknownPeer(message.peer));
        };

        if message.sequence.is_ordered() && message.priority == Priority::Low {
            debug!("upgrading ordered message {:?} to high priority", message);
            message.priority = Priority::High;
        }

        let now = Instant::now();
        let connection = self.get_or_create_connection(message.peer, addr, now).await;
        let packets = connection.lock().await
            .prepare_send(&message, self.config.max_fragment_size, now)?;

        let summary = self.send_pipeline.send_packets(addr, packets).await;
        connection.lock().await
            .record_sent(summary.datagrams, summary.bytes, now);
        Ok(())
    }

    /// the sequence number to use for the next ordered message to `peer`
    pub async fn next_sequence(&self, peer: PeerId) -> Result<Sequence, TransportError> {
        let addr = self.peers.address_of(peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let connection = self.get_or_create_connection(peer, addr, Instant::now()).await;
        let result = connection.lock().await.next_sequence();
        Ok(result)
    }

    /// Tears down the connection to `peer`, dropping everything in flight. Returns `false` if
    ///  there was no connection.
    pub async fn disconnect(&self, peer: PeerId) -> bool {
        let Some(connection) = self.connections.write().await.remove(&peer) else {
            return false;
        };
        connection.lock().await.teardown();
        info!("disconnected from {:?}", peer);
        true
    }

    pub async fn connection_stats(&self, peer: PeerId) -> Option<ConnectionStats> {
        let connection = self.connections.read().await.get(&peer)?.clone();
        let stats = connection.lock().await.stats();
        Some(stats)
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Handles one received datagram: ACKs go to the reliability layer, data is acknowledged,
    ///  reassembled and ordered, and completed messages are dispatched.
    pub async fn on_datagram(&self, from: SocketAddr, raw: Bytes) {
        let Some(peer) = self.peers.resolve(from) else {
            debug!("datagram from unknown address {:?} - dropping", from);
            return;
        };

        let datagram_len = raw.len();
        let packets = Datagram::split(raw);
        if packets.is_empty() {
            debug!("no valid packet in datagram from {:?} - dropping", from);
            return;
        }

        let now = Instant::now();
        let connection = self.get_or_create_connection(peer, from, now).await;

        let mut acks = Vec::new();
        let mut delivered = Vec::new();
        {
            let mut connection = connection.lock().await;
            if connection.is_closed() {
                debug!("{:?} was torn down concurrently - dropping datagram", peer);
                return;
            }
            connection.record_received(datagram_len);

            for packet in packets {
                trace!("received {:?} from {:?}", packet, peer);
                let outcome = connection.on_packet(packet, now);
                acks.extend(outcome.ack);
                delivered.extend(outcome.delivered);
            }
        }

        if !acks.is_empty() {
            let summary = self.send_pipeline.send_packets(from, acks).await;
            connection.lock().await
                .record_sent(summary.datagrams, summary.bytes, now);
        }

        for message in delivered {
            if message.overrun() {
                debug!("{:?} is overrun - not delivering", message);
                continue;
            }
            self.dispatcher.deliver(&message).await;
        }
    }

    /// One pass of the timer driver over all connections
    pub async fn tick(&self, now: Instant) {
        let connections: Vec<(PeerId, Arc<Mutex<Connection>>)> = self.connections.read().await
            .iter()
            .map(|(&peer, connection)| (peer, connection.clone()))
            .collect();

        for (peer, connection) in connections {
            let (addr, outcome) = {
                let mut guard = connection.lock().await;
                let outcome = guard.on_tick(now);
                if outcome.idle {
                    guard.teardown();
                }
                (guard.addr(), outcome)
            };

            if outcome.idle {
                self.remove_connection(peer, &connection).await;
                info!("connection to {:?} timed out", peer);
                continue;
            }

            let mut packets = outcome.retransmits;
            packets.extend(outcome.heartbeat);
            if !packets.is_empty() {
                let summary = self.send_pipeline.send_packets(addr, packets).await;
                connection.lock().await
                    .record_sent(summary.datagrams, summary.bytes, now);
            }
        }
    }

    /// The I/O driver: receives datagrams until [EndPoint::shutdown] is called. The receive call
    ///  is bounded by the configured timeout so that a shutdown is noticed promptly.
    pub async fn recv_loop(&self) {
        info!("starting receive loop on {:?}", self.local_addr());

        let mut buf = vec![0u8; self.config.max_datagram_size];
        while !self.shutdown.load(Ordering::Acquire) {
            let (num_read, from) = match timeout(self.config.recv_timeout, self.socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(x)) => x,
                Ok(Err(e)) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = self.datagram_counter.fetch_add(1, Ordering::Relaxed);
            let span = span!(Level::TRACE, "datagram_received", correlation_id);
            self.on_datagram(from, Bytes::copy_from_slice(&buf[..num_read]))
                .instrument(span)
                .await;
        }

        info!("receive loop stopped");
    }

    pub fn spawn_recv_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let end_point = self.clone();
        tokio::spawn(async move {
            end_point.recv_loop().await
        })
    }

    /// The timer driver: retransmissions, expiry, idle detection and heartbeats, every
    ///  `tick_interval` until [EndPoint::shutdown] is called
    pub fn spawn_timer_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let end_point = self.clone();
        tokio::spawn(async move {
            info!("starting timer loop");
            let mut ticks = interval(end_point.config.tick_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !end_point.shutdown.load(Ordering::Acquire) {
                ticks.tick().await;
                end_point.tick(Instant::now()).await;
            }
            info!("timer loop stopped");
        })
    }

    /// stops the receive and timer loops
    pub fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.store(true, Ordering::Release);
    }
}
