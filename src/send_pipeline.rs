use crate::buffer::buffer_pool::DatagramBufferPool;
use crate::wire::datagram::batch;
use crate::wire::packet::WirePacket;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for a UDP socket, introduced to facilitate replacing the I/O part for
///  testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Errors are logged rather than returned: a datagram that is not sent is equivalent to one
    ///  that is lost on the way.
    async fn send_to(&self, to: SocketAddr, datagram: &[u8]);

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, to: SocketAddr, datagram: &[u8]) {
        trace!("UDP socket: sending datagram of {} bytes to {:?}", datagram.len(), to);

        if let Err(e) = UdpSocket::send_to(self, datagram, to).await {
            error!("error sending UDP datagram to {:?}: {}", to, e);
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> SocketAddr {
        UdpSocket::local_addr(self)
            .expect("UdpSocket should have an initialized local addr")
    }
}


/// Number of datagrams and bytes that went out for one send call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub datagrams: usize,
    pub bytes: usize,
}

/// Merges wire packets into as few datagrams as possible and sends them
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn DatagramSocket>,
    buffer_pool: Arc<DatagramBufferPool>,
    max_datagram_size: usize,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn DatagramSocket>, buffer_pool: Arc<DatagramBufferPool>, max_datagram_size: usize) -> SendPipeline {
        SendPipeline { socket, buffer_pool, max_datagram_size }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub async fn send_packets(&self, to: SocketAddr, packets: Vec<WirePacket>) -> SendSummary {
        let mut summary = SendSummary::default();
        if packets.is_empty() {
            return summary;
        }

        for datagram in batch(packets, self.max_datagram_size) {
            let mut buf = self.buffer_pool.get_from_pool();
            datagram.encode(&mut buf);
            trace!("sending datagram with {} packets ({} bytes) to {:?}", datagram.packets().len(), buf.len(), to);

            self.socket.send_to(to, &buf).await;
            summary.datagrams += 1;
            summary.bytes += buf.len();

            self.buffer_pool.return_to_pool(buf);
        }
        summary
    }
}
