//! Utilities for testing code built on the transport: an in-memory datagram network with
//!  optional packet loss, and a consumer that collects what it receives.

use crate::buffer::MessageReader;
use crate::dispatcher::{ConsumerId, MessageConsumer};
use crate::message::Message;
use crate::send_pipeline::DatagramSocket;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

type DropFilter = Box<dyn FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send>;

/// Delivers datagrams between [MemorySocket]s by address. A drop filter decides which datagrams
///  are lost on the way.
#[derive(Default)]
pub struct MemoryNetwork {
    routes: RwLock<FxHashMap<SocketAddr, mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>>>,
    drop_filter: Mutex<Option<DropFilter>>,
    num_dropped: AtomicUsize,
    num_delivered: AtomicUsize,
}

impl MemoryNetwork {
    pub fn new() -> Arc<MemoryNetwork> {
        Default::default()
    }

    pub fn socket(self: &Arc<Self>, addr: SocketAddr) -> Arc<MemorySocket> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.write().unwrap().insert(addr, sender);
        Arc::new(MemorySocket {
            addr,
            network: self.clone(),
            receiver: tokio::sync::Mutex::new(receiver),
        })
    }

    /// `filter(from, to, datagram)` returns `true` for datagrams that should be dropped
    pub fn set_drop_filter(&self, filter: impl FnMut(SocketAddr, SocketAddr, &[u8]) -> bool + Send + 'static) {
        *self.drop_filter.lock().unwrap() = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.drop_filter.lock().unwrap() = None;
    }

    /// drops the first `n` datagrams sent from `from`
    pub fn drop_first_from(&self, from: SocketAddr, n: usize) {
        let mut remaining = n;
        self.set_drop_filter(move |sender, _, _| {
            if sender == from && remaining > 0 {
                remaining -= 1;
                return true;
            }
            false
        });
    }

    pub fn num_dropped(&self) -> usize {
        self.num_dropped.load(Ordering::Acquire)
    }

    pub fn num_delivered(&self) -> usize {
        self.num_delivered.load(Ordering::Acquire)
    }

    fn transmit(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) {
        if let Some(filter) = self.drop_filter.lock().unwrap().as_mut() {
            if filter(from, to, datagram) {
                trace!("memory network: dropping datagram {:?} -> {:?}", from, to);
                self.num_dropped.fetch_add(1, Ordering::AcqRel);
                return;
            }
        }

        if let Some(route) = self.routes.read().unwrap().get(&to) {
            if route.send((from, datagram.to_vec())).is_ok() {
                self.num_delivered.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

pub struct MemorySocket {
    addr: SocketAddr,
    network: Arc<MemoryNetwork>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
}

#[async_trait]
impl DatagramSocket for MemorySocket {
    async fn send_to(&self, to: SocketAddr, datagram: &[u8]) {
        self.network.transmit(self.addr, to, datagram);
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        match self.receiver.lock().await.recv().await {
            Some((from, datagram)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, from))
            }
            None => Err(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "memory network is gone")),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}


/// Stores all messages it receives, in order
pub struct CollectingConsumer {
    id: ConsumerId,
    messages: Mutex<Vec<Message>>,
    notify: Notify,
}

impl CollectingConsumer {
    pub fn new(id: u64) -> Arc<CollectingConsumer> {
        Arc::new(CollectingConsumer {
            id: ConsumerId(id),
            messages: Default::default(),
            notify: Notify::new(),
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.messages.lock().unwrap().iter()
            .map(|m| m.payload().to_vec())
            .collect()
    }

    /// Waits until at least `n` messages were received, returning `false` if that did not happen
    ///  within `timeout`
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.messages.lock().unwrap().len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl MessageConsumer for CollectingConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    async fn on_message(&self, message: &Message, _reader: MessageReader) {
        self.messages.lock().unwrap().push(message.clone());
        self.notify.notify_waiters();
    }
}

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Builder;

    #[test]
    fn test_memory_network_delivers() {
        let rt = Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let network = MemoryNetwork::new();
            let a = network.socket(test_addr(1));
            let b = network.socket(test_addr(2));

            a.send_to(test_addr(2), &[1, 2, 3]).await;
            let mut buf = [0u8; 10];
            let (len, from) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[1, 2, 3]);
            assert_eq!(from, test_addr(1));
            assert_eq!(network.num_delivered(), 1);
        });
    }

    #[test]
    fn test_drop_first() {
        let rt = Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let network = MemoryNetwork::new();
            let a = network.socket(test_addr(1));
            let b = network.socket(test_addr(2));
            network.drop_first_from(test_addr(1), 2);

            for i in 0..3u8 {
                a.send_to(test_addr(2), &[i]).await;
            }
            b.send_to(test_addr(1), &[9]).await;

            let mut buf = [0u8; 10];
            let (len, _) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[2]);
            assert_eq!(network.num_dropped(), 2);
            assert_eq!(network.num_delivered(), 2);
        });
    }
}
