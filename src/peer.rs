use rustc_hash::FxHashMap;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::RwLock;
use tracing::debug;


/// Opaque identifier of a remote peer, assigned by the [PeerRegistry]. The transport never
///  interprets it beyond using it as a map key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(pub u64);

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Maps transport level addresses to peers and back. Deciding whether a new address is admitted
///  at all is the registry's business: `resolve` returning `None` causes the datagram to be
///  dropped.
#[cfg_attr(test, mockall::automock)]
pub trait PeerRegistry: Send + Sync + 'static {
    fn resolve(&self, addr: SocketAddr) -> Option<PeerId>;

    fn address_of(&self, peer: PeerId) -> Option<SocketAddr>;
}


/// A registry that admits every address it sees, handing out consecutive ids. Useful for
///  servers without an authentication step and for tests.
#[derive(Default)]
pub struct AdmitAllPeerRegistry {
    inner: RwLock<AdmitAllInner>,
}

#[derive(Default)]
struct AdmitAllInner {
    next_id: u64,
    by_addr: FxHashMap<SocketAddr, PeerId>,
    by_peer: FxHashMap<PeerId, SocketAddr>,
}

impl AdmitAllPeerRegistry {
    pub fn new() -> AdmitAllPeerRegistry {
        Default::default()
    }

    /// registers an address up front, e.g. the server address on a client
    pub fn register(&self, addr: SocketAddr) -> PeerId {
        let mut inner = self.inner.write().unwrap();
        if let Some(&peer) = inner.by_addr.get(&addr) {
            return peer;
        }

        inner.next_id += 1;
        let peer = PeerId(inner.next_id);
        debug!("admitting {:?} as {:?}", addr, peer);
        inner.by_addr.insert(addr, peer);
        inner.by_peer.insert(peer, addr);
        peer
    }
}

impl PeerRegistry for AdmitAllPeerRegistry {
    fn resolve(&self, addr: SocketAddr) -> Option<PeerId> {
        if let Some(&peer) = self.inner.read().unwrap().by_addr.get(&addr) {
            return Some(peer);
        }
        Some(self.register(addr))
    }

    fn address_of(&self, peer: PeerId) -> Option<SocketAddr> {
        self.inner.read().unwrap().by_peer.get(&peer).cloned()
    }
}
