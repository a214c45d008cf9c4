use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Bounded record of recently received (packet id, offset) pairs. When full, the oldest entry is
///  forgotten to make room.
pub struct PacketHistory {
    ring: VecDeque<(u32, u16)>,
    lookup: FxHashSet<(u32, u16)>,
    capacity: usize,
}

impl PacketHistory {
    pub fn new(capacity: usize) -> PacketHistory {
        assert!(capacity > 0);
        PacketHistory {
            ring: VecDeque::with_capacity(capacity),
            lookup: Default::default(),
            capacity,
        }
    }

    /// Records the fragment, returning `false` if it was recorded before
    pub fn insert(&mut self, packet_id: u32, offset: u16) -> bool {
        let key = (packet_id, offset);
        if self.lookup.contains(&key) {
            return false;
        }

        if self.ring.len() == self.capacity {
            if let Some(evicted) = self.ring.pop_front() {
                self.lookup.remove(&evicted);
            }
        }
        self.ring.push_back(key);
        self.lookup.insert(key);
        true
    }

    pub fn contains(&self, packet_id: u32, offset: u16) -> bool {
        self.lookup.contains(&(packet_id, offset))
    }

    /// removes all fragments of a packet id, so that retransmissions of them are accepted again
    pub fn forget(&mut self, packet_id: u32) {
        self.ring.retain(|&(id, _)| id != packet_id);
        self.lookup.retain(|&(id, _)| id != packet_id);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.lookup.clear();
    }
}
