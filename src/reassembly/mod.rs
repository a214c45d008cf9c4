pub mod history;

use crate::error::ReassemblyError;
use crate::message::Message;
use crate::peer::PeerId;
use crate::reassembly::history::PacketHistory;
use crate::safe_converter::SafeCast;
use crate::wire::packet::{Priority, Sequence, WirePacket};
use bytes::{BufMut, BytesMut};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};


/// Fragments received so far for one packet id
struct PartialMessage {
    total_size: u16,
    priority: Priority,
    sequence: Sequence,
    message_type: Option<u8>,
    /// offset -> fragment payload
    fragments: BTreeMap<u16, bytes::Bytes>,
    received_bytes: usize,
    first_seen: Instant,
}

/// Rebuilds messages from the fragments received from one peer.
///
/// Per packet id, state moves from 'empty' to 'collecting' when the first fragment arrives, and
///  leaves the table when the message is complete, is invalidated by an inconsistent fragment, or
///  times out. Only best-effort partials time out: high-priority fragments are kept until the
///  missing pieces arrive through retransmission or the connection goes away.
pub struct Reassembler {
    peer: PeerId,
    history: PacketHistory,
    partials: FxHashMap<u32, PartialMessage>,
    max_pending: usize,
    reassembly_timeout: Duration,
}

impl Reassembler {
    pub fn new(peer: PeerId, history_capacity: usize, max_pending: usize, reassembly_timeout: Duration) -> Reassembler {
        Reassembler {
            peer,
            history: PacketHistory::new(history_capacity),
            partials: Default::default(),
            max_pending,
            reassembly_timeout,
        }
    }

    /// number of messages currently being collected
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    pub fn is_collecting(&self, packet_id: u32) -> bool {
        self.partials.contains_key(&packet_id)
    }

    /// Handles a received data fragment, returning the completed message if this fragment was the
    ///  last one missing. Duplicates and invalid fragments are logged and yield `None`.
    pub fn accept(&mut self, packet: WirePacket, now: Instant) -> Option<Message> {
        let packet_id = packet.packet_id;
        match self.try_accept(packet, now) {
            Ok(result) => result,
            Err(e) => {
                warn!("{:?}: discarding message with packet id {}: {}", self.peer, packet_id, e);
                None
            }
        }
    }

    fn try_accept(&mut self, packet: WirePacket, now: Instant) -> Result<Option<Message>, ReassemblyError> {
        if packet.is_ack() {
            debug!("ACK passed to reassembly - ignoring");
            return Ok(None);
        }

        // id 0 is only used for single-fragment messages, which need no duplicate tracking
        let tracked = packet.packet_id != 0;
        if tracked && self.history.contains(packet.packet_id, packet.offset) {
            trace!("{:?}: dropping duplicate fragment {}@{}", self.peer, packet.packet_id, packet.offset);
            return Ok(None);
        }

        if packet.offset == 0 && packet.fragment_size == packet.total_size {
            if self.partials.remove(&packet.packet_id).is_some() {
                debug!("{:?}: single-fragment message reuses packet id {} of a partial message - discarding the partial message", self.peer, packet.packet_id);
            }
            if tracked {
                self.history.insert(packet.packet_id, packet.offset);
            }
            return Ok(Some(Message::new(
                self.peer,
                packet.message_type.unwrap_or_default(),
                packet.priority,
                packet.sequence,
                packet.payload,
            )));
        }

        let offset: usize = packet.offset.safe_cast();
        let size: usize = packet.fragment_size.safe_cast();
        let total: usize = packet.total_size.safe_cast();
        if offset + size > total || size == 0 {
            self.invalidate(packet.packet_id);
            return Err(ReassemblyError::FragmentOutOfBounds { offset: packet.offset, size: packet.fragment_size, total: packet.total_size });
        }

        if !self.partials.contains_key(&packet.packet_id) {
            self.make_room();
        }
        let partial = self.partials.entry(packet.packet_id)
            .or_insert_with(|| PartialMessage {
                total_size: packet.total_size,
                priority: packet.priority,
                sequence: packet.sequence,
                message_type: None,
                fragments: Default::default(),
                received_bytes: 0,
                first_seen: now,
            });

        if partial.total_size != packet.total_size {
            let expected = partial.total_size;
            self.invalidate(packet.packet_id);
            return Err(ReassemblyError::TotalSizeMismatch { expected, actual: packet.total_size });
        }

        if partial.fragments.contains_key(&packet.offset) {
            // the history ring forgot this fragment, but the partial message still has it
            trace!("{:?}: fragment {}@{} already stored", self.peer, packet.packet_id, packet.offset);
            return Ok(None);
        }

        if packet.message_type.is_some() {
            partial.message_type = packet.message_type;
        }
        partial.received_bytes += size;
        partial.fragments.insert(packet.offset, packet.payload);
        if tracked {
            self.history.insert(packet.packet_id, packet.offset);
        }

        if partial.received_bytes < total {
            trace!("{:?}: {} of {} bytes received for packet id {}", self.peer, partial.received_bytes, total, packet.packet_id);
            return Ok(None);
        }

        let Some(partial) = self.partials.remove(&packet.packet_id) else {
            return Ok(None);
        };
        let result = self.assemble(partial);
        if result.is_err() {
            self.history.forget(packet.packet_id);
        }
        result.map(Some)
    }

    /// Discards the partial message for a packet id together with its fragments' history
    ///  entries, so that retransmitted fragments can start it over
    fn invalidate(&mut self, packet_id: u32) {
        self.partials.remove(&packet_id);
        self.history.forget(packet_id);
    }

    /// copies the fragments into one contiguous payload, verifying they cover it exactly
    fn assemble(&self, partial: PartialMessage) -> Result<Message, ReassemblyError> {
        let total: usize = partial.total_size.safe_cast();
        let mut payload = BytesMut::with_capacity(total);
        for (&offset, fragment) in &partial.fragments {
            let offset: usize = offset.safe_cast();
            if offset != payload.len() {
                return Err(ReassemblyError::Gap { offset: payload.len() });
            }
            payload.put_slice(fragment);
        }
        if payload.len() != total {
            return Err(ReassemblyError::Gap { offset: payload.len() });
        }

        trace!("{:?}: reassembled {} bytes from {} fragments", self.peer, total, partial.fragments.len());
        Ok(Message::new(
            self.peer,
            partial.message_type.unwrap_or_default(),
            partial.priority,
            partial.sequence,
            payload.freeze(),
        ))
    }

    /// evicts the oldest partial message if the table is full
    fn make_room(&mut self) {
        if self.partials.len() < self.max_pending {
            return;
        }
        let oldest = self.partials.iter()
            .min_by_key(|(_, p)| p.first_seen)
            .map(|(&id, _)| id);
        if let Some(id) = oldest {
            debug!("{:?}: too many pending reassemblies - evicting packet id {}", self.peer, id);
            self.partials.remove(&id);
        }
    }

    /// Drops best-effort partial messages that have been collecting for longer than the
    ///  reassembly timeout
    pub fn expire(&mut self, now: Instant) {
        let timeout = self.reassembly_timeout;
        let peer = self.peer;
        self.partials.retain(|&id, p| {
            let keep = p.priority == Priority::High || now.saturating_duration_since(p.first_seen) < timeout;
            if !keep {
                debug!("{:?}: reassembly of packet id {} timed out", peer, id);
            }
            keep
        });
    }

    /// discards all state, e.g. when the connection is torn down
    pub fn clear(&mut self) {
        self.partials.clear();
        self.history.clear();
    }
}
