use crate::message::Message;
use crate::wire::packet::Sequence;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Strict FIFO delivery for the sequenced subset of one peer's messages.
///
/// Sequence numbers roll over from 63 to 1, so 'ahead of' and 'behind' are decided by distance
///  on the ring: a message at most half the ring ahead of the expected one is held back until
///  the gap closes, anything else is a stale retransmission. Only `hold_back_capacity` slots
///  ahead of the expected sequence are buffered; a message beyond that cannot be ordered and is
///  dropped.
///
/// NB: The dropped message was acknowledged on arrival, so it is not retransmitted. Once the gap
///  closes, the channel waits for it forever, and all later ordered messages from the peer stay
///  held back or are dropped until the connection is torn down. [OrderedChannel::dropped] counts
///  these losses.
pub struct OrderedChannel {
    last_outbound: Sequence,
    expected: Sequence,
    held_back: BTreeMap<u8, Message>,
    hold_back_capacity: u8,
    dropped: u64,
}

impl OrderedChannel {
    pub fn new(hold_back_capacity: u8) -> OrderedChannel {
        assert!(hold_back_capacity > 0 && hold_back_capacity <= Sequence::MODULUS / 2);
        OrderedChannel {
            last_outbound: Sequence::UNORDERED,
            expected: Sequence::FIRST,
            held_back: Default::default(),
            hold_back_capacity,
            dropped: 0,
        }
    }

    /// the sequence number for the next outgoing ordered message
    pub fn next_sequence(&mut self) -> Sequence {
        self.last_outbound = self.last_outbound.next();
        self.last_outbound
    }

    pub fn expected(&self) -> Sequence {
        self.expected
    }

    pub fn held_back(&self) -> usize {
        self.held_back.len()
    }

    /// number of messages dropped for exceeding the hold-back capacity
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns the messages that became deliverable by this message's arrival, in order.
    ///  Unsequenced messages are passed through unchanged.
    pub fn accept(&mut self, message: Message) -> Vec<Message> {
        if !message.sequence.is_ordered() {
            return vec![message];
        }

        let distance = self.expected.distance_to(message.sequence);
        if distance == 0 {
            let mut result = vec![message];
            self.expected = self.expected.next();
            while let Some(next) = self.held_back.remove(&self.expected.to_raw()) {
                result.push(next);
                self.expected = self.expected.next();
            }
            trace!("delivering {} ordered messages, next expected {:?}", result.len(), self.expected);
            return result;
        }

        if distance > Sequence::MODULUS / 2 {
            debug!("discarding stale ordered message {:?}, expected {:?}", message.sequence, self.expected);
            return Vec::new();
        }

        if distance > self.hold_back_capacity {
            self.dropped += 1;
            warn!("ordered message {:?} is {} ahead of expected {:?}, exceeding hold-back capacity - dropping it, the ordered channel is stalled", message.sequence, distance, self.expected);
            return Vec::new();
        }

        let raw = message.sequence.to_raw();
        if self.held_back.contains_key(&raw) {
            debug!("discarding duplicate ordered message {:?}", message.sequence);
        }
        else {
            trace!("holding back {:?}, waiting for {:?}", message.sequence, self.expected);
            self.held_back.insert(raw, message);
        }
        Vec::new()
    }

    pub fn clear(&mut self) {
        self.held_back.clear();
    }
}
