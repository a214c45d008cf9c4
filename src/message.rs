use crate::buffer::{FieldReader, MessageReader, TypedBuffer};
use crate::peer::PeerId;
use crate::wire::packet::{Priority, Sequence};
use bytes::Bytes;
use std::fmt::{Debug, Formatter};

/// A complete application message: either built for sending to `peer`, or reassembled from
///  fragments received from `peer`.
///
/// The payload is immutable and shared, so handing a message to several consumers copies
///  nothing. Reading happens through [MessageReader]s, each with its own cursor.
#[derive(Clone)]
pub struct Message {
    pub message_type: u8,
    pub priority: Priority,
    pub sequence: Sequence,
    pub peer: PeerId,
    payload: Bytes,
    overrun: bool,
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{type:{}, {:?}, {:?}, {:?}, len:{}{}}}",
               self.message_type, self.priority, self.sequence, self.peer, self.payload.len(),
               if self.overrun { ", overrun" } else { "" })
    }
}

impl Message {
    pub fn new(peer: PeerId, message_type: u8, priority: Priority, sequence: Sequence, payload: Bytes) -> Message {
        Message {
            message_type,
            priority,
            sequence,
            peer,
            payload,
            overrun: false,
        }
    }

    /// Takes over a buffer's content, including its overrun state
    pub fn from_buffer(peer: PeerId, message_type: u8, priority: Priority, sequence: Sequence, buffer: TypedBuffer) -> Message {
        let overrun = buffer.overrun();
        Message {
            message_type,
            priority,
            sequence,
            peer,
            payload: buffer.freeze(),
            overrun,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// set if the payload was truncated while it was written
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// a fresh read cursor at the start of the payload
    pub fn reader(&self) -> MessageReader {
        MessageReader::new(self.payload.clone())
    }
}
