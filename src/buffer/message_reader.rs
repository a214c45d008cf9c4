use crate::buffer::field_reader::{take_from, FieldReader};
use bytes::Bytes;


/// A read cursor over an immutable, shared message payload. Every consumer of a received message
///  gets its own reader starting at offset 0, so consumers cannot disturb each other's position.
#[derive(Clone, Debug)]
pub struct MessageReader {
    data: Bytes,
    cursor: usize,
    overrun: bool,
}

impl MessageReader {
    pub fn new(data: Bytes) -> MessageReader {
        MessageReader {
            data,
            cursor: 0,
            overrun: false,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl FieldReader for MessageReader {
    fn take(&mut self, len: usize) -> Option<&[u8]> {
        take_from(&self.data, &mut self.cursor, &mut self.overrun, len)
    }

    fn unread(&self) -> &[u8] {
        if self.overrun {
            return &[];
        }
        &self.data[self.cursor..]
    }

    fn mark_overrun(&mut self) {
        self.overrun = true;
    }

    fn overrun(&self) -> bool {
        self.overrun
    }
}
