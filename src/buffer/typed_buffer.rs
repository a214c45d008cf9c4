use crate::buffer::field_reader::{take_from, FieldReader};
use crate::wire::packet::MAX_MESSAGE_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::{Debug, Formatter};


/// A byte buffer with an append cursor (writes) and a read cursor (reads). All numbers are
///  little-endian regardless of host byte order.
///
/// Writes that would exceed the buffer's capacity set the sticky `overrun` flag instead of
///  failing, and once it is set, nothing is appended or consumed any more. Fields written or read
///  before the overrun stay valid.
pub struct TypedBuffer {
    data: BytesMut,
    capacity: usize,
    read_pos: usize,
    overrun: bool,
}

impl Debug for TypedBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedBuffer{{len:{}, capacity:{}, read_pos:{}, overrun:{}}}", self.data.len(), self.capacity, self.read_pos, self.overrun)
    }
}

impl Default for TypedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TypedBuffer {
    /// a buffer that grows as needed up to the maximum message size
    pub fn new() -> TypedBuffer {
        TypedBuffer {
            data: BytesMut::new(),
            capacity: MAX_MESSAGE_SIZE,
            read_pos: 0,
            overrun: false,
        }
    }

    /// a buffer with a fixed upper bound on its length
    pub fn with_capacity(capacity: usize) -> TypedBuffer {
        TypedBuffer {
            data: BytesMut::with_capacity(capacity),
            capacity,
            read_pos: 0,
            overrun: false,
        }
    }

    /// a buffer for reading pre-existing data, with the cursor at the start
    pub fn from_slice(data: &[u8]) -> TypedBuffer {
        TypedBuffer {
            data: BytesMut::from(data),
            capacity: data.len(),
            read_pos: 0,
            overrun: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// number of bytes that can still be appended
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn reset_cursor(&mut self) {
        self.read_pos = 0;
    }

    pub fn cursor(&self) -> usize {
        self.read_pos
    }

    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    #[must_use]
    fn reserve_field(&mut self, len: usize) -> bool {
        if self.overrun || len > self.remaining_capacity() {
            self.overrun = true;
            return false;
        }
        true
    }

    pub fn write_u8(&mut self, value: u8) {
        if self.reserve_field(1) {
            self.data.put_u8(value);
        }
    }

    pub fn write_u16(&mut self, value: u16) {
        if self.reserve_field(2) {
            self.data.put_u16_le(value);
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        if self.reserve_field(4) {
            self.data.put_u32_le(value);
        }
    }

    pub fn write_i8(&mut self, value: i8) {
        if self.reserve_field(1) {
            self.data.put_i8(value);
        }
    }

    pub fn write_i16(&mut self, value: i16) {
        if self.reserve_field(2) {
            self.data.put_i16_le(value);
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        if self.reserve_field(4) {
            self.data.put_i32_le(value);
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        if self.reserve_field(4) {
            self.data.put_f32_le(value);
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Writes the string followed by a NUL terminator. A string containing NUL cannot be
    ///  represented and sets the overrun flag.
    pub fn write_string(&mut self, value: &str) {
        if value.as_bytes().contains(&0) {
            self.overrun = true;
            return;
        }
        if self.reserve_field(value.len() + 1) {
            self.data.put_slice(value.as_bytes());
            self.data.put_u8(0);
        }
    }

    /// Appends pre-encoded bytes verbatim, e.g. compressed blobs
    pub fn write_bytes(&mut self, value: &[u8]) {
        if self.reserve_field(value.len()) {
            self.data.put_slice(value);
        }
    }
}

impl FieldReader for TypedBuffer {
    fn take(&mut self, len: usize) -> Option<&[u8]> {
        take_from(&self.data, &mut self.read_pos, &mut self.overrun, len)
    }

    fn unread(&self) -> &[u8] {
        if self.overrun {
            return &[];
        }
        &self.data[self.read_pos..]
    }

    fn mark_overrun(&mut self) {
        self.overrun = true;
    }

    fn overrun(&self) -> bool {
        self.overrun
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_write_past_capacity_keeps_content() {
        let mut buf = TypedBuffer::with_capacity(4);
        buf.write_u32(1);
        assert!(!buf.overrun());

        buf.write_u8(9);
        assert!(buf.overrun());
        assert_eq!(buf.as_slice(), &[1, 0, 0, 0]);
    }

    #[test]
    fn test_overrun_is_sticky_for_writes() {
        let mut buf = TypedBuffer::with_capacity(3);
        buf.write_u32(1);
        assert!(buf.overrun());

        // would fit, but the buffer is invalid from now on
        buf.write_u8(1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fields_little_endian() {
        let mut buf = TypedBuffer::new();
        buf.write_u8(1);
        buf.write_u16(0x0203);
        buf.write_u32(0x04050607);
        buf.write_i8(-1);
        buf.write_i16(-2);
        buf.write_i32(-3);
        buf.write_bool(true);
        buf.write_f32(1.5);

        assert_eq!(buf.as_slice(), &[
            1,
            3,2,
            7,6,5,4,
            0xff,
            0xfe,0xff,
            0xfd,0xff,0xff,0xff,
            1,
            0,0,0xc0,0x3f,
        ]);

        assert_eq!(buf.read_u8(), 1);
        assert_eq!(buf.read_u16(), 0x0203);
        assert_eq!(buf.read_u32(), 0x04050607);
        assert_eq!(buf.read_i8(), -1);
        assert_eq!(buf.read_i16(), -2);
        assert_eq!(buf.read_i32(), -3);
        assert!(buf.read_bool());
        assert_eq!(buf.read_f32(), 1.5);
        assert!(!buf.overrun());
        assert_eq!(buf.remaining(), 0);
    }

    #[rstest]
    #[case::simple("hello world", b"hello world\0")]
    #[case::single_char("x", b"x\0")]
    #[case::utf8("grüß", "grüß\0".as_bytes())]
    fn test_string(#[case] s: &str, #[case] expected: &[u8]) {
        let mut buf = TypedBuffer::new();
        buf.write_string(s);
        assert_eq!(buf.as_slice(), expected);
        assert_eq!(buf.read_string().as_deref(), Some(s));
        assert!(!buf.overrun());
    }

    #[test]
    fn test_empty_string_reads_as_absent() {
        let mut buf = TypedBuffer::new();
        buf.write_string("");
        buf.write_u8(5);
        assert_eq!(buf.as_slice(), &[0, 5]);

        assert_eq!(buf.read_string(), None);
        assert!(!buf.overrun());
        assert_eq!(buf.read_u8(), 5);
    }

    #[test]
    fn test_string_with_nul_is_overrun() {
        let mut buf = TypedBuffer::new();
        buf.write_string("a\0b");
        assert!(buf.overrun());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_string_without_terminator() {
        let mut buf = TypedBuffer::from_slice(b"abc");
        assert_eq!(buf.read_string(), None);
        assert!(buf.overrun());
    }

    #[rstest]
    #[case::u8_empty(vec![], 1)]
    #[case::u16_short(vec![1], 2)]
    #[case::u32_short(vec![1,2,3], 4)]
    fn test_read_past_end(#[case] data: Vec<u8>, #[case] field_len: usize) {
        let mut buf = TypedBuffer::from_slice(&data);
        match field_len {
            1 => assert_eq!(buf.read_u8(), 0),
            2 => assert_eq!(buf.read_u16(), 0),
            _ => assert_eq!(buf.read_u32(), 0),
        }
        assert!(buf.overrun());
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_reads_stop_after_overrun() {
        let mut buf = TypedBuffer::from_slice(&[1, 2, 3]);
        assert_eq!(buf.read_u8(), 1);
        assert_eq!(buf.read_u32(), 0);
        assert!(buf.overrun());
        // enough bytes left for a u8, but the buffer is overrun
        assert_eq!(buf.read_u8(), 0);
        assert_eq!(buf.read_bytes(1), &[] as &[u8]);
    }

    #[test]
    fn test_bytes_verbatim() {
        let mut buf = TypedBuffer::with_capacity(5);
        buf.write_bytes(&[9, 8, 7]);
        buf.write_u16(0x0102);
        assert!(!buf.overrun());

        assert_eq!(buf.read_bytes(3), &[9, 8, 7]);
        assert_eq!(buf.read_u16(), 0x0102);
        buf.reset_cursor();
        assert_eq!(buf.read_u8(), 9);
    }
}
