use bytes::Buf;


macro_rules! read_impl {
    ($reader: ident, $ty:ty, $getter: ident) => {
        fn $reader(&mut self) -> $ty {
            match self.take(size_of::<$ty>()) {
                Some(mut raw) => raw.$getter(),
                None => <$ty>::default(),
            }
        }
    }
}


/// Bounds-checked, little-endian field access for anything with a read cursor.
///
/// Reads never fail loudly: reading past the end sets a sticky 'overrun' flag and returns a zero /
///  empty default. This allows a batch of fields to be read and checked once at the end:
///
/// ```
/// # use gamewire::buffer::{FieldReader, TypedBuffer};
/// let mut buf = TypedBuffer::with_capacity(8);
/// buf.write_u16(7);
/// let mut reader = TypedBuffer::from_slice(buf.as_slice());
/// let a = reader.read_u16();
/// let b = reader.read_u32();
/// assert_eq!(a, 7);
/// assert_eq!(b, 0);
/// assert!(reader.overrun());
/// ```
pub trait FieldReader {
    /// Consumes `len` bytes, returning them. If fewer than `len` bytes remain or the reader is
    ///  already overrun, this sets the overrun flag, consumes nothing and returns `None`.
    fn take(&mut self, len: usize) -> Option<&[u8]>;

    /// the bytes after the cursor, without consuming them
    fn unread(&self) -> &[u8];

    fn mark_overrun(&mut self);

    fn overrun(&self) -> bool;

    fn remaining(&self) -> usize {
        self.unread().len()
    }

    read_impl!(read_u8, u8, get_u8);
    read_impl!(read_u16, u16, get_u16_le);
    read_impl!(read_u32, u32, get_u32_le);
    read_impl!(read_i8, i8, get_i8);
    read_impl!(read_i16, i16, get_i16_le);
    read_impl!(read_i32, i32, get_i32_le);
    read_impl!(read_f32, f32, get_f32_le);

    fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    /// Reads a NUL terminated string. A zero-length string reads as `None`, i.e. 'empty' and
    ///  'absent' are the same thing on the wire. Missing terminator is an overrun.
    fn read_string(&mut self) -> Option<String> {
        if self.overrun() {
            return None;
        }

        let terminator = match self.unread().iter().position(|&b| b == 0) {
            Some(pos) => pos,
            None => {
                self.mark_overrun();
                return None;
            }
        };

        let raw = self.take(terminator + 1)?;
        if terminator == 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&raw[..terminator]).into_owned())
    }

    /// raw bytes without any conversion - empty on overrun
    fn read_bytes(&mut self, len: usize) -> &[u8] {
        self.take(len).unwrap_or(&[])
    }
}

/// Shared cursor arithmetic for the reader implementations
pub(crate) fn take_from<'a>(data: &'a [u8], cursor: &mut usize, overrun: &mut bool, len: usize) -> Option<&'a [u8]> {
    if *overrun {
        return None;
    }
    match cursor.checked_add(len) {
        Some(end) if end <= data.len() => {
            let result = &data[*cursor..end];
            *cursor = end;
            Some(result)
        }
        _ => {
            *overrun = true;
            None
        }
    }
}
