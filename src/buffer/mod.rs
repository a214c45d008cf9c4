pub mod buffer_pool;
pub mod field_reader;
pub mod message_reader;
pub mod typed_buffer;

pub use field_reader::FieldReader;
pub use message_reader::MessageReader;
pub use typed_buffer::TypedBuffer;
