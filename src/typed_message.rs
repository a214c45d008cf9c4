use crate::buffer::{FieldReader, MessageReader, TypedBuffer};
use crate::dispatcher::{ConsumerId, MessageConsumer};
use crate::message::Message;
use crate::peer::PeerId;
use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::debug;

/// A message subtype with a fixed type tag and a field layout written to / read from a
///  [TypedBuffer].
///
/// ```
/// use gamewire::buffer::{FieldReader, TypedBuffer};
/// use gamewire::typed_message::TypedMessage;
///
/// #[derive(Debug, PartialEq)]
/// struct Chat { channel: u8, text: Option<String> }
///
/// impl TypedMessage for Chat {
///     const MESSAGE_TYPE: u8 = 42;
///
///     fn write(&self, buf: &mut TypedBuffer) {
///         buf.write_u8(self.channel);
///         buf.write_string(self.text.as_deref().unwrap_or(""));
///     }
///
///     fn read(reader: &mut impl FieldReader) -> Self {
///         Chat { channel: reader.read_u8(), text: reader.read_string() }
///     }
/// }
///
/// let chat = Chat { channel: 3, text: Some("hi".to_string()) };
/// let mut buf = chat.to_buffer();
/// assert_eq!(Chat::from_reader(&mut buf), Some(chat));
/// ```
pub trait TypedMessage: Sized {
    const MESSAGE_TYPE: u8;

    fn write(&self, buf: &mut TypedBuffer);

    /// Reads the fields in the order they were written. Reads past the end return defaults and
    ///  flag the reader as overrun, which [TypedMessage::from_reader] checks.
    fn read(reader: &mut impl FieldReader) -> Self;

    fn to_buffer(&self) -> TypedBuffer {
        let mut buf = TypedBuffer::new();
        self.write(&mut buf);
        buf
    }

    /// `None` if the data is too short for the message's fields
    fn from_reader(reader: &mut impl FieldReader) -> Option<Self> {
        let result = Self::read(reader);
        if reader.overrun() {
            None
        }
        else {
            Some(result)
        }
    }

    /// decodes a received message, `None` if it has a different type or is malformed
    fn decode(message: &Message) -> Option<Self> {
        if message.message_type != Self::MESSAGE_TYPE || message.overrun() {
            return None;
        }
        Self::from_reader(&mut message.reader())
    }
}


/// Adapts a closure handling decoded messages of one type to [MessageConsumer]. Messages that
///  fail to decode are logged and skipped.
pub struct TypedConsumer<M, F> {
    id: ConsumerId,
    handler: F,
    _message: PhantomData<fn(M)>,
}

impl <M, F> TypedConsumer<M, F>
where
    M: TypedMessage + Send + 'static,
    F: Fn(PeerId, M) + Send + Sync + 'static,
{
    pub fn new(id: ConsumerId, handler: F) -> TypedConsumer<M, F> {
        TypedConsumer {
            id,
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl <M, F> MessageConsumer for TypedConsumer<M, F>
where
    M: TypedMessage + Send + 'static,
    F: Fn(PeerId, M) + Send + Sync + 'static,
{
    fn id(&self) -> ConsumerId {
        self.id
    }

    async fn on_message(&self, message: &Message, mut reader: MessageReader) {
        if message.message_type != M::MESSAGE_TYPE {
            debug!("{:?} subscribed to message type {}, got {}", self.id, M::MESSAGE_TYPE, message.message_type);
            return;
        }
        match M::from_reader(&mut reader) {
            Some(decoded) => (self.handler)(message.peer, decoded),
            None => debug!("malformed message of type {} from {:?} - skipping", message.message_type, message.peer),
        }
    }
}
