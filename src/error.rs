use crate::peer::PeerId;
use thiserror::Error;

/// Errors surfaced by the send API. This is the one place where the transport reports problems
///  to application code: everything on the receive side is handled (and logged) internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0:?} is not known to the peer registry")]
    UnknownPeer(PeerId),
    #[error("message of {len} bytes exceeds the maximum message size of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },
    #[error("send window is full: {needed} bytes needed, {available} bytes available")]
    WindowFull { needed: usize, available: usize },
    #[error("message buffer overran its bounds while it was built")]
    Overrun,
}

/// Reasons for dropping a received packet while parsing it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("packet header needs {needed} bytes, only {available} received")]
    HeaderTooShort { needed: usize, available: usize },
    #[error("fragment declares {declared} payload bytes, only {available} received")]
    FragmentTooLarge { declared: usize, available: usize },
    #[error("reserved flag bit is set: {0:#04x}")]
    ReservedFlag(u8),
}

/// Reasons for invalidating a partially reassembled message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("fragment declares total size {actual}, sibling fragments declared {expected}")]
    TotalSizeMismatch { expected: u16, actual: u16 },
    #[error("fragment at offset {offset} with {size} bytes exceeds total message size {total}")]
    FragmentOutOfBounds { offset: u16, size: u16, total: u16 },
    #[error("fragments add up to the total size but leave a gap or overlap at offset {offset}")]
    Gap { offset: usize },
}
