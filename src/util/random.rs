use rand::RngCore;


/// Source of the random seed for a connection's outbound packet ids. Abstracted into a trait so
///  tests can pin packet ids.
#[cfg_attr(test, mockall::automock)]
pub trait PacketIdSource: Send + Sync + 'static {
    /// returns a random id - zero is allowed here, callers skip it
    fn next_u32(&self) -> u32;
}

pub struct RngPacketIdSource {}
impl PacketIdSource for RngPacketIdSource {
    fn next_u32(&self) -> u32 {
        rand::thread_rng().next_u32()
    }
}

/// Deterministic source for tests and demos: hands out consecutive values starting at a seed
pub struct FixedPacketIdSource {
    next: std::sync::atomic::AtomicU32,
}
impl FixedPacketIdSource {
    pub fn new(seed: u32) -> FixedPacketIdSource {
        FixedPacketIdSource {
            next: std::sync::atomic::AtomicU32::new(seed),
        }
    }
}
impl PacketIdSource for FixedPacketIdSource {
    fn next_u32(&self) -> u32 {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_source_counts_up() {
        let source = FixedPacketIdSource::new(7);
        assert_eq!(source.next_u32(), 7);
        assert_eq!(source.next_u32(), 8);
    }
}
