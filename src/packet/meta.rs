use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Identifies the stream a packet belongs to.
///
/// `WILDCARD` matches everything, on either side of a filter comparison: a
/// wildcard sink accepts any packet, and a wildcard packet passes any sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId(pub u8);

impl PacketId {
    pub const WILDCARD: PacketId = PacketId(0xFF);

    #[inline]
    pub const fn is_wildcard(self) -> bool {
        self.0 == Self::WILDCARD.0
    }

    /// Filter comparison: wildcard on either side matches.
    #[inline]
    pub const fn matches(self, other: PacketId) -> bool {
        self.is_wildcard() || other.is_wildcard() || self.0 == other.0
    }
}

/// Sentinel marking a buffer's metadata area as stamped by this layer.
/// Buffers from other subsystems lack it, and every accessor checks before
/// trusting the fields.
const META_MAGIC: u32 = 0x5745_4156; // "WEAV"

/// Per-buffer metadata block.
///
/// The fields are individual atomics so that accessors are safe from any
/// context without a lock; the magic word gates all of them.
pub(crate) struct MetaCell {
    magic: AtomicU32,
    id: AtomicU8,
    client: AtomicU8,
    counter: AtomicU16,
    timestamp: AtomicU64,
}

impl MetaCell {
    pub(crate) const fn new() -> Self {
        Self {
            magic: AtomicU32::new(0),
            id: AtomicU8::new(0),
            client: AtomicU8::new(0),
            counter: AtomicU16::new(0),
            timestamp: AtomicU64::new(0),
        }
    }

    /// Initializes the block at allocation time and raises the magic.
    pub(crate) fn stamp(&self, id: PacketId, counter: u16, ticks: u64) {
        self.id.store(id.0, Ordering::Relaxed);
        self.client.store(0, Ordering::Relaxed);
        self.counter.store(counter, Ordering::Relaxed);
        self.timestamp.store(ticks, Ordering::Relaxed);
        self.magic.store(META_MAGIC, Ordering::Release);
    }

    /// Lowers the magic; accessors fail afterwards.
    pub(crate) fn clear(&self) {
        self.magic.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_stamped(&self) -> bool {
        self.magic.load(Ordering::Acquire) == META_MAGIC
    }

    /// All accessors funnel through this check so a foreign buffer can
    /// coexist with stamped ones without its user area being misread.
    #[inline]
    fn guard(&self) -> Result<()> {
        if self.is_stamped() {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }

    pub(crate) fn id(&self) -> Result<PacketId> {
        self.guard()?;
        Ok(PacketId(self.id.load(Ordering::Relaxed)))
    }

    pub(crate) fn set_id(&self, id: PacketId) -> Result<()> {
        self.guard()?;
        self.id.store(id.0, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn client_id(&self) -> Result<u8> {
        self.guard()?;
        Ok(self.client.load(Ordering::Relaxed))
    }

    pub(crate) fn set_client_id(&self, client: u8) -> Result<()> {
        self.guard()?;
        self.client.store(client, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn counter(&self) -> Result<u16> {
        self.guard()?;
        Ok(self.counter.load(Ordering::Relaxed))
    }

    pub(crate) fn set_counter(&self, counter: u16) -> Result<()> {
        self.guard()?;
        self.counter.store(counter, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn timestamp(&self) -> Result<u64> {
        self.guard()?;
        Ok(self.timestamp.load(Ordering::Relaxed))
    }

    pub(crate) fn set_timestamp(&self, ticks: u64) -> Result<()> {
        self.guard()?;
        self.timestamp.store(ticks, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod meta_test {
    use super::*;

    /// Wildcard matches everything, in both directions.
    #[test]
    fn test_wildcard_matching() {
        assert!(PacketId::WILDCARD.matches(PacketId(3)));
        assert!(PacketId(3).matches(PacketId::WILDCARD));
        assert!(PacketId(3).matches(PacketId(3)));
        assert!(!PacketId(3).matches(PacketId(4)));
    }

    /// Accessors refuse an unstamped block.
    #[test]
    fn test_unstamped_rejected() {
        let meta = MetaCell::new();
        assert_eq!(meta.id(), Err(Error::InvalidArgument));
        assert_eq!(meta.set_id(PacketId(1)), Err(Error::InvalidArgument));
        assert_eq!(meta.counter(), Err(Error::InvalidArgument));
        assert_eq!(meta.timestamp(), Err(Error::InvalidArgument));
    }

    /// Round-trips once stamped.
    #[test]
    fn test_roundtrip() {
        let meta = MetaCell::new();
        meta.stamp(PacketId(7), 41, 1000);
        assert_eq!(meta.id(), Ok(PacketId(7)));
        assert_eq!(meta.counter(), Ok(41));
        assert_eq!(meta.timestamp(), Ok(1000));

        meta.set_id(PacketId(9)).unwrap();
        meta.set_client_id(3).unwrap();
        meta.set_counter(42).unwrap();
        meta.set_timestamp(2000).unwrap();
        assert_eq!(meta.id(), Ok(PacketId(9)));
        assert_eq!(meta.client_id(), Ok(3));
        assert_eq!(meta.counter(), Ok(42));
        assert_eq!(meta.timestamp(), Ok(2000));

        meta.clear();
        assert_eq!(meta.id(), Err(Error::InvalidArgument));
    }
}
