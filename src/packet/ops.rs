use crate::error::{Error, Result};
use crate::fabric::ops::PayloadOps;
use crate::fabric::sink::Sink;
use crate::packet::buffer::Packet;
use crate::packet::meta::PacketId;
use crate::stats::Counter;

/// Standard payload ops for [`Packet`] flows: acquire takes a reference
/// (after the filter check), release drops it.
///
/// The filter id lives in the ops instance, so per-sink filtering is a
/// matter of giving each routed sink its own `PacketOps`. The source keeps
/// using the wildcard [`ANY_PACKET_OPS`] and never learns about packet
/// identity.
pub struct PacketOps {
    filter: PacketId,
    passed: Counter,
    rejected: Counter,
}

/// Shared wildcard instance for sources that fan packets out unfiltered.
pub static ANY_PACKET_OPS: PacketOps = PacketOps::any();

impl PacketOps {
    /// Accepts every packet.
    pub const fn any() -> Self {
        Self::filtered(PacketId::WILDCARD)
    }

    /// Accepts packets whose id matches `filter` (wildcards on either side
    /// match everything).
    pub const fn filtered(filter: PacketId) -> Self {
        Self {
            filter,
            passed: Counter::new(),
            rejected: Counter::new(),
        }
    }

    pub const fn filter(&self) -> PacketId {
        self.filter
    }

    /// Packets that passed the filter.
    #[cfg(feature = "stats")]
    pub fn passed(&self) -> usize {
        self.passed.get()
    }

    /// Packets bypassed by the filter.
    #[cfg(feature = "stats")]
    pub fn rejected(&self) -> usize {
        self.rejected.get()
    }
}

impl PayloadOps<Packet> for PacketOps {
    fn acquire(&self, payload: &Packet, _sink: &Sink<Packet>) -> Result<Packet> {
        if !self.filter.is_wildcard() {
            match payload.id() {
                Ok(id) if self.filter.matches(id) => {}
                // A buffer without metadata cannot prove a match, so it only
                // passes wildcard filters.
                Ok(_) | Err(_) => {
                    self.rejected.hit();
                    return Err(Error::FilterMismatch);
                }
            }
        }
        self.passed.hit();
        Ok(payload.clone())
    }
}
