//! Ref-counted packet buffers.
//!
//! A [`PacketPool`] holds a fixed array of fixed-size buffers; a [`Packet`]
//! is a handle on one of them. Handles clone cheaply (a reference count),
//! buffers return to their pool when the last handle drops, and buffers can
//! be chained into fragment lists so a logical packet spans several
//! allocations without copying.
//!
//! Each buffer carries a small metadata block, guarded by a magic word so
//! that buffers from foreign subsystems can flow through the same fabric
//! without their user area being misread. The block records:
//!
//! - the packet id and client id
//! - a per-pool monotonic counter
//! - an allocation timestamp
//!
//! [`PacketOps`] bridges the layer to the fan-out engine: acquire is
//! filter-then-ref, release is unref. Giving a sink its own filtered ops
//! instance routes by packet id without the source knowing about identity.

pub mod buffer;
pub mod meta;
pub mod ops;
pub mod pool;

pub use buffer::{Frags, Packet};
pub use meta::PacketId;
pub use ops::{PacketOps, ANY_PACKET_OPS};
pub use pool::PacketPool;
#[cfg(feature = "stats")]
pub use pool::PoolStats;
