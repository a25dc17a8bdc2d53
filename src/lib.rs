//! # Weave
//!
//! An embedded, in-process message-passing fabric: payloads flow from
//! [`Source`]s through statically-declared [`Connection`]s to [`Sink`]s,
//! either inline in the emitter's thread or through bounded
//! [`MessageQueue`]s drained by worker threads.
//!
//!```text
//!                          ┌───────────────┐
//!                     ┌──► │ Sink (imm)    │   handler in emitter thread
//!  ┌───────────┐      │    └───────────────┘
//!  │  Source   │ ─────┤
//!  └───────────┘      │    ┌───────────────┐     ┌──────────────┐
//!   emit(&p, t)       └──► │ Sink (queued) │ ──► │ MessageQueue │ ─► process()
//!                          └───────────────┘     └──────────────┘
//!```
//!
//! Payload lifecycle is delegated to [`PayloadOps`] acquire/release hooks,
//! which is also where per-sink filtering happens. Two layers build on the
//! same primitives:
//!
//! - [`PacketPool`]/[`Packet`]: ref-counted, fragmentable byte buffers from
//!   fixed pools, with id/counter/timestamp metadata and id-based routing
//!   via [`PacketOps`].
//! - [`Method`]: typed request/reply calls whose payload is a stack-resident
//!   call context and whose completion is a one-shot latch.
//!
//! The concurrency model is preemptive threads plus interrupt-style
//! callers: every operation takes a [`Timeout`] and converts it once into
//! an absolute deadline shared by all of its suspension points;
//! [`Timeout::NoWait`] variants never suspend. Nothing on the delivery path
//! allocates, and no fabric lock is ever held while a handler runs.
//!
//! ## Example
//!
//!```
//! use weave::{Connection, MessageQueue, Sink, SinkHandler, Source, Timeout, connect};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! static SEEN: AtomicUsize = AtomicUsize::new(0);
//!
//! struct Tally;
//! impl SinkHandler<u32> for Tally {
//!     fn deliver(&self, sample: &u32) {
//!         SEEN.fetch_add(*sample as usize, Ordering::Relaxed);
//!     }
//! }
//!
//! static QUEUE: MessageQueue<u32, 8> = MessageQueue::new();
//! static TAP: Sink<u32> = Sink::queued("tap", &Tally, &QUEUE);
//! static TELEMETRY: Source<u32> = Source::new("telemetry");
//! static WIRE: Connection<u32> = Connection::new(&TAP);
//!
//! connect(&TELEMETRY, &WIRE).unwrap();
//! assert_eq!(TELEMETRY.emit(&7, Timeout::NoWait).unwrap(), 1);
//!
//! // Some worker thread drains the queue:
//! assert_eq!(QUEUE.process(Timeout::NoWait).unwrap(), 1);
//! assert_eq!(SEEN.load(Ordering::Relaxed), 7);
//! ```
//!
//! Build-time graphs are declared with [`wire!`] and registered by a single
//! [`init`] call at boot; the `runtime-wiring` feature adds
//! `disconnect` for live rewiring.

pub mod config;
pub mod error;
pub mod fabric;
pub mod method;
pub mod packet;
pub mod time;

mod ring;
mod stats;

pub use error::{Error, Result};
pub use fabric::{
    CloneOps, Connection, Event, EventQueue, MessageQueue, Mode, PayloadOps, Sink, SinkHandler,
    Source, connect, init,
};
#[cfg(feature = "runtime-wiring")]
pub use fabric::disconnect;
#[cfg(feature = "stats")]
pub use fabric::SourceStats;
pub use method::{AsyncCall, CallHandle, Method};
pub use packet::{ANY_PACKET_OPS, Frags, Packet, PacketId, PacketOps, PacketPool};
#[cfg(feature = "stats")]
pub use packet::PoolStats;
pub use time::{Deadline, Timeout};

/// Macro plumbing; not public API.
#[doc(hidden)]
pub mod __private {
    pub use linkme;
    pub use linkme::distributed_slice;
    pub use paste::paste;
}
