//! Source→sink fan-out engine.
//!
//! A [`Source`] is a named fan-out point; a [`Sink`] is a named delivery
//! target with a handler and an execution mode; a [`Connection`] is a
//! registered edge between the two. Emitting walks the source's connection
//! list and hands the payload to every sink whose ops accept it:
//!
//!```text
//!                         ┌──────────────┐
//!                    ┌──► │ Sink A (imm) │  handler runs in emitter thread
//!  ┌──────────┐      │    └──────────────┘
//!  │  Source  │ ─────┤
//!  └──────────┘      │    ┌──────────────┐      ┌─────────────┐
//!   emit(&p, t)      └──► │ Sink B (q)   │ ───► │ MessageQueue│ ─► process()
//!                         └──────────────┘      └─────────────┘
//!```
//!
//! Payload lifetime is governed by [`PayloadOps`]: `acquire` produces the
//! copy a sink will own (or vetoes the delivery, which is how per-sink
//! filtering works), `release` consumes it after the handler ran. Queued
//! events own their copy while parked, and release it even if the queue is
//! purged.
//!
//! ## Ordering
//!
//! - Per (source, sink) pair: FIFO, defined by connection order plus queue
//!   FIFO.
//! - Across sinks of one emit: unspecified.
//! - Across sources: unspecified.
//!
//! No fabric lock is ever held while a handler runs, so handlers may emit.

pub mod connection;
pub mod ops;
pub mod queue;
pub mod sink;
pub mod source;
pub mod wiring;

pub use connection::Connection;
pub use ops::{CloneOps, PayloadOps};
pub use queue::{Event, EventQueue, MessageQueue};
pub use sink::{Mode, Sink, SinkHandler};
pub use source::Source;
#[cfg(feature = "stats")]
pub use source::SourceStats;
#[cfg(feature = "runtime-wiring")]
pub use wiring::disconnect;
pub use wiring::{connect, init};
