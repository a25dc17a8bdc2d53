//! Compile-time configuration.
//!
//! The fabric is configured two ways:
//!
//! - **Cargo features** toggle whole concerns:
//!   - `stats` (default): atomic delivery/drop counters on sources, sinks,
//!     queues, pools and methods, with `*_stats()` snapshot accessors.
//!   - `names` (default): `&'static str` debug names and `name()` accessors.
//!   - `runtime-wiring`: `disconnect` and re-wiring on a live graph.
//!   - `high-res-timestamps`: nanosecond packet timestamps instead of
//!     millisecond ticks.
//! - **Constants** below bound the method (RPC) overlay.

/// Largest request type a [`Method`](crate::Method) accepts, in bytes.
/// Larger requests fail with `InvalidArgument` before dispatch.
pub const MAX_REQUEST_SIZE: usize = 1024;

/// Largest response type a [`Method`](crate::Method) accepts, in bytes.
pub const MAX_RESPONSE_SIZE: usize = 1024;

/// Most asynchronous calls that may be in flight per method; the next
/// `call_async` fails with `Overflow`.
pub const MAX_PENDING_REQUESTS: u32 = 32;
