use thiserror::Error;

/// Error kinds surfaced by fabric operations.
///
/// The taxonomy is deliberately small: structural misuse is `InvalidArgument`,
/// transient backpressure is `WouldBlock`/`Timeout`/`Overflow`/`NoMemory`
/// depending on where the deadline expired, and `FilterMismatch` is the
/// informational "a sink's filter bypassed this payload" outcome of a direct
/// [`Sink::send`](crate::fabric::Sink::send). During fan-out, per-sink failures
/// are absorbed into the delivered count and never reach the caller as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Structural misuse: an ops-less source with more than one connection,
    /// a request exceeding the configured RPC bounds, a metadata access on a
    /// buffer that carries no metadata, or an operation on a handle in the
    /// wrong state. Never retried.
    #[error("invalid argument")]
    InvalidArgument,
    /// A non-blocking attempt found the resource unavailable.
    #[error("operation would block")]
    WouldBlock,
    /// The absolute deadline expired while waiting.
    #[error("deadline expired")]
    Timeout,
    /// The buffer pool had no free buffer within the deadline.
    #[error("buffer pool exhausted")]
    NoMemory,
    /// A sink's message queue stayed full until the deadline expired.
    #[error("message queue full")]
    Overflow,
    /// The payload was bypassed by a sink filter. Not a failure: nothing was
    /// delivered, nothing has to be released.
    #[error("payload filtered out by sink")]
    FilterMismatch,
}

pub type Result<T> = core::result::Result<T, Error>;
