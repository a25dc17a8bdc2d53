//! Typed request/reply ("method") calls over the fabric.
//!
//! A [`Method`] is a sink whose payload is a pointer to a call context on
//! the caller's stack. The context holds:
//!
//! - the request and response pointers
//! - a result word
//! - a one-shot completion latch
//!
//! The caller blocks on the latch until the dispatcher runs the typed
//! handler and signals completion. For an immediate method the dispatcher
//! runs inline in the caller's thread; for a queued one it runs on
//! whichever thread drains the queue.
//!
//!```text
//!  caller thread                        processing thread
//!  ─────────────                        ─────────────────
//!  ctx on stack ──► sink.send ──► queue ──► dispatch ──► handler(req, resp)
//!       │                                        │
//!       └──────────── latch.wait ◄───── latch.set┘
//!```
//!
//! The context is not ref-counted: the caller cannot return before the
//! handler finished (a timed-out sync call parks until completion before
//! reporting `Timeout`, and dropping a launched [`AsyncCall`] does the
//! same), so the pointer is trivially valid for the handler's lifetime.

mod latch;

use std::marker::{PhantomData, PhantomPinned};
use std::mem;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};

use latch::Latch;

use crate::config::{MAX_PENDING_REQUESTS, MAX_REQUEST_SIZE, MAX_RESPONSE_SIZE};
use crate::error::{Error, Result};
use crate::fabric::queue::EventQueue;
use crate::fabric::sink::{Sink, SinkHandler};
use crate::stats::Counter;
use crate::time::{Deadline, Timeout};

/// How a finished call reports what the dispatcher decided.
const STATUS_OK: u8 = 0;
const STATUS_INVALID: u8 = 1;

/// Type-erased call context. Lives on the caller's stack (sync call) or
/// inside a pinned [`AsyncCall`]; the fabric only ever moves the pointer.
struct CallCore {
    req: *const u8,
    req_size: usize,
    resp: *mut u8,
    resp_size: usize,
    /// The method's typed handler, erased; `invoke` knows the real type.
    handler: *const (),
    /// Monomorphized trampoline that validates sizes and calls `handler`.
    invoke: unsafe fn(&CallCore) -> Result<i32>,
    /// Outstanding-call counter to drop on completion, if any.
    pending: Option<&'static AtomicU32>,
    result: AtomicI32,
    status: AtomicU8,
    done: Latch,
}

impl CallCore {
    fn new<Req, Resp>(
        req: &Req,
        resp: &mut Resp,
        handler: fn(&Req, &mut Resp) -> i32,
    ) -> Self {
        Self {
            req: (req as *const Req).cast(),
            req_size: size_of::<Req>(),
            resp: (resp as *mut Resp).cast(),
            resp_size: size_of::<Resp>(),
            handler: handler as *const (),
            invoke: trampoline::<Req, Resp>,
            pending: None,
            result: AtomicI32::new(0),
            status: AtomicU8::new(STATUS_OK),
            done: Latch::new(),
        }
    }

    /// Blocks until the dispatcher signalled completion, then decodes the
    /// outcome.
    fn conclude(&self, deadline: Deadline) -> Result<i32> {
        self.done.wait(deadline)?;
        match self.status.load(Ordering::Acquire) {
            STATUS_OK => Ok(self.result.load(Ordering::Acquire)),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Validates the recorded sizes against the method's types, then runs the
/// typed handler.
///
/// # Safety
/// `core` must describe live request/response storage of exactly the types
/// this instantiation was created with, and `core.handler` must be the
/// erased `fn(&Req, &mut Resp) -> i32` of the owning method.
unsafe fn trampoline<Req, Resp>(core: &CallCore) -> Result<i32> {
    if core.req_size != size_of::<Req>() || core.resp_size != size_of::<Resp>() {
        log::warn!(
            "method call size mismatch: req {} (expected {}), resp {} (expected {})",
            core.req_size,
            size_of::<Req>(),
            core.resp_size,
            size_of::<Resp>(),
        );
        return Err(Error::InvalidArgument);
    }
    // Safety: sizes checked; the caller guarantees types and liveness, and
    // blocks until completion, so the pointers cannot dangle.
    let handler: fn(&Req, &mut Resp) -> i32 = unsafe { mem::transmute(core.handler) };
    let req = unsafe { &*core.req.cast::<Req>() };
    let resp = unsafe { &mut *core.resp.cast::<Resp>() };
    Ok(handler(req, resp))
}

/// The payload flowing through a method's sink: a pointer to the caller's
/// [`CallCore`].
#[derive(Clone)]
pub struct CallHandle {
    core: NonNull<CallCore>,
}

// Safety: the pointee outlives the handle. The calling side blocks on the
// latch (or in AsyncCall::drop) until the dispatcher is done with it.
unsafe impl Send for CallHandle {}
unsafe impl Sync for CallHandle {}

impl CallHandle {
    /// Runs the trampoline, publishes the outcome and releases the caller.
    fn complete(&self) {
        // Safety: see the Send justification above.
        let core = unsafe { self.core.as_ref() };
        match unsafe { (core.invoke)(core) } {
            Ok(code) => {
                core.result.store(code, Ordering::Release);
                core.status.store(STATUS_OK, Ordering::Release);
            }
            Err(_) => {
                core.status.store(STATUS_INVALID, Ordering::Release);
            }
        }
        if let Some(pending) = core.pending {
            pending.fetch_sub(1, Ordering::AcqRel);
        }
        // After this the caller may unwind its stack; nothing below may
        // touch `core`.
        core.done.set();
    }
}

/// The sink handler shared by all methods: dispatching an event means
/// completing the call it points at.
struct Dispatcher;

impl SinkHandler<CallHandle> for Dispatcher {
    fn deliver(&self, call: &CallHandle) {
        call.complete();
    }
}

/// The dispatcher reference used by every method sink. A promoted constant
/// rather than a `static`, so the `const` constructors may name it.
const DISPATCH: &'static dyn SinkHandler<CallHandle> = &Dispatcher;

/// A typed request/reply endpoint.
///
/// The handler runs either in the caller's thread (immediate) or in
/// whichever thread drains the method's queue: the same queues, events and
/// delivery rules as any other sink, with a null-ops payload because the
/// context's lifetime is the caller's stack frame.
pub struct Method<Req: 'static, Resp: 'static> {
    sink: Sink<CallHandle>,
    handler: fn(&Req, &mut Resp) -> i32,
    pending: AtomicU32,
    completed: Counter,
    _marker: PhantomData<fn(&Req, &mut Resp)>,
}

impl<Req: 'static, Resp: 'static> Method<Req, Resp> {
    /// A method dispatched inline in the caller's thread.
    pub const fn immediate(name: &'static str, handler: fn(&Req, &mut Resp) -> i32) -> Self {
        Self {
            sink: Sink::immediate(name, DISPATCH),
            handler,
            pending: AtomicU32::new(0),
            completed: Counter::new(),
            _marker: PhantomData,
        }
    }

    /// A method dispatched by whichever thread drains `queue`.
    pub const fn queued(
        name: &'static str,
        handler: fn(&Req, &mut Resp) -> i32,
        queue: &'static dyn EventQueue<CallHandle>,
    ) -> Self {
        Self {
            sink: Sink::queued(name, DISPATCH, queue),
            handler,
            pending: AtomicU32::new(0),
            completed: Counter::new(),
            _marker: PhantomData,
        }
    }

    #[cfg(feature = "names")]
    pub fn name(&self) -> &'static str {
        self.sink.name()
    }

    /// Calls this method completed so far.
    #[cfg(feature = "stats")]
    pub fn completed(&self) -> usize {
        self.completed.get()
    }

    /// Structural validation shared by every call entry point.
    fn validate(&self) -> Result<()> {
        if size_of::<Req>() > MAX_REQUEST_SIZE || size_of::<Resp>() > MAX_RESPONSE_SIZE {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Synchronous call: dispatches and blocks until the handler ran.
    ///
    /// Returns the handler's result code verbatim. The timeout covers both
    /// the enqueue (a queued method's queue may be full) and the wait for
    /// completion. If the wait itself times out after a successful enqueue,
    /// the call still parks until the dispatcher has finished with the
    /// stack context (the pointer must not outlive this frame) and then
    /// reports [`Error::Timeout`].
    pub fn call(&'static self, req: &Req, resp: &mut Resp, timeout: Timeout) -> Result<i32> {
        self.validate()?;
        let deadline = timeout.deadline();
        let core = CallCore::new(req, resp, self.handler);
        let handle = CallHandle {
            core: NonNull::from(&core),
        };
        self.sink.send_until(&handle, None, deadline)?;
        let outcome = match core.conclude(deadline) {
            Err(Error::Timeout) | Err(Error::WouldBlock) => {
                // Enqueued but not yet dispatched: the context cannot be
                // abandoned, so park without a deadline before reporting.
                let late = core.conclude(Deadline::Forever);
                late.and(Err(Error::Timeout))
            }
            outcome => outcome,
        };
        self.completed.hit();
        outcome
    }

    /// Starts an asynchronous call and returns once it is enqueued (or
    /// dispatched, for an immediate method). The outcome is collected with
    /// [`AsyncCall::wait`].
    ///
    /// At most [`MAX_PENDING_REQUESTS`] calls may be in flight per method;
    /// beyond that the call fails with [`Error::Overflow`].
    pub fn call_async<'a>(
        &'static self,
        context: Pin<&mut AsyncCall<'a, Req, Resp>>,
        timeout: Timeout,
    ) -> Result<()> {
        self.validate()?;
        // Safety: we never move the pinned context, only initialize it.
        let ctx = unsafe { context.get_unchecked_mut() };
        if ctx.launched {
            return Err(Error::InvalidArgument);
        }
        if self.pending.fetch_add(1, Ordering::AcqRel) >= MAX_PENDING_REQUESTS {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Overflow);
        }
        ctx.core.handler = self.handler as *const ();
        ctx.core.invoke = trampoline::<Req, Resp>;
        ctx.core.pending = Some(&self.pending);
        let handle = CallHandle {
            core: NonNull::from(&ctx.core),
        };
        match self.sink.send_until(&handle, None, timeout.deadline()) {
            Ok(()) => {
                ctx.launched = true;
                Ok(())
            }
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }
}

/// Caller-owned context of an asynchronous method call.
///
/// Create and pin the context, then launch it with [`Method::call_async`].
/// The result is collected with [`wait`](Self::wait). Dropping a launched
/// context blocks until the dispatcher has completed the call, so a
/// context that timed out on `wait` can never dangle under a late
/// completion.
pub struct AsyncCall<'a, Req: 'static, Resp: 'static> {
    core: CallCore,
    launched: bool,
    _borrows: PhantomData<(&'a Req, &'a mut Resp)>,
    _pin: PhantomPinned,
}

impl<'a, Req: 'static, Resp: 'static> AsyncCall<'a, Req, Resp> {
    /// Captures the request and response storage for a later launch.
    pub fn new(req: &'a Req, resp: &'a mut Resp) -> Self {
        // The handler fn is patched in at launch; a placeholder that can
        // never run stands in until then.
        fn unlaunched<Req, Resp>(_req: &Req, _resp: &mut Resp) -> i32 {
            0
        }
        Self {
            core: CallCore::new(req, resp, unlaunched::<Req, Resp>),
            launched: false,
            _borrows: PhantomData,
            _pin: PhantomPinned,
        }
    }

    /// Blocks up to `timeout` for the handler's result.
    ///
    /// [`Error::Timeout`] leaves the call in flight; `wait` may be called
    /// again, and the drop guard keeps the context safe regardless.
    pub fn wait(self: Pin<&mut Self>, timeout: Timeout) -> Result<i32> {
        let ctx = self.into_ref().get_ref();
        if !ctx.launched {
            return Err(Error::InvalidArgument);
        }
        ctx.core.conclude(timeout.deadline())
    }
}

impl<Req: 'static, Resp: 'static> Drop for AsyncCall<'_, Req, Resp> {
    fn drop(&mut self) {
        if self.launched {
            // A launched call may still sit in a queue; the dispatcher will
            // touch this memory, so leaving early is not an option.
            let _ = self.core.conclude(Deadline::Forever);
        }
    }
}

#[cfg(test)]
mod method_test {
    use super::*;
    use crate::fabric::queue::MessageQueue;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn add_one(req: &i32, resp: &mut i32) -> i32 {
        *resp = *req + 1;
        0
    }

    /// Synchronous immediate call: handler runs exactly once, in the
    /// caller's thread, with the caller's storage.
    #[test]
    fn test_sync_immediate_call() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);
        fn add_counted(req: &i32, resp: &mut i32) -> i32 {
            RUNS.fetch_add(1, Ordering::Relaxed);
            *resp = *req + 1;
            0
        }
        static ADD1: Method<i32, i32> = Method::immediate("add1", add_counted);

        let mut resp = 0;
        let code = ADD1.call(&41, &mut resp, Timeout::NoWait).unwrap();
        assert_eq!(code, 0);
        assert_eq!(resp, 42);
        assert_eq!(RUNS.load(Ordering::Relaxed), 1);
        #[cfg(feature = "stats")]
        assert_eq!(ADD1.completed(), 1);
    }

    /// The handler's result code is surfaced verbatim, including errors.
    #[test]
    fn test_handler_code_passthrough() {
        fn refuse(_req: &u8, _resp: &mut u8) -> i32 {
            -71
        }
        static REFUSE: Method<u8, u8> = Method::immediate("refuse", refuse);

        let mut resp = 0u8;
        assert_eq!(REFUSE.call(&0, &mut resp, Timeout::NoWait), Ok(-71));
    }

    /// Queued method: the caller blocks while a processing thread drains
    /// the queue and runs the handler.
    #[test]
    fn test_sync_queued_call() {
        static Q: MessageQueue<CallHandle, 4> = MessageQueue::new();
        static ADD1: Method<i32, i32> = Method::queued("add1-q", add_one, &Q);

        std::thread::scope(|s| {
            let worker = s.spawn(|| {
                let mut handled = 0;
                while handled == 0 {
                    handled = Q.process(Timeout::After(Duration::from_millis(50))).unwrap();
                }
            });
            let mut resp = 0;
            let code = ADD1
                .call(&41, &mut resp, Timeout::After(Duration::from_secs(5)))
                .unwrap();
            assert_eq!(code, 0);
            assert_eq!(resp, 42);
            worker.join().unwrap();
        });
    }

    /// Async call: launch, process, wait.
    #[test]
    fn test_async_call() {
        static Q: MessageQueue<CallHandle, 4> = MessageQueue::new();
        static ADD1: Method<i32, i32> = Method::queued("add1-async", add_one, &Q);

        let req = 9;
        let mut resp = 0;
        {
            let mut call = std::pin::pin!(AsyncCall::new(&req, &mut resp));
            ADD1.call_async(call.as_mut(), Timeout::NoWait).unwrap();

            // Nothing has run yet; the event is parked in the queue.
            assert_eq!(Q.len(), 1);
            assert_eq!(Q.process(Timeout::NoWait).unwrap(), 1);

            let code = call.as_mut().wait(Timeout::NoWait).unwrap();
            assert_eq!(code, 0);
        }
        assert_eq!(resp, 10);
    }

    /// Waiting on an unlaunched context is a structural error.
    #[test]
    fn test_wait_before_launch() {
        let req = 1;
        let mut resp = 0;
        let mut call = std::pin::pin!(AsyncCall::<i32, i32>::new(&req, &mut resp));
        assert_eq!(
            call.as_mut().wait(Timeout::NoWait),
            Err(Error::InvalidArgument)
        );
    }

    /// A full method queue surfaces backpressure to the async caller.
    #[test]
    fn test_async_overflow() {
        static Q: MessageQueue<CallHandle, 1> = MessageQueue::new();
        static SLOW: Method<i32, i32> = Method::queued("slow", add_one, &Q);

        let req = 1;
        let mut resp_a = 0;
        let mut resp_b = 0;
        let mut call_a = std::pin::pin!(AsyncCall::new(&req, &mut resp_a));
        let mut call_b = std::pin::pin!(AsyncCall::new(&req, &mut resp_b));

        SLOW.call_async(call_a.as_mut(), Timeout::NoWait).unwrap();
        assert_eq!(
            SLOW.call_async(call_b.as_mut(), Timeout::NoWait),
            Err(Error::WouldBlock)
        );

        // Drain so the launched context can complete and drop safely.
        assert_eq!(Q.process(Timeout::NoWait).unwrap(), 1);
        assert_eq!(call_a.as_mut().wait(Timeout::NoWait), Ok(0));
    }

    /// The dispatcher rejects a context whose recorded sizes disagree with
    /// the method's types, without running the handler.
    #[test]
    fn test_size_mismatch_rejected() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);
        fn never(_req: &i32, _resp: &mut i32) -> i32 {
            RUNS.fetch_add(1, Ordering::Relaxed);
            0
        }

        let req = 5i32;
        let mut resp = 0i32;
        let mut core = CallCore::new(&req, &mut resp, never);
        // Sabotage the recorded request size the way a mismatched erased
        // caller would.
        core.req_size = 1;
        let handle = CallHandle {
            core: NonNull::from(&core),
        };
        handle.complete();
        assert_eq!(core.conclude(Deadline::NoWait), Err(Error::InvalidArgument));
        assert_eq!(RUNS.load(Ordering::Relaxed), 0);
    }
}
