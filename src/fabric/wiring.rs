//! Build-time wiring.
//!
//! Connections declared with [`wire!`](crate::wire) land in a linker-section
//! registry; [`init`] walks it once at startup and appends every declared
//! edge to its source. Runtime wiring reuses the same append operation
//! through [`connect`], so the graph looks identical either way.

use linkme::distributed_slice;

use crate::error::Result;
use crate::fabric::connection::Connection;
use crate::fabric::source::Source;

/// Registration thunks collected from every [`wire!`](crate::wire) use in
/// the final binary. Each thunk performs one `connect`.
#[distributed_slice]
pub static WIRING: [fn()];

/// Walks the wiring registry and registers every declared connection.
/// Idempotent: repeated calls are no-ops, so any thread may run it at boot.
pub fn init() {
    static ONCE: spin::Once = spin::Once::new();
    ONCE.call_once(|| {
        for register in WIRING.iter() {
            register();
        }
        log::info!("fabric wiring initialized: {} connection(s)", WIRING.len());
    });
}

/// Registers an edge from `source` to the sink named by `conn`.
///
/// The connection record must outlive the graph: a `static`, or storage
/// leaked for the program's lifetime. Fails with `InvalidArgument` if the
/// record is already part of a list.
pub fn connect<T: Clone + Send + 'static>(
    source: &'static Source<T>,
    conn: &'static Connection<T>,
) -> Result<()> {
    source.attach(conn)?;
    log::debug!("fabric: connection registered");
    Ok(())
}

/// Unregisters a previously connected edge.
///
/// The record stays valid for emits already traversing it and may be reused
/// by a later `connect` once those have drained.
#[cfg(feature = "runtime-wiring")]
pub fn disconnect<T: Clone + Send + 'static>(
    source: &'static Source<T>,
    conn: &'static Connection<T>,
) -> Result<()> {
    source.detach(conn)?;
    log::debug!("fabric: connection removed");
    Ok(())
}

/// Declares a connection `static` and registers it for [`init`].
///
/// ```ignore
/// wire!(static TAP_WIRE: u32 = TELEMETRY => TAP);
/// ```
///
/// expands to a `Connection<u32>` static named `TAP_WIRE` plus a wiring
/// thunk that connects `TELEMETRY` to `TAP` when `weave::init()` runs.
#[macro_export]
macro_rules! wire {
    ($(#[$attr:meta])* static $conn:ident : $payload:ty = $source:path => $sink:path) => {
        $(#[$attr])*
        static $conn: $crate::Connection<$payload> = $crate::Connection::new(&$sink);

        $crate::__private::paste! {
            #[$crate::__private::distributed_slice($crate::fabric::wiring::WIRING)]
            #[linkme(crate = $crate::__private::linkme)]
            static [<__WEAVE_WIRE_ $conn>]: fn() = || {
                let _ = $crate::connect(&$source, &$conn);
            };
        }
    };
}
