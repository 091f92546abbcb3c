//! The [`Device`] trait – the seam between the protocol runtime and the
//! actual actuator backend.
//!
//! Device state is an explicit per-node instance passed by reference through
//! the dispatch table, never process-wide globals, so multiple emulated
//! nodes can coexist inside one test process.

use thiserror::Error;

/// Failure surfaced by a bound command handler.
///
/// Argument arity, typing, and range violations are caught by the dispatch
/// table before a handler runs, so a handler normally only ever returns
/// [`DispatchError::Internal`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown token")]
    BadToken,

    #[error("invalid arguments")]
    BadArgs,

    #[error("argument out of bounds")]
    Range,

    #[error("internal dispatch failure")]
    Internal,
}

/// An actuator backend driven by the node runtime.
///
/// Implementations hold whatever mutable output state the hardware needs
/// (throttle, heading, grip position). The runtime only requires two things:
/// a way to force outputs to a safe neutral value, and an optional set of
/// telemetry pairs to stream.
pub trait Device: Send + 'static {
    /// Force every output to its safe zero/neutral value. Called on `STOP`
    /// and by the watchdog; must be idempotent.
    fn neutral(&mut self);

    /// Current telemetry pairs, streamed as `TELEMETRY k=v ...` lines.
    fn telemetry(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}
