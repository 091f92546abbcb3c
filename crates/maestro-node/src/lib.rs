//! `maestro-node` – the on-device node runtime.
//!
//! Speaks the `serial-line-v1` protocol, validates and type-checks every
//! `RUN` against the node's own manifest, dispatches to the bound device
//! handler, and self-stops on command silence. The runtime never crashes the
//! line handler; every failure degrades to an `ERR` reply.
//!
//! # Modules
//!
//! - [`device`] – the [`Device`] trait every actuator backend implements,
//!   plus [`DispatchError`].
//! - [`dispatch`] – [`DispatchTable`]: the build-time token → (spec, handler)
//!   lookup shared with the manifest so the two cannot drift.
//! - [`governor`] – [`SafetyGovernor`]: rate limiting and the stale-command
//!   watchdog, the single most important correctness property of a node.
//! - [`runtime`] – [`NodeRuntime`] + per-connection [`Session`]: the line
//!   handler state machine.
//! - [`server`] – Tokio TCP server exposing a runtime on `host:port` with a
//!   periodic telemetry publisher and the watchdog tick task.
//! - [`emulated`] – in-process emulated devices (drive base, gripper arm)
//!   used by tests, demos, and the `maestro-emulator` binary.

pub mod device;
pub mod dispatch;
pub mod emulated;
pub mod governor;
pub mod runtime;
pub mod server;

pub use device::{Device, DispatchError};
pub use dispatch::DispatchTable;
pub use governor::SafetyGovernor;
pub use runtime::{NodeRuntime, NodeSetupError, Session};
pub use server::NodeServer;
