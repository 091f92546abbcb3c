//! `maestro-types` – shared data model for the MAESTRO stack.
//!
//! Every other crate speaks in terms of the types defined here, so the node
//! runtime, the orchestrator-side client, and the planner contract can never
//! drift apart.
//!
//! # Modules
//!
//! - [`manifest`] – the device manifest schema ([`Manifest`], [`CommandSpec`],
//!   [`ArgSpec`], [`SafetySpec`]) plus [`Manifest::parse_and_validate`].
//! - [`plan`] – the plan schema ([`Plan`], [`Step`], [`ArgValue`]) exchanged
//!   with planners and the HTTP control plane.
//! - [`protocol`] – the `serial-line-v1` wire codec ([`Request`], [`Reply`]),
//!   shared verbatim between the node runtime and the node client.
//! - [`telemetry`] – ephemeral [`TelemetrySample`] values demultiplexed from
//!   node connections.

pub mod manifest;
pub mod plan;
pub mod protocol;
pub mod telemetry;

pub use manifest::{
    ArgSpec, ArgType, CommandSpec, DeviceInfo, Manifest, ManifestError, SafetySpec,
    TelemetryKey, TelemetrySpec, TransportSpec,
};
pub use plan::{ArgValue, Plan, Step};
pub use protocol::{ErrCode, ProtocolError, Reply, Request};
pub use telemetry::TelemetrySample;
