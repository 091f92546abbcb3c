//! `maestro-client` – orchestrator-side connection to one node.
//!
//! Each [`NodeClient`] owns one long-lived TCP socket. A single reader task
//! classifies every inbound line by prefix: `TELEMETRY` lines go to the
//! broadcast channel (tagged with the node's alias), everything else
//! resolves the oldest pending command exchange. Writes are serialized so at
//! most one `RUN`/`STOP` is in flight per node at a time.

pub mod client;
pub mod error;

pub use client::{ConnectionState, NodeClient};
pub use error::ClientError;
