//! Ephemeral telemetry samples.
//!
//! Samples are demultiplexed live from node connections and broadcast to
//! subscribers; they are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `key=value` observation from one node, tagged with the alias of the
/// connection it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub node_alias: String,
    pub key: String,
    pub value: String,
    pub observed_at: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn now(node_alias: &str, key: &str, value: &str) -> Self {
        Self {
            node_alias: node_alias.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            observed_at: Utc::now(),
        }
    }
}
