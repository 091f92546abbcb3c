//! Device manifest schema and validation.
//!
//! A manifest is generated once per node at firmware build time and is
//! immutable at runtime; the orchestrator re-fetches it only on reconnect.
//! [`Manifest::parse_and_validate`] is the single entry point for turning a
//! raw `MANIFEST <json>` payload into a trusted [`Manifest`].

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate command token '{0}'")]
    DuplicateToken(String),

    #[error("command '{token}' arg '{arg}' declares min {min} > max {max}")]
    InvertedRange {
        token: String,
        arg: String,
        min: f64,
        max: f64,
    },
}

/// Declared type of a single command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Int,
    Float,
    String,
    Bool,
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgType::Int => write!(f, "int"),
            ArgType::Float => write!(f, "float"),
            ArgType::String => write!(f, "string"),
            ArgType::Bool => write!(f, "bool"),
        }
    }
}

/// One positional argument of a command. Argument order is significant and
/// fixed at manifest-generation time; it defines positional binding for
/// `RUN <TOKEN> <arg>...`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Safety profile attached to every command.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SafetySpec {
    #[serde(default = "default_rate_limit_hz")]
    pub rate_limit_hz: u32,
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    #[serde(default = "default_clamp")]
    pub clamp: bool,
}

fn default_rate_limit_hz() -> u32 {
    20
}
fn default_watchdog_ms() -> u64 {
    500
}
fn default_clamp() -> bool {
    true
}

impl Default for SafetySpec {
    fn default() -> Self {
        Self {
            rate_limit_hz: default_rate_limit_hz(),
            watchdog_ms: default_watchdog_ms(),
            clamp: default_clamp(),
        }
    }
}

/// One command a node exposes: a wire token, positional args, and a safety
/// profile. Tokens are unique within a single node's manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    pub token: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    #[serde(default)]
    pub safety: SafetySpec,
}

impl CommandSpec {
    /// Number of args that must be supplied.
    pub fn required_args(&self) -> usize {
        self.args.iter().filter(|a| a.required).count()
    }
}

/// Device identity block.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub node_id: String,
}

/// One telemetry key a node may stream (`TELEMETRY <key>=<value>`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TelemetryKey {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: ArgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TelemetrySpec {
    #[serde(default)]
    pub keys: Vec<TelemetryKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransportSpec {
    #[serde(rename = "type")]
    pub transport_type: String,
}

impl Default for TransportSpec {
    fn default() -> Self {
        Self {
            transport_type: "serial-line-v1".to_string(),
        }
    }
}

/// A node's complete, build-time command catalog.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub daemon_version: String,
    pub device: DeviceInfo,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub telemetry: TelemetrySpec,
    #[serde(default)]
    pub transport: TransportSpec,
}

impl Manifest {
    /// Parse a raw JSON manifest payload and enforce the structural
    /// invariants the rest of the stack relies on.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::Json`] – payload is not a valid manifest document.
    /// - [`ManifestError::DuplicateToken`] – two commands share a token.
    /// - [`ManifestError::InvertedRange`] – an arg declares `min > max`.
    ///
    /// Args missing a declared type are rejected at the JSON layer because
    /// [`ArgSpec::arg_type`] is a required field.
    pub fn parse_and_validate(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        manifest.ensure_valid()?;
        Ok(manifest)
    }

    /// Enforce the structural invariants on an already-parsed manifest.
    /// Used by the node runtime on programmatically built manifests.
    pub fn ensure_valid(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for command in &self.commands {
            let token = command.token.to_uppercase();
            if !seen.insert(token.clone()) {
                return Err(ManifestError::DuplicateToken(token));
            }
            for arg in &command.args {
                if let (Some(min), Some(max)) = (arg.min, arg.max) {
                    if min > max {
                        return Err(ManifestError::InvertedRange {
                            token: command.token.clone(),
                            arg: arg.name.clone(),
                            min,
                            max,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a command by token, case-insensitively.
    pub fn command(&self, token: &str) -> Option<&CommandSpec> {
        self.commands
            .iter()
            .find(|c| c.token.eq_ignore_ascii_case(token))
    }
}
