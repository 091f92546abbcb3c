//! [`NodeRuntime`] – the protocol state machine of one node.
//!
//! Per connection: `IDLE → (HELLO) → HANDSHAKEN → (READ_MANIFEST | RUN |
//! STOP)* → IDLE`. The handshake flag lives in a per-connection [`Session`];
//! the safety state (rate window, watchdog) is node-wide because it guards a
//! single physical actuator set regardless of which connection commanded it.

use std::time::Instant;

use maestro_types::{ErrCode, Manifest, ManifestError, ProtocolError, Reply, Request};
use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{Device, DispatchError};
use crate::dispatch::DispatchTable;
use crate::governor::SafetyGovernor;

/// Errors while assembling a runtime, before any connection is accepted.
#[derive(Debug, Error)]
pub enum NodeSetupError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("manifest command '{0}' has no bound handler")]
    MissingBinding(String),

    #[error("manifest could not be serialised: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-connection protocol state, constructed fresh per connection and
/// destroyed on disconnect.
#[derive(Debug, Default)]
pub struct Session {
    handshaken: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handshaken(&self) -> bool {
        self.handshaken
    }
}

/// One node: a manifest, its dispatch table, the device instance, and the
/// safety governor.
#[derive(Debug)]
pub struct NodeRuntime<D: Device> {
    manifest: Manifest,
    manifest_json: String,
    table: DispatchTable<D>,
    device: D,
    governor: SafetyGovernor,
}

impl<D: Device> NodeRuntime<D> {
    /// Assemble a runtime, verifying that every manifest command has a bound
    /// handler so the manifest and the dispatch table cannot drift.
    pub fn new(
        manifest: Manifest,
        table: DispatchTable<D>,
        device: D,
    ) -> Result<Self, NodeSetupError> {
        manifest.ensure_valid()?;
        for command in &manifest.commands {
            if !table.contains(&command.token) {
                return Err(NodeSetupError::MissingBinding(command.token.clone()));
            }
        }
        let manifest_json = serde_json::to_string(&manifest)?;
        let governor = SafetyGovernor::from_manifest(&manifest);
        Ok(Self {
            manifest,
            manifest_json,
            table,
            device,
            governor,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Current telemetry pairs from the device.
    pub fn telemetry_pairs(&self) -> Vec<(String, String)> {
        self.device.telemetry()
    }

    /// Handle one inbound line and produce exactly one reply line. Never
    /// panics; malformed input degrades to `ERR BAD_REQUEST <reason>`.
    pub fn handle_line(&mut self, session: &mut Session, line: &str, now: Instant) -> Reply {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(node = %self.manifest.device.name, %err, "bad request line");
                return Reply::Err {
                    code: ErrCode::BadRequest,
                    detail: bad_request_detail(&err),
                };
            }
        };

        match request {
            Request::Hello => {
                // Resets the connected flag only; the watchdog clock is
                // untouched so a reconnect cannot mask stale outputs.
                session.handshaken = true;
                Reply::Ok
            }

            // STOP is always available, handshaken or not.
            Request::Stop => {
                self.device.neutral();
                self.governor.disarm(now);
                Reply::Ok
            }

            Request::ReadManifest if !session.handshaken => handshake_required(),
            Request::ReadManifest => Reply::Manifest(self.manifest_json.clone()),

            Request::Run { .. } if !session.handshaken => handshake_required(),
            Request::Run { token, args } => self.handle_run(&token, &args, now),
        }
    }

    fn handle_run(&mut self, token: &str, args: &[String], now: Instant) -> Reply {
        if self.governor.too_fast(now) {
            return Reply::Err {
                code: ErrCode::RateLimit,
                detail: "too_fast".to_string(),
            };
        }

        match self.table.dispatch(&mut self.device, token, args) {
            Ok(()) => {
                self.governor.accept(now);
                Reply::Ok
            }
            Err(DispatchError::BadToken) => Reply::Err {
                code: ErrCode::BadToken,
                detail: "unknown".to_string(),
            },
            Err(DispatchError::BadArgs) => Reply::Err {
                code: ErrCode::BadArgs,
                detail: "invalid".to_string(),
            },
            Err(DispatchError::Range) => Reply::Err {
                code: ErrCode::Range,
                detail: "out_of_bounds".to_string(),
            },
            Err(DispatchError::Internal) => {
                warn!(node = %self.manifest.device.name, token, "handler failed");
                Reply::Err {
                    code: ErrCode::Internal,
                    detail: "dispatch_failed".to_string(),
                }
            }
        }
    }

    /// Watchdog tick, called on a fixed period independent of protocol
    /// traffic. Returns `true` when stale outputs were just neutralised.
    pub fn watchdog_tick(&mut self, now: Instant) -> bool {
        if self.governor.tick(now) {
            warn!(node = %self.manifest.device.name, "watchdog fired, outputs neutralised");
            self.device.neutral();
            true
        } else {
            false
        }
    }
}

fn handshake_required() -> Reply {
    Reply::Err {
        code: ErrCode::BadRequest,
        detail: "handshake_required".to_string(),
    }
}

fn bad_request_detail(err: &ProtocolError) -> String {
    match err {
        ProtocolError::EmptyLine => "empty_line".to_string(),
        ProtocolError::MissingToken => "missing_token".to_string(),
        ProtocolError::UnsupportedRequest(_) => "unsupported".to_string(),
        _ => "malformed".to_string(),
    }
}
