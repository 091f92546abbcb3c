//! [`Orchestrator`] – one facade over the whole fleet.
//!
//! Owns one [`NodeClient`] per configured endpoint (declaration order),
//! rebuilds the fused [`Catalog`] after every connect pass, and funnels all
//! plan execution through a single in-flight gate so no two plans can
//! interleave commands on the wire.

use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use maestro_client::{ClientError, NodeClient};
use maestro_types::Plan;

use crate::catalog::{Catalog, NodeSnapshot};
use crate::executor::{self, CancelFlag, ExecutionError, StepReport};
use crate::planner::{self, Expansion, PlannerClient};
use crate::validator::{self, ValidationError};

/// One `alias=host:port` endpoint from the CLI or config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub alias: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid node endpoint '{0}', expected alias=host:port")]
pub struct EndpointParseError(String);

impl FromStr for NodeEndpoint {
    type Err = EndpointParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (alias, endpoint) = raw
            .split_once('=')
            .ok_or_else(|| EndpointParseError(raw.to_string()))?;
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError(raw.to_string()))?;
        if alias.is_empty() || host.is_empty() {
            return Err(EndpointParseError(raw.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointParseError(raw.to_string()))?;
        Ok(Self {
            alias: alias.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl NodeEndpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors surfaced by the facade's plan pipeline.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Another plan is already executing.
    #[error("a plan is already executing")]
    Busy,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Neither the remote planner nor the macro vocabulary produced a plan.
    #[error("instruction '{0}' was not recognised")]
    Unrecognized(String),
}

/// Timeouts applied fleet-wide; generous because first connects can sit
/// behind slow name resolution and a single slow `RUN` should not fail a
/// whole plan.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub step: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(7),
            step: Duration::from_secs(4),
        }
    }
}

pub struct Orchestrator {
    endpoints: Vec<NodeEndpoint>,
    clients: Vec<Arc<NodeClient>>,
    catalog: RwLock<Catalog>,
    timeouts: Timeouts,
    planner: Option<PlannerClient>,
    /// Held for the whole of one plan; `try_lock` failure means busy.
    exec_gate: tokio::sync::Mutex<()>,
    /// Cancel flag of the currently running plan, renewed per plan.
    cancel: StdMutex<CancelFlag>,
}

impl Orchestrator {
    pub fn new(endpoints: Vec<NodeEndpoint>, timeouts: Timeouts) -> Self {
        let clients = endpoints
            .iter()
            .map(|endpoint| Arc::new(NodeClient::new(&endpoint.alias, &endpoint.addr())))
            .collect();
        Self {
            endpoints,
            clients,
            catalog: RwLock::new(Catalog::default()),
            timeouts,
            planner: None,
            exec_gate: tokio::sync::Mutex::new(()),
            cancel: StdMutex::new(CancelFlag::new()),
        }
    }

    /// Route instructions through an external planner before falling back to
    /// the macro vocabulary (builder-style).
    pub fn with_planner(mut self, url: &str) -> Self {
        self.planner = Some(PlannerClient::new(url));
        self
    }

    pub fn endpoints(&self) -> &[NodeEndpoint] {
        &self.endpoints
    }

    pub fn clients(&self) -> &[Arc<NodeClient>] {
        &self.clients
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
            .read()
            .map(|catalog| catalog.clone())
            .unwrap_or_default()
    }

    /// Connect and fetch the manifest of every configured node, in
    /// declaration order. Offline nodes stay disconnected and the process
    /// keeps running (degraded mode); the fused catalog is rebuilt either
    /// way. Returns the per-node failures.
    pub async fn connect_all(&self) -> Vec<(String, ClientError)> {
        let mut failures = Vec::new();
        for client in &self.clients {
            match self.connect_one(client).await {
                Ok(manifest) => {
                    info!(
                        node = client.alias(),
                        commands = manifest
                            .commands
                            .iter()
                            .map(|c| c.token.as_str())
                            .collect::<Vec<_>>()
                            .join(","),
                        "node connected"
                    );
                }
                Err(err) => {
                    warn!(node = client.alias(), %err, "node connect failed");
                    failures.push((client.alias().to_string(), err));
                }
            }
        }
        self.rebuild_catalog();
        if !failures.is_empty() {
            warn!(nodes_failed = failures.len(), "running degraded");
        }
        failures
    }

    async fn connect_one(
        &self,
        client: &Arc<NodeClient>,
    ) -> Result<maestro_types::Manifest, ClientError> {
        client.connect(self.timeouts.connect).await?;
        client.fetch_manifest(self.timeouts.connect).await
    }

    /// Reconnect a single node by alias and rebuild the catalog.
    pub async fn reconnect(&self, alias: &str) -> Result<(), ClientError> {
        let client = self
            .clients
            .iter()
            .find(|client| client.alias() == alias)
            .ok_or_else(|| ClientError::Disconnected(format!("unknown node '{alias}'")))?;
        let result = self.connect_one(client).await.map(|_| ());
        self.rebuild_catalog();
        result
    }

    fn rebuild_catalog(&self) {
        let snapshots = self.snapshots();
        if let Ok(mut catalog) = self.catalog.write() {
            *catalog = Catalog::build(&snapshots);
        }
    }

    /// Point-in-time view of the fleet, detached from the live connections.
    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.clients
            .iter()
            .map(|client| NodeSnapshot {
                alias: client.alias().to_string(),
                connected: client.is_connected(),
                manifest: client.manifest(),
            })
            .collect()
    }

    /// Planner-facing fused manifest. Aliases become the node names so a
    /// planner's targets are always resolvable; device names survive as
    /// display names.
    pub fn merged_manifest(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .clients
            .iter()
            .map(|client| {
                let manifest = client.manifest();
                json!({
                    "name": client.alias(),
                    "node_id": manifest
                        .as_ref()
                        .map(|m| m.device.node_id.clone())
                        .unwrap_or_else(|| client.alias().to_string()),
                    "display_name": manifest
                        .as_ref()
                        .map(|m| m.device.name.clone())
                        .unwrap_or_else(|| client.alias().to_string()),
                    "commands": manifest
                        .as_ref()
                        .map(|m| serde_json::to_value(&m.commands).unwrap_or_default())
                        .unwrap_or_else(|| json!([])),
                    "telemetry": manifest
                        .as_ref()
                        .map(|m| serde_json::to_value(&m.telemetry).unwrap_or_default())
                        .unwrap_or_else(|| json!({})),
                })
            })
            .collect();
        json!({
            "daemon_version": "0.1",
            "nodes": nodes,
        })
    }

    /// Latest telemetry per node, keyed by alias.
    pub fn telemetry_snapshot(&self) -> serde_json::Value {
        let mut snapshot = serde_json::Map::new();
        for client in &self.clients {
            snapshot.insert(
                client.alias().to_string(),
                serde_json::to_value(client.telemetry_snapshot()).unwrap_or_default(),
            );
        }
        serde_json::Value::Object(snapshot)
    }

    /// Turn an instruction into a plan: remote planner first when
    /// configured, macro vocabulary otherwise. The result still goes
    /// through validation in [`execute_plan`](Self::execute_plan).
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Unrecognized`] when no planner produces a plan.
    pub async fn make_plan(
        &self,
        instruction: &str,
        correlation_id: &str,
    ) -> Result<Plan, OrchestratorError> {
        if let Some(remote) = &self.planner {
            match remote
                .plan(
                    instruction,
                    &self.merged_manifest(),
                    &self.telemetry_snapshot(),
                    correlation_id,
                )
                .await
            {
                Ok(plan) => return Ok(plan),
                Err(err) => warn!(correlation_id, %err, "planner fallback"),
            }
        }
        match planner::expand(instruction) {
            Expansion::Plan(plan) => Ok(plan),
            Expansion::Unrecognized => {
                Err(OrchestratorError::Unrecognized(instruction.to_string()))
            }
        }
    }

    /// Validate a plan against the current fleet without executing it.
    pub fn validate(&self, plan: &Plan) -> Result<(), ValidationError> {
        let snapshots = self.snapshots();
        let catalog = self.catalog();
        validator::validate(plan, &snapshots, &catalog)
    }

    /// Validate and execute one plan end to end.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Busy`] when another plan is already in flight;
    /// validation and execution failures pass through.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        correlation_id: &str,
    ) -> Result<Vec<StepReport>, OrchestratorError> {
        let _gate = self
            .exec_gate
            .try_lock()
            .map_err(|_| OrchestratorError::Busy)?;

        self.validate(plan)?;

        let cancel = CancelFlag::new();
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = cancel.clone();
        }

        info!(correlation_id, plan_len = plan.len(), "plan start");
        let catalog = self.catalog();
        let reports =
            executor::execute(plan, &self.clients, &catalog, self.timeouts.step, &cancel).await?;
        info!(correlation_id, plan_len = plan.len(), "plan ok");
        Ok(reports)
    }

    /// Best-effort `STOP` to every connected node, preempting any running
    /// plan first. Callable at any time, never blocks behind a stuck plan.
    pub async fn emergency_stop(&self) {
        if let Ok(slot) = self.cancel.lock() {
            slot.cancel();
        }
        executor::panic_stop(&self.clients).await;
    }

    /// Close every connection without stopping devices.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            client.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parses_alias_host_port() {
        let endpoint: NodeEndpoint = "base=127.0.0.1:7777".parse().unwrap();
        assert_eq!(endpoint.alias, "base");
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 7777);
        assert_eq!(endpoint.addr(), "127.0.0.1:7777");
    }

    #[test]
    fn endpoint_allows_colons_in_host() {
        // rsplit keeps IPv6-ish hosts intact.
        let endpoint: NodeEndpoint = "base=fe80::1:7777".parse().unwrap();
        assert_eq!(endpoint.host, "fe80::1");
        assert_eq!(endpoint.port, 7777);
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        for raw in ["base", "=127.0.0.1:7777", "base=:7777", "base=h:notaport"] {
            assert!(raw.parse::<NodeEndpoint>().is_err(), "{raw} should fail");
        }
    }

    #[tokio::test]
    async fn offline_fleet_connects_degraded() {
        let endpoints = vec![
            "base=127.0.0.1:1".parse().unwrap(),
            "arm=127.0.0.1:2".parse().unwrap(),
        ];
        let orchestrator = Orchestrator::new(
            endpoints,
            Timeouts {
                connect: Duration::from_millis(200),
                step: Duration::from_millis(200),
            },
        );
        let failures = orchestrator.connect_all().await;
        assert_eq!(failures.len(), 2);
        assert!(orchestrator.catalog().is_empty());
        // The facade still answers status-style queries.
        let manifest = orchestrator.merged_manifest();
        assert_eq!(manifest["nodes"].as_array().unwrap().len(), 2);
    }
}
