//! `maestro-bridge` – HTTP control plane over one [`Orchestrator`].
//!
//! Four routes: `POST /execute_plan`, `POST /stop`, `GET /status`,
//! `GET /telemetry`. A second `/execute_plan` while one plan runs is
//! rejected `409`; `/stop` preempts the running plan and never queues behind
//! it. Correlation ids are accepted via the request body or the
//! `X-Correlation-Id` header and echoed in every response.

use std::io;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use maestro_orchestrator::{Orchestrator, OrchestratorError};
use maestro_types::{Plan, Step};

/// Build the control-plane router around a shared orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/execute_plan", post(execute_plan))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/telemetry", get(telemetry))
        .with_state(orchestrator)
}

/// Serve the control plane until the listener fails.
pub async fn serve(orchestrator: Arc<Orchestrator>, listener: TcpListener) -> io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "http bridge listening");
    axum::serve(listener, router(orchestrator)).await
}

#[derive(Deserialize)]
struct ExecuteRequest {
    plan: Vec<Step>,
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct StopRequest {
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    correlation_id: String,
}

fn fresh_correlation_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("orch-{}", &hex[..12])
}

fn correlation_id(headers: &HeaderMap, from_body: Option<String>) -> String {
    from_body
        .filter(|id| !id.is_empty())
        .or_else(|| {
            headers
                .get("x-correlation-id")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(fresh_correlation_id)
}

fn error_response(
    status: StatusCode,
    error: String,
    correlation_id: String,
) -> (StatusCode, Json<serde_json::Value>) {
    let body = ErrorBody {
        ok: false,
        error,
        correlation_id,
    };
    (
        status,
        Json(serde_json::to_value(body).unwrap_or_default()),
    )
}

async fn execute_plan(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let correlation_id = correlation_id(&headers, request.correlation_id);
    let plan = Plan::new(request.plan);
    info!(correlation_id, plan_len = plan.len(), "execute_plan request");

    match orchestrator.execute_plan(&plan, &correlation_id).await {
        Ok(results) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "results": results,
                "correlation_id": correlation_id,
            })),
        ),
        Err(OrchestratorError::Busy) => error_response(
            StatusCode::CONFLICT,
            OrchestratorError::Busy.to_string(),
            correlation_id,
        ),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string(), correlation_id),
    }
}

async fn stop(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    // The body is optional; `{}` and an empty body both mean "stop now".
    let from_body = serde_json::from_slice::<StopRequest>(&body)
        .ok()
        .and_then(|request| request.correlation_id);
    let correlation_id = correlation_id(&headers, from_body);
    info!(correlation_id, "stop request");
    orchestrator.emergency_stop().await;
    (
        StatusCode::OK,
        Json(json!({ "ok": true, "correlation_id": correlation_id })),
    )
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    let endpoints = orchestrator.endpoints();
    let nodes: Vec<serde_json::Value> = orchestrator
        .clients()
        .iter()
        .zip(endpoints)
        .map(|(client, endpoint)| {
            let manifest = client.manifest();
            json!({
                "alias": client.alias(),
                "name": manifest
                    .as_ref()
                    .map(|m| m.device.name.clone())
                    .unwrap_or_else(|| client.alias().to_string()),
                "node_id": manifest
                    .as_ref()
                    .map(|m| m.device.node_id.clone())
                    .unwrap_or_else(|| client.alias().to_string()),
                "host": endpoint.host,
                "port": endpoint.port,
                "state": client.state().to_string(),
                "connected": client.is_connected(),
                "commands": manifest
                    .as_ref()
                    .map(|m| m.commands.iter().map(|c| c.token.clone()).collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect();

    Json(json!({
        "ok": true,
        "nodes": nodes,
        "system_manifest": orchestrator.merged_manifest(),
    }))
}

async fn telemetry(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "telemetry_snapshot": orchestrator.telemetry_snapshot(),
    }))
}
