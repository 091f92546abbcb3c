//! Instruction planning: a remote planner when configured, a deterministic
//! macro planner otherwise.
//!
//! [`expand`] is a pure function over a small fixed vocabulary and never
//! touches the network. Macros are generated data (pattern, repeat count,
//! turn direction), not hand-unrolled step lists, so they stay trivially
//! unit-testable. [`PlannerClient`] posts the instruction plus the fused
//! system manifest to an external service; any transport or shape failure
//! makes the caller fall back to [`expand`].

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use maestro_types::{ArgValue, Plan, Step};

/// Default aliases the macro vocabulary routes to; the operator's CLI
/// aliases are expected to match the reference fleet.
const BASE_ALIAS: &str = "base";
const ARM_ALIAS: &str = "arm";

const CRUISE_SPEED: f64 = 0.6;
const EDGE_MS: u64 = 1200;
const TURN_MS: u64 = 800;

/// Result of macro expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Plan(Plan),
    /// No clause of the instruction matched the vocabulary.
    Unrecognized,
}

/// Expand a canned instruction into a concrete, time-boxed plan.
///
/// Recognised vocabulary: `square`, `left square`, `triangle`, `straight
/// line`, `forward`, `turn left`/`turn right`, gripper `open`/`close`,
/// `home`, and `stop`. Compound instructions split on `then` and commas and
/// expand clause by clause. Every produced plan ends with `STOP`.
pub fn expand(instruction: &str) -> Expansion {
    let text = instruction.to_lowercase();
    let text = text.trim();
    let normalized = text.replace(',', " then ");
    let clauses: Vec<&str> = normalized
        .split("then")
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .collect();

    // "left square then triangle" turns every shape left.
    let prefer_left = text.contains("left");

    let mut steps: Vec<Step> = Vec::new();
    for clause in if clauses.is_empty() { vec![text] } else { clauses } {
        expand_clause(clause, prefer_left, &mut steps);
    }

    if steps.is_empty() {
        if text.contains("stop") {
            return Expansion::Plan(Plan::new(vec![Step::Stop]));
        }
        return Expansion::Unrecognized;
    }
    steps.push(Step::Stop);
    Expansion::Plan(Plan::new(steps))
}

fn expand_clause(clause: &str, prefer_left: bool, steps: &mut Vec<Step>) {
    let turn_left = prefer_left || clause.contains("left");

    if clause.contains("square") {
        steps.extend(polygon(4, 90, turn_left));
        return;
    }
    if clause.contains("triangle") {
        steps.extend(polygon(3, 120, turn_left));
        return;
    }
    if clause.contains("straight line") {
        steps.push(drive_forward(2000));
        return;
    }

    if clause.contains("forward") {
        steps.push(drive_forward(EDGE_MS));
    }
    if clause.contains("turn left") || format!(" {clause}").contains(" left") {
        steps.push(turn(-90));
    } else if clause.contains("right") {
        steps.push(turn(90));
    }

    if clause.contains("open") {
        steps.push(grip("open"));
    }
    if clause.contains("close") {
        steps.push(grip("close"));
    }
    if clause.contains("home") {
        steps.push(Step::run(ARM_ALIAS, "HOME", vec![], None));
    }
}

/// One closed polygon: `sides` × (drive an edge, turn an exterior angle).
fn polygon(sides: u32, exterior_deg: i64, turn_left: bool) -> Vec<Step> {
    let degrees = if turn_left {
        -exterior_deg
    } else {
        exterior_deg
    };
    let mut steps = Vec::with_capacity(sides as usize * 2);
    for _ in 0..sides {
        steps.push(drive_forward(EDGE_MS));
        steps.push(Step::run(
            BASE_ALIAS,
            "TURN",
            vec![ArgValue::Int(degrees)],
            Some(TURN_MS),
        ));
    }
    steps
}

fn drive_forward(duration_ms: u64) -> Step {
    Step::run(
        BASE_ALIAS,
        "FWD",
        vec![ArgValue::Float(CRUISE_SPEED)],
        Some(duration_ms),
    )
}

fn turn(degrees: i64) -> Step {
    Step::run(
        BASE_ALIAS,
        "TURN",
        vec![ArgValue::Int(degrees)],
        Some(TURN_MS),
    )
}

fn grip(state: &str) -> Step {
    Step::run(
        ARM_ALIAS,
        "GRIP",
        vec![ArgValue::Str(state.to_string())],
        None,
    )
}

// ---------------------------------------------------------------------------
// Remote planner client
// ---------------------------------------------------------------------------

/// Errors from the remote planner exchange. Every variant means the same
/// thing to the caller: fall back to [`expand`].
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("planner response missing plan[]: {0}")]
    BadResponse(String),
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    instruction: &'a str,
    system_manifest: &'a serde_json::Value,
    telemetry_snapshot: &'a serde_json::Value,
    correlation_id: &'a str,
}

/// Async client for an external planning service.
///
/// Construct once and reuse; the connection pool lives in the inner
/// `reqwest::Client`.
pub struct PlannerClient {
    url: String,
    client: reqwest::Client,
}

impl PlannerClient {
    /// `url` is the full plan endpoint, e.g. `http://pi.local:8090/plan`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Ask the remote planner to turn `instruction` into a plan.
    ///
    /// The returned plan is untrusted and must be validated before
    /// execution.
    ///
    /// # Errors
    ///
    /// [`PlannerError::Http`] on transport or status failures,
    /// [`PlannerError::BadResponse`] when the body does not parse as
    /// `{"plan":[...]}`.
    pub async fn plan(
        &self,
        instruction: &str,
        system_manifest: &serde_json::Value,
        telemetry_snapshot: &serde_json::Value,
        correlation_id: &str,
    ) -> Result<Plan, PlannerError> {
        debug!(url = %self.url, correlation_id, "remote planner request");
        let body = PlanRequest {
            instruction,
            system_manifest,
            telemetry_snapshot,
            correlation_id,
        };
        let raw = self
            .client
            .post(&self.url)
            .header("X-Correlation-Id", correlation_id)
            .timeout(Duration::from_secs(5))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let plan: Plan =
            serde_json::from_str(&raw).map_err(|err| PlannerError::BadResponse(err.to_string()))?;
        if plan.is_empty() {
            return Err(PlannerError::BadResponse("empty plan".to_string()));
        }
        Ok(plan)
    }
}
