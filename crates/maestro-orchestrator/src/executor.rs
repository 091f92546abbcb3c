//! Sequential plan execution with panic-stop.
//!
//! Steps run strictly in order, one at a time, across all nodes; a `RUN`
//! with `duration_ms` holds for that long after a successful `OK` before the
//! next step starts. Any step failure stops every still-connected node and
//! aborts the rest of the plan. A [`CancelFlag`] lets an emergency stop
//! preempt between steps and during duration holds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use maestro_client::NodeClient;
use maestro_types::{Plan, Step};

use crate::catalog::{Catalog, Resolution};

/// STOP can block briefly while a node recovers its downstream link; keep
/// this above the typical reset delay.
pub const PANIC_STOP_TIMEOUT: Duration = Duration::from_millis(2500);

/// Cooperative cancellation shared between a running plan and the control
/// plane.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when [`cancel`](Self::cancel) has been called, however long
    /// ago.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a cancel between the check and the
            // await cannot be missed.
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of one executed step, reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub status: String,
}

/// A plan that did not run to completion.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A step failed; a panic-stop was issued to every still-connected node
    /// before this was returned.
    #[error("step[{index}] failed: {reason}; panic STOP sent")]
    StepFailed {
        index: usize,
        node: Option<String>,
        reason: String,
    },

    /// The plan was preempted by an emergency stop.
    #[error("plan cancelled before step[{index}]")]
    Cancelled { index: usize },
}

/// Run `plan` against `clients`, strictly in order.
///
/// The plan is assumed validated; routing failures at this layer are still
/// reported as step failures rather than panics.
///
/// # Errors
///
/// [`ExecutionError::StepFailed`] on the first failing step (after the
/// panic-stop), [`ExecutionError::Cancelled`] when `cancel` fires between
/// steps or during a duration hold.
pub async fn execute(
    plan: &Plan,
    clients: &[Arc<NodeClient>],
    catalog: &Catalog,
    step_timeout: Duration,
    cancel: &CancelFlag,
) -> Result<Vec<StepReport>, ExecutionError> {
    let mut reports = Vec::with_capacity(plan.len());
    for (index, step) in plan.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            panic_stop(clients).await;
            return Err(ExecutionError::Cancelled { index });
        }
        match step {
            Step::Stop => {
                info!(index, "plan step STOP");
                panic_stop(clients).await;
                reports.push(StepReport {
                    index,
                    node: None,
                    status: "STOP".to_string(),
                });
            }
            Step::Run {
                target,
                token,
                args,
                duration_ms,
            } => {
                let client = match route(target.as_deref(), token, clients, catalog) {
                    Some(client) => client,
                    None => {
                        panic_stop(clients).await;
                        return Err(ExecutionError::StepFailed {
                            index,
                            node: target.clone(),
                            reason: format!("no connected node for token '{token}'"),
                        });
                    }
                };

                info!(
                    index,
                    node = client.alias(),
                    token,
                    ?duration_ms,
                    "plan step RUN"
                );
                if let Err(err) = client.run(token, args, step_timeout).await {
                    warn!(index, node = client.alias(), %err, "step failed");
                    panic_stop(clients).await;
                    return Err(ExecutionError::StepFailed {
                        index,
                        node: Some(client.alias().to_string()),
                        reason: err.to_string(),
                    });
                }
                reports.push(StepReport {
                    index,
                    node: Some(client.alias().to_string()),
                    status: "OK".to_string(),
                });

                if let Some(duration_ms) = duration_ms {
                    let hold = Duration::from_millis(*duration_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(hold) => {}
                        _ = cancel.cancelled() => {
                            panic_stop(clients).await;
                            return Err(ExecutionError::Cancelled { index: index + 1 });
                        }
                    }
                }
            }
        }
    }
    Ok(reports)
}

/// Best-effort `STOP` to every connected node. Failures are logged, never
/// propagated; there is nothing better to do during a panic-stop.
pub async fn panic_stop(clients: &[Arc<NodeClient>]) {
    for client in clients {
        if !client.is_connected() {
            continue;
        }
        match client.stop(PANIC_STOP_TIMEOUT).await {
            Ok(()) => info!(node = client.alias(), "stop sent"),
            Err(err) => warn!(node = client.alias(), %err, "stop warning"),
        }
    }
}

fn route<'a>(
    target: Option<&str>,
    token: &str,
    clients: &'a [Arc<NodeClient>],
    catalog: &Catalog,
) -> Option<&'a Arc<NodeClient>> {
    let alias = match target {
        Some(alias) => alias.to_string(),
        None => match catalog.resolve(token) {
            Resolution::Unique(alias) => alias.to_string(),
            Resolution::Ambiguous(_) | Resolution::Unknown => return None,
        },
    };
    clients
        .iter()
        .find(|client| client.alias() == alias && client.is_connected())
}
