//! Plan validation: every check runs before a single byte reaches hardware.
//!
//! Checks run in a fixed order: plan shape (non-empty, terminal `STOP`,
//! `STOP` nowhere else), then per `RUN` step routing, token existence in the
//! owning node's own manifest, arity, runtime types, numeric ranges, and
//! enum membership. The first failure wins and carries the exact step index.

use maestro_types::{ArgSpec, ArgType, ArgValue, Plan, Step};
use thiserror::Error;

use crate::catalog::{Catalog, NodeSnapshot, Resolution};

/// A plan rejected before execution. `step` is the zero-based index of the
/// offending step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step[{step}] {reason}")]
pub struct ValidationError {
    pub step: usize,
    pub reason: String,
}

impl ValidationError {
    fn new(step: usize, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

/// Validate `plan` against the fused `catalog` and the nodes' own manifests.
///
/// Token existence is checked against the resolved node's manifest, not just
/// the catalog, so a stale catalog or a mistargeted step cannot slip
/// through.
///
/// # Errors
///
/// The first failed check, with its step index and a human-readable reason.
pub fn validate(
    plan: &Plan,
    nodes: &[NodeSnapshot],
    catalog: &Catalog,
) -> Result<(), ValidationError> {
    if plan.is_empty() {
        return Err(ValidationError::new(0, "plan is empty"));
    }
    let last = plan.len() - 1;
    if !matches!(plan.steps[last], Step::Stop) {
        return Err(ValidationError::new(last, "plan must end with STOP"));
    }
    for (index, step) in plan.steps.iter().enumerate() {
        if matches!(step, Step::Stop) && index != last {
            return Err(ValidationError::new(
                index,
                "STOP may only appear as the final step",
            ));
        }
    }

    for (index, step) in plan.steps.iter().enumerate() {
        let Step::Run {
            target,
            token,
            args,
            duration_ms: _,
        } = step
        else {
            continue;
        };
        let token_u = token.to_uppercase();
        if token_u.is_empty() {
            return Err(ValidationError::new(index, "RUN requires a token"));
        }

        let node = resolve_step(index, target.as_deref(), &token_u, nodes, catalog)?;
        let manifest = node.manifest.as_ref().ok_or_else(|| {
            ValidationError::new(index, format!("node '{}' has no manifest", node.alias))
        })?;
        let spec = manifest.command(&token_u).ok_or_else(|| {
            ValidationError::new(
                index,
                format!("token '{token_u}' not found on node '{}'", node.alias),
            )
        })?;

        let required = spec.required_args();
        let total = spec.args.len();
        if args.len() < required || args.len() > total {
            let expected = if required == total {
                format!("{total}")
            } else {
                format!("{required}..{total}")
            };
            return Err(ValidationError::new(
                index,
                format!(
                    "token '{token_u}' expects {expected} args, got {}",
                    args.len()
                ),
            ));
        }

        for (arg_index, (value, arg_spec)) in args.iter().zip(&spec.args).enumerate() {
            check_arg(value, arg_spec).map_err(|reason| {
                ValidationError::new(index, format!("{token_u} arg[{arg_index}] {reason}"))
            })?;
        }
    }
    Ok(())
}

/// Route one `RUN` step to its owning node, without touching the network.
fn resolve_step<'a>(
    index: usize,
    target: Option<&str>,
    token_u: &str,
    nodes: &'a [NodeSnapshot],
    catalog: &Catalog,
) -> Result<&'a NodeSnapshot, ValidationError> {
    if let Some(target) = target {
        let node = nodes
            .iter()
            .find(|node| node.alias == target)
            .ok_or_else(|| ValidationError::new(index, format!("Unknown target '{target}'")))?;
        if !node.connected {
            return Err(ValidationError::new(
                index,
                format!("node '{target}' is not connected"),
            ));
        }
        return Ok(node);
    }

    match catalog.resolve(token_u) {
        Resolution::Unique(alias) => nodes
            .iter()
            .find(|node| node.alias == alias && node.connected)
            .ok_or_else(|| {
                ValidationError::new(index, format!("node '{alias}' is not connected"))
            }),
        Resolution::Ambiguous(_) => Err(ValidationError::new(
            index,
            format!("token '{token_u}' is ambiguous across nodes; explicit target is required"),
        )),
        Resolution::Unknown => Err(ValidationError::new(
            index,
            format!("Token '{token_u}' not found"),
        )),
    }
}

/// Check one runtime value against its declared spec. Integer-valued floats
/// and numeric strings coerce where the planner contract allows it.
fn check_arg(value: &ArgValue, spec: &ArgSpec) -> Result<(), String> {
    let numeric = match spec.arg_type {
        ArgType::Int => match value {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) if v.fract() == 0.0 => Some(*v),
            ArgValue::Str(s) => match s.parse::<i64>() {
                Ok(v) => Some(v as f64),
                Err(_) => return Err("expected int".to_string()),
            },
            _ => return Err("expected int".to_string()),
        },
        ArgType::Float => match value {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            ArgValue::Str(s) => match s.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => return Err("expected float".to_string()),
            },
            _ => return Err("expected float".to_string()),
        },
        ArgType::Bool => match value {
            ArgValue::Bool(_) => None,
            ArgValue::Str(s) if matches!(s.to_lowercase().as_str(), "true" | "false" | "1" | "0") => {
                None
            }
            _ => return Err("expected bool".to_string()),
        },
        ArgType::String => match value {
            ArgValue::Str(_) => None,
            _ => return Err("expected string".to_string()),
        },
    };

    if let Some(allowed) = spec.allowed.as_ref().filter(|a| !a.is_empty()) {
        let as_string = value.to_string();
        if !allowed.iter().any(|item| *item == as_string) {
            return Err(format!("value '{as_string}' not in enum {allowed:?}"));
        }
    }

    if let Some(numeric) = numeric {
        if let Some(min) = spec.min {
            if numeric < min {
                return Err(format!("value {numeric} < min {min}"));
            }
        }
        if let Some(max) = spec.max {
            if numeric > max {
                return Err(format!("value {numeric} > max {max}"));
            }
        }
    }
    Ok(())
}
