//! Plan schema exchanged with planners and the HTTP control plane.
//!
//! A [`Plan`] is an ordered sequence of [`Step`]s. The shape invariants
//! (non-empty, terminal `STOP`, `STOP` nowhere else) are enforced by the
//! orchestrator's validator before any step reaches hardware.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A typed argument value inside a `RUN` step.
///
/// Deserialised untagged from plan JSON: `0.6` → `Float`, `90` → `Int`,
/// `"close"` → `Str`, `true` → `Bool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    /// Numeric view used for range checks. `Bool` and `Str` have none.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            ArgValue::Bool(_) | ArgValue::Str(_) => None,
        }
    }
}

impl std::fmt::Display for ArgValue {
    /// Wire form of the value, as written after `RUN <TOKEN>`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Bool(v) => write!(f, "{v}"),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// One plan step: either a command dispatch or the terminal all-stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "RUN")]
    Run {
        /// Node alias to route to. May be omitted only when the token is
        /// unambiguous across all connected nodes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        token: String,
        #[serde(default)]
        args: Vec<ArgValue>,
        /// Hold time after a successful `OK`, in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    #[serde(rename = "STOP")]
    Stop,
}

impl Step {
    /// Convenience constructor for a targeted `RUN` step.
    pub fn run(target: &str, token: &str, args: Vec<ArgValue>, duration_ms: Option<u64>) -> Self {
        Step::Run {
            target: Some(target.to_string()),
            token: token.to_string(),
            args,
            duration_ms,
        }
    }
}

/// An ordered sequence of steps, serialised as `{"plan":[...]}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    #[serde(rename = "plan")]
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_json_shape_matches_wire_contract() {
        let raw = r#"{"plan":[
            {"type":"RUN","target":"base","token":"FWD","args":[0.6],"duration_ms":1200},
            {"type":"RUN","target":"arm","token":"GRIP","args":["close"]},
            {"type":"STOP"}
        ]}"#;
        let plan: Plan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.len(), 3);
        match &plan.steps[0] {
            Step::Run {
                target,
                token,
                args,
                duration_ms,
            } => {
                assert_eq!(target.as_deref(), Some("base"));
                assert_eq!(token, "FWD");
                assert_eq!(args, &[ArgValue::Float(0.6)]);
                assert_eq!(*duration_ms, Some(1200));
            }
            Step::Stop => panic!("expected RUN"),
        }
        assert_eq!(plan.steps[2], Step::Stop);
    }

    #[test]
    fn untagged_arg_values_deserialize_by_shape() {
        let args: Vec<ArgValue> = serde_json::from_str(r#"[90, 0.6, "close", true]"#).unwrap();
        assert_eq!(
            args,
            vec![
                ArgValue::Int(90),
                ArgValue::Float(0.6),
                ArgValue::Str("close".to_string()),
                ArgValue::Bool(true)
            ]
        );
    }

    #[test]
    fn targetless_run_omits_target_in_json() {
        let step = Step::Run {
            target: None,
            token: "THROTTLE".to_string(),
            args: vec![ArgValue::Float(0.6)],
            duration_ms: Some(900),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert!(!json.contains("target"));
        assert!(json.contains("\"type\":\"RUN\""));
    }

    #[test]
    fn arg_value_wire_form() {
        assert_eq!(ArgValue::Float(0.6).to_string(), "0.6");
        assert_eq!(ArgValue::Int(-90).to_string(), "-90");
        assert_eq!(ArgValue::Str("close".to_string()).to_string(), "close");
        assert_eq!(ArgValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn numeric_view() {
        assert_eq!(ArgValue::Int(90).as_numeric(), Some(90.0));
        assert_eq!(ArgValue::Float(0.5).as_numeric(), Some(0.5));
        assert_eq!(ArgValue::Str("x".into()).as_numeric(), None);
        assert_eq!(ArgValue::Bool(true).as_numeric(), None);
    }

    #[test]
    fn plan_roundtrip() {
        let plan = Plan::new(vec![
            Step::run("base", "FWD", vec![ArgValue::Float(0.6)], Some(1200)),
            Step::Stop,
        ]);
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
