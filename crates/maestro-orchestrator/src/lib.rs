//! `maestro-orchestrator` – fuses node capabilities and drives plans.
//!
//! The pipeline is: [`Catalog::build`](catalog::Catalog::build) merges the
//! connected nodes' manifests into a token → owner multi-map;
//! [`validator::validate`] rejects a plan before any network I/O;
//! [`executor::execute`] runs the surviving steps strictly in order with
//! panic-stop on failure; [`planner::expand`] provides the deterministic
//! fallback when no external planner answers. [`Orchestrator`] ties the
//! pieces together behind one facade.

pub mod catalog;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod validator;

pub use catalog::{Catalog, NodeSnapshot, Resolution};
pub use executor::{CancelFlag, ExecutionError, StepReport};
pub use orchestrator::{EndpointParseError, NodeEndpoint, Orchestrator, OrchestratorError, Timeouts};
pub use planner::{Expansion, PlannerClient, PlannerError};
pub use validator::ValidationError;
