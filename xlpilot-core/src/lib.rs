#![forbid(unsafe_code)]

//! The copilot: configuration, reference resolution, the refinement dialogue
//! and the orchestrator that ties the planner, the stores and the engine together.

pub mod api;
pub mod config;
mod copilot;
pub mod refine;
pub mod resolve;

pub use config::{ConfigError, PlannerSettings, Settings};
pub use copilot::{bind_inputs, materialize, Copilot};
pub use resolve::{resolve_plan, PlanResolver};
