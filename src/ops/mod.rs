//! High-level operations driven by the CLI.

pub mod plan;

pub use plan::{plan_target, BuildPlan, PlanOutcome, PlanRequest};
