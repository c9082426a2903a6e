//! Translation-unit planning: input discovery, unity batching, PCH
//! selection, action emission, and the dependency cache.

pub mod actions;
pub mod depcache;
pub mod inputs;
pub mod pch;
pub mod unity;

pub use actions::{Action, ActionGraph, ActionGraphBuilder, ActionKind};
pub use depcache::CppDependencyCache;
pub use inputs::{discover_inputs, InputFileCollection};
pub use pch::{PchPlanner, PchSelection, PchTemplate};
pub use unity::{plan_unity_batches, UnityPlan, WorkingSet};
