//! Slipway - a multi-target native-code build orchestrator.
//!
//! Slipway discovers rule descriptors, composes them into a typed
//! module/target graph, plans per-translation-unit compilation including
//! precompiled-header selection, and emits a dependency-tracked action
//! graph for downstream executors. It decides what to compile, in which
//! environment, and in what order; it never runs the compiler itself.

pub mod error;
pub mod graph;
pub mod ops;
pub mod planner;
pub mod rules;
pub mod session;
pub mod util;
pub mod version;

pub use error::BuildError;
pub use graph::{CompileEnvironment, ModuleGraph};
pub use rules::{ModuleRules, RulesAssembly, RulesScope, TargetRules};
pub use session::{BuildArguments, BuildSession};
pub use util::InternedString;
pub use version::BuildVersion;
