//! Rules layer: scanning, assembly compilation, and typed instantiation
//! of module and target descriptors.

pub mod assembly;
pub mod context;
pub mod descriptor;
pub mod module;
pub mod scanner;
pub mod scope;
pub mod target;
pub mod types;

pub use assembly::{compile_assembly, AssemblyCompileOptions, RulesAssembly};
pub use context::ModuleRulesContext;
pub use module::{create_module, ModuleRules};
pub use scope::RulesScope;
pub use target::{create_target, TargetRules};
