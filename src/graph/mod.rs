//! Module graph construction and compile-environment derivation.

pub mod environment;
pub mod resolve;

pub use environment::{
    add_module_to_compile_environment, build_module_environment, CompileEnvironment, OrderedSet,
};
pub use resolve::{DependencyKind, ModuleGraph};
