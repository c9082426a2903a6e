//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use slipway::rules::types::{
    CppStandard, TargetArchitecture, TargetConfiguration, TargetPlatform,
};

/// Slipway - a multi-target native-code build orchestrator
#[derive(Parser)]
#[command(name = "slipway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug/info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Construct the action graph for a target
    Plan(PlanArgs),

    /// Remove a target's intermediate tree
    Clean(CleanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Target name; a `<Name>.target.toml` rule must exist
    pub target: String,

    /// Platform to plan for
    #[arg(long, default_value = "Linux")]
    pub platform: TargetPlatform,

    /// Build configuration
    #[arg(long, default_value = "Development")]
    pub configuration: TargetConfiguration,

    /// Target architecture
    #[arg(long, default_value = "x64")]
    pub architecture: TargetArchitecture,

    /// Engine root directory
    #[arg(long, env = "SLIPWAY_ENGINE_ROOT", default_value = ".")]
    pub engine_root: PathBuf,

    /// Project file; its directory becomes the project root
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Write the emitted action graph as JSON
    #[arg(long)]
    pub emit_json: Option<PathBuf>,

    /// Compile every module the rules assemblies know about
    #[arg(long)]
    pub all_modules: bool,

    /// Build a single plugin's modules
    #[arg(long)]
    pub build_plugin: Option<String>,

    /// Enable a plugin by name (repeatable)
    #[arg(long)]
    pub enable_plugin: Vec<String>,

    /// Disable a plugin by name (repeatable)
    #[arg(long)]
    pub disable_plugin: Vec<String>,

    /// Force monolithic linking
    #[arg(long, conflicts_with = "modular")]
    pub monolithic: bool,

    /// Force modular (DLL-per-module) linking
    #[arg(long)]
    pub modular: bool,

    /// Use the shared build environment
    #[arg(long, conflicts_with = "unique_build_environment")]
    pub shared_build_environment: bool,

    /// Use a unique build environment
    #[arg(long)]
    pub unique_build_environment: bool,

    /// Write precompiled-module manifests
    #[arg(long)]
    pub precompile: bool,

    /// Consume precompiled-module manifests instead of compiling
    #[arg(long)]
    pub use_precompiled: bool,

    /// Include-what-you-use mode: no PCH reuse
    #[arg(long)]
    pub iwyu: bool,

    /// Disable precompiled headers entirely
    #[arg(long)]
    pub no_pch: bool,

    /// Disable unity batching
    #[arg(long, conflicts_with = "force_unity")]
    pub disable_unity: bool,

    /// Force unity batching even for opted-out modules
    #[arg(long)]
    pub force_unity: bool,

    /// One file per unity batch, to shake out missing includes
    #[arg(long)]
    pub stress_test_unity: bool,

    /// Do not accept hot-reload requests from the IDE
    #[arg(long)]
    pub no_hot_reload_from_ide: bool,

    /// Trust cached rules artifacts without staleness checks
    #[arg(long)]
    pub skip_rules_compile: bool,

    /// Upper bound on concurrent actions suggested to executors
    #[arg(long)]
    pub max_parallel_actions: Option<usize>,

    /// Extra definition applied to every module (repeatable)
    #[arg(long = "define", value_name = "NAME[=VALUE]")]
    pub definitions: Vec<String>,

    /// C++ standard override
    #[arg(long)]
    pub cpp_std: Option<CppStandard>,

    /// Extra compiler arguments passed through to executors
    #[arg(long)]
    pub compiler_arguments: Vec<String>,

    /// Extra linker arguments passed through to executors
    #[arg(long)]
    pub linker_arguments: Vec<String>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Target name whose intermediates are removed
    pub target: String,

    /// Platform
    #[arg(long, default_value = "Linux")]
    pub platform: TargetPlatform,

    /// Build configuration
    #[arg(long, default_value = "Development")]
    pub configuration: TargetConfiguration,

    /// Target architecture
    #[arg(long, default_value = "x64")]
    pub architecture: TargetArchitecture,

    /// Engine root directory
    #[arg(long, env = "SLIPWAY_ENGINE_ROOT", default_value = ".")]
    pub engine_root: PathBuf,

    /// Project file; its directory becomes the project root
    #[arg(long)]
    pub project: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
