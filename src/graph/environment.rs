//! Compile-environment derivation.
//!
//! Every module gets its own [`CompileEnvironment`], derived from the
//! binary-level environment by cloning and layering: module knobs, the
//! module's own definitions, then the public surface of its dependency
//! closure. Include paths and definitions keep their append order with
//! first-seen deduplication; that ordering is observable and pinned by
//! tests.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::PathBuf;

use crate::graph::resolve::ModuleGraph;
use crate::rules::module::ModuleRules;
use crate::rules::target::TargetRules;
use crate::rules::types::{
    CppStandard, PchAction, TargetArchitecture, TargetConfiguration, TargetPlatform, WarningLevel,
};
use crate::util::InternedString;

/// An insertion-ordered set: first occurrence wins, order is preserved.
#[derive(Debug, Clone, Default)]
pub struct OrderedSet<T: Clone + Eq + Hash> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T: Clone + Eq + Hash> OrderedSet<T> {
    pub fn new() -> Self {
        OrderedSet {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Add an item; returns false when it was already present.
    pub fn add(&mut self, item: T) -> bool {
        if self.seen.insert(item.clone()) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.add(item);
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.seen.contains(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }
}

impl<T: Clone + Eq + Hash> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = OrderedSet::new();
        set.extend(iter);
        set
    }
}

/// The resolved compilation settings for one module (or one binary, as
/// the clone source for its modules).
#[derive(Debug, Clone)]
pub struct CompileEnvironment {
    pub platform: TargetPlatform,
    pub configuration: TargetConfiguration,
    pub architecture: TargetArchitecture,

    pub user_include_paths: OrderedSet<PathBuf>,
    pub system_include_paths: OrderedSet<PathBuf>,
    pub definitions: OrderedSet<String>,
    /// Headers force-included ahead of every translation unit, in order.
    pub force_include_files: Vec<PathBuf>,
    /// Extra files actions must wait on (generated headers, type libs).
    pub additional_prerequisites: Vec<PathBuf>,
    pub frameworks: OrderedSet<String>,
    pub weak_frameworks: OrderedSet<String>,

    pub pch_action: PchAction,
    pub pch_header: Option<PathBuf>,
    /// The PCH artifact consumed when `pch_action == Include`.
    pub precompiled_header_file: Option<PathBuf>,

    pub optimize_code: bool,
    pub use_rtti: bool,
    pub enable_exceptions: bool,
    pub enable_avx: bool,
    pub enable_buffer_security: bool,
    pub use_unity: bool,

    pub shadow_variable_warning_level: WarningLevel,
    pub unsafe_cast_warning_level: WarningLevel,
    pub undefined_identifier_warning_level: WarningLevel,
    pub cpp_standard: CppStandard,

    pub is_building_dll: bool,
    pub is_building_library: bool,

    /// Metadata cache consulted by generated-code tooling, when present.
    pub metadata_cache: Option<PathBuf>,
}

impl CompileEnvironment {
    /// The binary-level environment a target's modules clone from.
    pub fn for_target(target: &TargetRules) -> Self {
        let mut definitions = OrderedSet::new();
        definitions.extend(target.global_definitions.iter().cloned());
        definitions.extend(target.platform_rules.settings().definitions.iter().cloned());

        CompileEnvironment {
            platform: target.platform,
            configuration: target.configuration,
            architecture: target.architecture,
            user_include_paths: OrderedSet::new(),
            system_include_paths: OrderedSet::new(),
            definitions,
            force_include_files: Vec::new(),
            additional_prerequisites: Vec::new(),
            frameworks: OrderedSet::new(),
            weak_frameworks: OrderedSet::new(),
            pch_action: PchAction::None,
            pch_header: None,
            precompiled_header_file: None,
            optimize_code: target.configuration != TargetConfiguration::Debug,
            use_rtti: false,
            enable_exceptions: false,
            enable_avx: false,
            enable_buffer_security: true,
            use_unity: !target.args.disable_unity,
            shadow_variable_warning_level: target.shadow_variable_warning_level,
            unsafe_cast_warning_level: target.unsafe_cast_warning_level,
            undefined_identifier_warning_level: target.undefined_identifier_warning_level,
            cpp_standard: target.cpp_standard,
            is_building_dll: target.is_modular(),
            is_building_library: false,
            metadata_cache: None,
        }
    }
}

/// Derive the compile environment for `module` from the binary-level
/// environment, folding in its dependency closure's public surface.
pub fn build_module_environment(
    base: &CompileEnvironment,
    module: &ModuleRules,
    target: &TargetRules,
    graph: &ModuleGraph,
) -> CompileEnvironment {
    let mut env = base.clone();

    // Module knobs first; they do not depend on the closure.
    env.use_unity = env.use_unity && !module.disable_unity_build;
    if target.args.force_unity || target.args.stress_test_unity {
        env.use_unity = true;
    }
    env.optimize_code = module.should_optimize(target.configuration);
    env.use_rtti = module.use_rtti;
    env.enable_avx = module.enable_avx;
    env.enable_exceptions = module.enable_exceptions;
    env.enable_buffer_security = module.enable_buffer_security;
    env.shadow_variable_warning_level = module.effective_shadow_warning(target);
    env.unsafe_cast_warning_level = module.effective_unsafe_cast_warning(target);
    env.undefined_identifier_warning_level = module.effective_undefined_identifier_warning(target);
    env.cpp_standard = module.effective_cpp_standard(target);

    // Engine-module diagnostics macros, then project identity for
    // project-local modules.
    if module.treat_as_engine_module {
        env.definitions.add("IS_ENGINE_MODULE=1".to_string());
    } else {
        env.definitions.add("IS_ENGINE_MODULE=0".to_string());
        if let Some(project) = &target.project_file {
            if let Some(stem) = project.file_stem().and_then(|s| s.to_str()) {
                env.definitions.add(format!("PROJECT_NAME={stem}"));
            }
        }
        env.definitions.add(format!("TARGET_NAME={}", target.name));
    }

    // The module's own definitions: public, then private, then project
    // definitions for non-engine modules.
    env.definitions.extend(module.public_definitions.iter().cloned());
    env.definitions.extend(module.private_definitions.iter().cloned());
    if !module.treat_as_engine_module {
        env.definitions.extend(target.project_definitions.iter().cloned());
    }

    // The module sees its own whole include surface.
    env.user_include_paths
        .extend(module.public_include_paths.iter().cloned());
    env.user_include_paths
        .extend(module.private_include_paths.iter().cloned());
    env.system_include_paths
        .extend(module.system_include_paths.iter().cloned());
    env.frameworks.extend(module.public_frameworks.iter().cloned());
    env.weak_frameworks.extend(module.weak_frameworks.iter().cloned());

    // Public closure: direct dependencies contribute their public
    // surface, and re-export their own public dependencies transitively.
    let mut visited: HashSet<InternedString> = HashSet::new();
    visited.insert(module.name);
    let mut worklist: Vec<InternedString> = module
        .public_dependencies
        .iter()
        .chain(module.private_dependencies.iter())
        .copied()
        .collect();

    let mut index = 0;
    while index < worklist.len() {
        let dep_name = worklist[index];
        index += 1;
        if !visited.insert(dep_name) {
            continue;
        }
        let Some(dep) = graph.module(dep_name) else {
            continue;
        };
        add_module_to_compile_environment(dep, &mut env);
        // Only the publicly-visible sub-closure propagates further.
        worklist.extend(dep.public_dependencies.iter().copied());
    }

    env
}

/// Contribute a dependency's public surface to a consumer environment.
pub fn add_module_to_compile_environment(module: &ModuleRules, env: &mut CompileEnvironment) {
    env.user_include_paths
        .extend(module.public_include_paths.iter().cloned());
    env.system_include_paths
        .extend(module.system_include_paths.iter().cloned());
    env.definitions.extend(module.public_definitions.iter().cloned());
    env.frameworks.extend(module.public_frameworks.iter().cloned());
    env.weak_frameworks.extend(module.weak_frameworks.iter().cloned());
    env.additional_prerequisites
        .extend(module.external_dependencies.iter().map(|p| module.directory.join(p)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::assembly::{compile_assembly, AssemblyCompileOptions, RulesAssembly};
    use crate::rules::context::ModuleRulesContext;
    use crate::rules::scanner::RulesScanner;
    use crate::rules::scope::RulesScope;
    use crate::rules::target::create_target;
    use crate::session::BuildArguments;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fixture(
        rules: &[(&str, &str)],
        target_text: &str,
    ) -> (TempDir, Arc<RulesAssembly>, TargetRules, ModuleGraph) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Source");
        for (rel, text) in rules {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("TestGame.target.toml"), target_text).unwrap();

        let scanner = RulesScanner::new();
        let scanned = (*scanner.scan_root(&root).unwrap()).clone();
        let options = AssemblyCompileOptions {
            name: InternedString::new("Engine"),
            context: ModuleRulesContext::new(RulesScope::engine(), tmp.path().join("Intermediate")),
            output_dir: tmp.path().join("Intermediate/Build/BuildRules"),
            engine_version: "5.0.0".to_string(),
            parent: None,
            installed: false,
            skip_staleness_check: false,
        };
        let assembly = compile_assembly(&options, &scanned).unwrap();
        let target = create_target(
            &assembly,
            "TestGame",
            TargetPlatform::Linux,
            TargetConfiguration::Development,
            TargetArchitecture::X64,
            None,
            &BuildArguments::default(),
            false,
        )
        .unwrap();
        let graph = ModuleGraph::build(&assembly, &target).unwrap();
        (tmp, assembly, target, graph)
    }

    fn env_for(
        graph: &ModuleGraph,
        target: &TargetRules,
        name: &str,
    ) -> CompileEnvironment {
        let base = CompileEnvironment::for_target(target);
        let module = graph.module(InternedString::new(name)).unwrap().clone();
        build_module_environment(&base, &module, target, graph)
    }

    #[test]
    fn test_ordered_set_first_seen_wins() {
        let mut set = OrderedSet::new();
        assert!(set.add("B=1"));
        assert!(set.add("A=1"));
        assert!(!set.add("B=1"));
        assert_eq!(set.as_slice(), &["B=1", "A=1"]);
    }

    #[test]
    fn test_engine_module_definition() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[("Core/Core.build.toml", "public_definitions = [\"CORE_FLAG=1\"]")],
            "type = \"Game\"\nmodules = [\"Core\"]",
        );

        let env = env_for(&graph, &target, "Core");
        let defs: Vec<&String> = env.definitions.iter().collect();
        assert!(defs.contains(&&"IS_ENGINE_MODULE=1".to_string()));
        assert!(defs.contains(&&"CORE_FLAG=1".to_string()));
        // Engine definition precedes the module's own.
        let engine_pos = defs.iter().position(|d| *d == "IS_ENGINE_MODULE=1").unwrap();
        let flag_pos = defs.iter().position(|d| *d == "CORE_FLAG=1").unwrap();
        assert!(engine_pos < flag_pos);
    }

    #[test]
    fn test_definitions_are_deduped_order_stable() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[
                (
                    "App/App.build.toml",
                    "public_dependencies = [\"Lib\"]\npublic_definitions = [\"SHARED=1\", \"APP=1\"]",
                ),
                ("Lib/Lib.build.toml", "public_definitions = [\"SHARED=1\", \"LIB=1\"]"),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        );

        let env = env_for(&graph, &target, "App");
        let defs: Vec<&str> = env.definitions.iter().map(|s| s.as_str()).collect();
        // SHARED=1 appears once, at its first position.
        assert_eq!(defs.iter().filter(|d| **d == "SHARED=1").count(), 1);
        let shared = defs.iter().position(|d| *d == "SHARED=1").unwrap();
        let app = defs.iter().position(|d| *d == "APP=1").unwrap();
        let lib = defs.iter().position(|d| *d == "LIB=1").unwrap();
        assert!(shared < app);
        assert!(app < lib);
    }

    #[test]
    fn test_public_closure_propagates_through_public_edges_only() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[
                ("App/App.build.toml", "public_dependencies = [\"Mid\"]"),
                (
                    "Mid/Mid.build.toml",
                    "public_dependencies = [\"Deep\"]\nprivate_dependencies = [\"Hidden\"]\npublic_include_paths = [\"Public\"]",
                ),
                ("Deep/Deep.build.toml", "public_include_paths = [\"Public\"]\npublic_definitions = [\"DEEP=1\"]"),
                ("Hidden/Hidden.build.toml", "public_include_paths = [\"Public\"]\npublic_definitions = [\"HIDDEN=1\"]"),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        );

        let env = env_for(&graph, &target, "App");
        let defs: Vec<&str> = env.definitions.iter().map(|s| s.as_str()).collect();
        // Deep is re-exported through Mid's public edge.
        assert!(defs.contains(&"DEEP=1"));
        // Mid's private dependency is not visible to App.
        assert!(!defs.contains(&"HIDDEN=1"));

        // Mid itself sees Hidden: private deps are direct.
        let env = env_for(&graph, &target, "Mid");
        let defs: Vec<&str> = env.definitions.iter().map(|s| s.as_str()).collect();
        assert!(defs.contains(&"HIDDEN=1"));
    }

    #[test]
    fn test_include_path_order_own_before_deps() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[
                (
                    "App/App.build.toml",
                    "public_dependencies = [\"Lib\"]\npublic_include_paths = [\"Public\"]\nprivate_include_paths = [\"Private\"]",
                ),
                ("Lib/Lib.build.toml", "public_include_paths = [\"Public\"]"),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        );

        let env = env_for(&graph, &target, "App");
        let paths: Vec<String> = env
            .user_include_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert!(paths[0].ends_with("App/Public"));
        assert!(paths[1].ends_with("App/Private"));
        assert!(paths[2].ends_with("Lib/Public"));
    }

    #[test]
    fn test_optimization_follows_module_policy() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[
                ("Fast/Fast.build.toml", "optimization = \"Always\""),
                ("Slow/Slow.build.toml", "optimization = \"Never\""),
            ],
            "type = \"Game\"\nmodules = [\"Fast\", \"Slow\"]",
        );

        assert!(env_for(&graph, &target, "Fast").optimize_code);
        assert!(!env_for(&graph, &target, "Slow").optimize_code);
    }

    #[test]
    fn test_non_engine_module_gets_project_identity() {
        let (_tmp, _assembly, target, graph) = fixture(
            &[("Game/Game.build.toml", "treat_as_engine_module = false")],
            "type = \"Game\"\nmodules = [\"Game\"]\nproject_definitions = [\"GAME_SETTING=1\"]",
        );

        let env = env_for(&graph, &target, "Game");
        let defs: Vec<&str> = env.definitions.iter().map(|s| s.as_str()).collect();
        assert!(defs.contains(&"IS_ENGINE_MODULE=0"));
        assert!(defs.contains(&"TARGET_NAME=TestGame"));
        assert!(defs.contains(&"GAME_SETTING=1"));
    }
}
