//! Module rules and instantiation.
//!
//! A module rule is instantiated for a concrete target. Identity fields
//! are seeded first, then the base descriptor applies, then at most one
//! platform or platform-group specialization overlay. The result is a
//! frozen input to graph construction.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::BuildError;
use crate::rules::assembly::{CompiledModuleRule, RulesAssembly};
use crate::rules::context::ModuleRulesContext;
use crate::rules::descriptor::{ModuleDescriptor, ReceiptProperty, RuntimeDependency};
use crate::rules::target::TargetRules;
use crate::rules::types::{
    CppStandard, ModuleKind, OptimizationMode, PchMode, PrecompileMode, SymbolVisibility,
    TargetConfiguration, WarningLevel,
};
use crate::util::InternedString;

/// The instantiated module descriptor, bound to one target.
#[derive(Debug, Clone)]
pub struct ModuleRules {
    pub name: InternedString,
    pub file: PathBuf,
    pub directory: PathBuf,
    pub plugin: Option<InternedString>,
    pub context: ModuleRulesContext,
    pub kind: ModuleKind,
    /// Rules from an installed layer may not be mutated per target.
    pub is_read_only: bool,
    pub treat_as_engine_module: bool,
    pub precompile: bool,
    pub use_precompiled: bool,

    pub public_dependencies: Vec<InternedString>,
    pub private_dependencies: Vec<InternedString>,
    pub dynamic_dependencies: Vec<InternedString>,
    /// Edges graph construction tolerates despite forming cycles.
    pub circular_dependencies: Vec<InternedString>,

    /// Absolute include paths, resolved against the module directory.
    pub public_include_paths: Vec<PathBuf>,
    pub private_include_paths: Vec<PathBuf>,
    pub system_include_paths: Vec<PathBuf>,

    pub public_definitions: Vec<String>,
    pub private_definitions: Vec<String>,

    pub public_frameworks: Vec<String>,
    pub weak_frameworks: Vec<String>,
    pub additional_libraries: Vec<String>,
    pub bundle_resources: Vec<String>,

    pub use_rtti: bool,
    pub enable_avx: bool,
    pub enable_exceptions: bool,
    pub enable_buffer_security: bool,
    pub undefined_identifier_warning_level: WarningLevel,
    pub shadow_variable_warning_level: WarningLevel,
    pub unsafe_cast_warning_level: WarningLevel,
    pub cpp_standard: CppStandard,
    pub disable_unity_build: bool,
    pub pch_mode: PchMode,
    pub optimization: OptimizationMode,
    pub private_pch_header: Option<PathBuf>,
    pub shared_pch_header: Option<PathBuf>,
    pub symbol_visibility: SymbolVisibility,

    pub runtime_dependencies: Vec<RuntimeDependency>,
    pub receipt_properties: Vec<ReceiptProperty>,
    pub type_libraries: Vec<String>,
    pub external_dependencies: Vec<String>,

    /// Directories of the specialization files that contributed to this
    /// instantiation, most-derived first.
    pub subclass_directories: Vec<PathBuf>,
}

impl ModuleRules {
    /// Whether optimization is on for this module under `config`.
    pub fn should_optimize(&self, config: TargetConfiguration) -> bool {
        self.optimization
            .should_optimize(config, self.treat_as_engine_module)
    }

    /// Warning level with the target's value folded in for `Default`.
    pub fn effective_shadow_warning(&self, target: &TargetRules) -> WarningLevel {
        resolve_warning(self.shadow_variable_warning_level, target.shadow_variable_warning_level)
    }

    pub fn effective_unsafe_cast_warning(&self, target: &TargetRules) -> WarningLevel {
        resolve_warning(self.unsafe_cast_warning_level, target.unsafe_cast_warning_level)
    }

    pub fn effective_undefined_identifier_warning(&self, target: &TargetRules) -> WarningLevel {
        resolve_warning(
            self.undefined_identifier_warning_level,
            target.undefined_identifier_warning_level,
        )
    }

    /// Language standard with the target's value folded in for `Default`.
    pub fn effective_cpp_standard(&self, target: &TargetRules) -> CppStandard {
        if self.cpp_standard == CppStandard::Default {
            target.cpp_standard
        } else {
            self.cpp_standard
        }
    }

    /// PCH policy with `Default` resolved: shared PCHs unless the session
    /// disabled them outright.
    pub fn effective_pch_mode(&self, target: &TargetRules) -> PchMode {
        if target.args.no_pch || target.args.iwyu {
            return PchMode::None;
        }
        match self.pch_mode {
            PchMode::Default => {
                if self.private_pch_header.is_some() {
                    PchMode::UseExplicitOrSharedPchs
                } else {
                    PchMode::UseSharedPchs
                }
            }
            other => other,
        }
    }

    /// The `<NAME>_API` export macro for this module.
    pub fn api_macro(&self) -> String {
        format!("{}_API", self.name.to_uppercase())
    }

    /// Whitelisted circular edges that are not also declared as public or
    /// private dependencies. Dead whitelist data; the planner surfaces
    /// each entry as a non-fatal diagnostic.
    pub fn undeclared_circular_dependencies(&self) -> Vec<InternedString> {
        self.circular_dependencies
            .iter()
            .copied()
            .filter(|dep| {
                !self.public_dependencies.contains(dep)
                    && !self.private_dependencies.contains(dep)
            })
            .collect()
    }
}

fn resolve_warning(module_level: WarningLevel, target_level: WarningLevel) -> WarningLevel {
    if module_level == WarningLevel::Default {
        target_level
    } else {
        module_level
    }
}

/// Construct module rules for `name`, bound to `target`.
///
/// `reference_chain` names the modules that led here; it is echoed in
/// graph errors so unresolved names are attributable.
pub fn create_module(
    assembly: &Arc<RulesAssembly>,
    name: &str,
    target: &TargetRules,
    reference_chain: &[String],
) -> Result<ModuleRules, BuildError> {
    let Some((rule, owner)) = assembly.find_module_rule(name) else {
        let mut chain = reference_chain.to_vec();
        chain.push(name.to_string());
        return Err(BuildError::graph(
            format!("could not resolve module `{name}`"),
            chain,
        ));
    };

    let (descriptor, subclass_directories) = resolve_descriptor(rule, target)?;

    // Identity is seeded before the descriptor body applies.
    let context = owner.context().clone();
    let treat_as_engine_module = descriptor
        .treat_as_engine_module
        .unwrap_or(!context.classify_as_game_module);

    let precompile = match descriptor.precompile.unwrap_or_default() {
        PrecompileMode::Always => true,
        PrecompileMode::Never => false,
        // Default resolves from directory location: engine-tree modules
        // precompile with the engine.
        PrecompileMode::Default => treat_as_engine_module,
    };
    let use_precompiled = descriptor
        .use_precompiled
        .unwrap_or(target.args.use_precompiled && treat_as_engine_module);

    let directory = rule.directory.clone();
    let resolve_paths = |paths: &[String]| -> Vec<PathBuf> {
        paths.iter().map(|p| directory.join(p)).collect()
    };

    let module = ModuleRules {
        name: rule.name,
        file: rule.file.clone(),
        directory: directory.clone(),
        plugin: context.plugin,
        context,
        kind: descriptor.kind.unwrap_or_default(),
        is_read_only: owner.is_read_only(),
        treat_as_engine_module,
        precompile,
        use_precompiled,
        public_dependencies: intern_all(&descriptor.public_dependencies),
        private_dependencies: intern_all(&descriptor.private_dependencies),
        dynamic_dependencies: intern_all(&descriptor.dynamic_dependencies),
        circular_dependencies: intern_all(&descriptor.circular_dependencies),
        public_include_paths: resolve_paths(&descriptor.public_include_paths),
        private_include_paths: resolve_paths(&descriptor.private_include_paths),
        system_include_paths: resolve_paths(&descriptor.system_include_paths),
        public_definitions: descriptor.public_definitions.clone(),
        private_definitions: descriptor.private_definitions.clone(),
        public_frameworks: descriptor.public_frameworks.clone(),
        weak_frameworks: descriptor.weak_frameworks.clone(),
        additional_libraries: descriptor.additional_libraries.clone(),
        bundle_resources: descriptor.bundle_resources.clone(),
        use_rtti: descriptor.use_rtti.unwrap_or(false),
        enable_avx: descriptor.enable_avx.unwrap_or(false),
        enable_exceptions: descriptor.enable_exceptions.unwrap_or(false),
        enable_buffer_security: descriptor.enable_buffer_security.unwrap_or(true),
        undefined_identifier_warning_level: descriptor
            .undefined_identifier_warning_level
            .unwrap_or_default(),
        shadow_variable_warning_level: descriptor
            .shadow_variable_warning_level
            .unwrap_or_default(),
        unsafe_cast_warning_level: descriptor.unsafe_cast_warning_level.unwrap_or_default(),
        cpp_standard: descriptor.cpp_standard.unwrap_or_default(),
        disable_unity_build: descriptor.disable_unity_build.unwrap_or(false),
        pch_mode: descriptor.pch_mode.unwrap_or_default(),
        optimization: descriptor.optimization.unwrap_or_default(),
        private_pch_header: descriptor.private_pch_header.as_ref().map(|p| directory.join(p)),
        shared_pch_header: descriptor.shared_pch_header.as_ref().map(|p| directory.join(p)),
        symbol_visibility: descriptor.symbol_visibility.unwrap_or_default(),
        runtime_dependencies: descriptor.runtime_dependencies.clone(),
        receipt_properties: descriptor.receipt_properties.clone(),
        type_libraries: descriptor.type_libraries.clone(),
        external_dependencies: descriptor.external_dependencies.clone(),
        subclass_directories,
    };

    validate(&module)?;
    Ok(module)
}

/// Pick the specialization overlay for the target platform: the
/// platform-exact overlay first, then a unique group overlay. Two
/// matching group overlays cannot be ordered and are fatal.
fn resolve_descriptor(
    rule: &CompiledModuleRule,
    target: &TargetRules,
) -> Result<(ModuleDescriptor, Vec<PathBuf>), BuildError> {
    let mut descriptor = rule.descriptor.clone();
    let mut subclass_directories = Vec::new();

    let overlay = if let Some(exact) = rule.specializations.get(target.platform.name()) {
        Some(exact)
    } else {
        let group_hits: Vec<&str> = target
            .platform
            .groups()
            .iter()
            .map(|g| g.name())
            .filter(|g| rule.specializations.contains_key(*g))
            .collect();
        match group_hits.as_slice() {
            [] => None,
            [only] => rule.specializations.get(*only),
            many => {
                return Err(BuildError::graph(
                    format!(
                        "module `{}` has specializations for multiple platform groups: {}",
                        rule.name,
                        many.join(", ")
                    ),
                    vec![rule.name.to_string()],
                ));
            }
        }
    };

    if let Some(specialized) = overlay {
        descriptor.apply_overlay(&specialized.descriptor);
        if let Some(dir) = specialized.file.parent() {
            subclass_directories.push(dir.to_path_buf());
        }
    }

    Ok((descriptor, subclass_directories))
}

fn intern_all(names: &[String]) -> Vec<InternedString> {
    names.iter().map(InternedString::new).collect()
}

fn validate(module: &ModuleRules) -> Result<(), BuildError> {
    if module.shared_pch_header.is_some() && module.public_include_paths.is_empty() {
        return Err(BuildError::configuration_in(
            module.name.as_str(),
            "a shared PCH header requires at least one public include path",
            &module.file,
        ));
    }

    // Undeclared circular_dependencies entries are diagnostics, not
    // errors; they surface through the action graph builder once one
    // exists (see `ModuleRules::undeclared_circular_dependencies`).

    // The context scope equals the owning assembly's scope by
    // construction: the context is cloned from that assembly above.
    Ok(())
}
