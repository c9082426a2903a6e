//! Target rules and instantiation.
//!
//! A target is created for a `(name, platform, configuration,
//! architecture, project)` tuple. Defaults are seeded first, the
//! descriptor applies on top, then overlays run in a fixed order:
//! config file, then command line. Normalization and invariant checks
//! come last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::rules::assembly::RulesAssembly;
use crate::rules::descriptor::{PlatformTargetSettings, TargetDescriptor};
use crate::rules::types::{
    BuildEnvironment, CppStandard, LinkType, TargetArchitecture, TargetConfiguration,
    TargetPlatform, TargetType, WarningLevel,
};
use crate::session::BuildArguments;
use crate::util::InternedString;

/// Per-platform sub-rules, inhabited only for the platform the build
/// targets. Other platforms have no shape at all.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformSubRules {
    Win64(PlatformTargetSettings),
    Linux(PlatformTargetSettings),
    LinuxArm64(PlatformTargetSettings),
    Mac(PlatformTargetSettings),
    Android(PlatformTargetSettings),
    Ios(PlatformTargetSettings),
    Tvos(PlatformTargetSettings),
}

impl PlatformSubRules {
    fn new(platform: TargetPlatform, settings: PlatformTargetSettings) -> Self {
        match platform {
            TargetPlatform::Win64 => PlatformSubRules::Win64(settings),
            TargetPlatform::Linux => PlatformSubRules::Linux(settings),
            TargetPlatform::LinuxArm64 => PlatformSubRules::LinuxArm64(settings),
            TargetPlatform::Mac => PlatformSubRules::Mac(settings),
            TargetPlatform::Android => PlatformSubRules::Android(settings),
            TargetPlatform::Ios => PlatformSubRules::Ios(settings),
            TargetPlatform::Tvos => PlatformSubRules::Tvos(settings),
        }
    }

    pub fn settings(&self) -> &PlatformTargetSettings {
        match self {
            PlatformSubRules::Win64(s)
            | PlatformSubRules::Linux(s)
            | PlatformSubRules::LinuxArm64(s)
            | PlatformSubRules::Mac(s)
            | PlatformSubRules::Android(s)
            | PlatformSubRules::Ios(s)
            | PlatformSubRules::Tvos(s) => s,
        }
    }
}

/// The instantiated, normalized target descriptor.
#[derive(Debug, Clone)]
pub struct TargetRules {
    pub name: InternedString,
    pub platform: TargetPlatform,
    pub configuration: TargetConfiguration,
    pub architecture: TargetArchitecture,
    pub project_file: Option<PathBuf>,
    pub file: PathBuf,

    pub target_type: TargetType,
    pub link_type: LinkType,
    pub build_environment: BuildEnvironment,

    /// Root modules compiled into the target.
    pub modules: Vec<InternedString>,

    pub global_definitions: Vec<String>,
    pub project_definitions: Vec<String>,

    pub compile_against_engine: bool,
    pub compile_against_core_uobject: bool,
    pub build_with_editor_only_data: bool,

    pub cpp_standard: CppStandard,
    pub shadow_variable_warning_level: WarningLevel,
    pub unsafe_cast_warning_level: WarningLevel,
    pub undefined_identifier_warning_level: WarningLevel,

    pub debug_info: bool,

    pub platform_rules: PlatformSubRules,

    /// Arguments carried for module-level decisions.
    pub args: BuildArguments,

    /// The engine layer is an installed distribution.
    pub installed_engine: bool,
}

impl TargetRules {
    /// Relative intermediate directory for this target:
    /// `Intermediate/Build/<Platform>/<Arch>/<Name>/<Configuration>`.
    pub fn intermediate_subdir(&self) -> PathBuf {
        PathBuf::from("Intermediate/Build")
            .join(self.platform.name())
            .join(self.architecture.name())
            .join(self.name.as_str())
            .join(self.configuration.name())
    }

    /// Whether the target links modules into separate dynamic libraries.
    pub fn is_modular(&self) -> bool {
        self.link_type == LinkType::Modular
    }
}

/// Overlay values a config file or the command line may apply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TargetOverlay {
    pub link_type: Option<LinkType>,
    pub debug_info: Option<bool>,
    pub cpp_standard: Option<CppStandard>,
    pub definitions: Vec<String>,
    pub compiler_arguments: Vec<String>,
    pub linker_arguments: Vec<String>,
}

impl TargetOverlay {
    fn apply(&self, rules: &mut TargetRules) {
        if let Some(link_type) = self.link_type {
            rules.link_type = link_type;
        }
        if let Some(debug_info) = self.debug_info {
            rules.debug_info = debug_info;
        }
        if let Some(std) = self.cpp_standard {
            rules.cpp_standard = std;
        }
        rules
            .global_definitions
            .extend(self.definitions.iter().cloned());
    }
}

/// On-disk shape of `Config/BuildConfiguration.toml`: a base overlay plus
/// per-platform overlay tables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OverlayFile {
    #[serde(flatten)]
    base: TargetOverlay,
    platform: BTreeMap<String, TargetOverlay>,
}

/// One overridable target field: where overlays may set it from, and
/// whether changing it demands a unique build environment.
struct OverridableField {
    name: &'static str,
    requires_unique_environment: bool,
    #[allow(dead_code)]
    config_key: Option<&'static str>,
    #[allow(dead_code)]
    command_line_flag: Option<&'static str>,
    diverged: fn(&TargetRules, &TargetRules) -> bool,
}

/// The single source of truth for overlay-applied fields. The overlay
/// pass and the shared-environment conformance check both walk this
/// table.
const OVERRIDABLE_FIELDS: &[OverridableField] = &[
    OverridableField {
        name: "link_type",
        requires_unique_environment: false,
        config_key: Some("link_type"),
        command_line_flag: Some("-Monolithic/-Modular"),
        diverged: |current, default| current.link_type != default.link_type,
    },
    OverridableField {
        name: "debug_info",
        requires_unique_environment: false,
        config_key: Some("debug_info"),
        command_line_flag: None,
        diverged: |current, default| current.debug_info != default.debug_info,
    },
    OverridableField {
        name: "cpp_standard",
        requires_unique_environment: true,
        config_key: Some("cpp_standard"),
        command_line_flag: Some("-CppStd="),
        diverged: |current, default| current.cpp_standard != default.cpp_standard,
    },
    OverridableField {
        name: "global_definitions",
        requires_unique_environment: true,
        config_key: Some("definitions"),
        command_line_flag: Some("-Define:"),
        diverged: |current, default| current.global_definitions != default.global_definitions,
    },
];

/// Construct target rules for a `(name, platform, configuration,
/// architecture, project)` tuple, walking the assembly chain for the
/// rule, overlaying, and normalizing.
pub fn create_target(
    assembly: &Arc<RulesAssembly>,
    name: &str,
    platform: TargetPlatform,
    configuration: TargetConfiguration,
    architecture: TargetArchitecture,
    project_file: Option<&Path>,
    args: &BuildArguments,
    installed_engine: bool,
) -> Result<TargetRules, BuildError> {
    let Some((rule, _owner)) = assembly.find_target_rule(name) else {
        return Err(BuildError::configuration(
            name,
            format!("no target rules named `{name}` or `{name}Target` in any assembly"),
        ));
    };

    // Seed defaults before the descriptor applies.
    let mut rules = seed_defaults(
        name,
        platform,
        configuration,
        architecture,
        project_file,
        &rule.file,
        &rule.descriptor,
        args,
        installed_engine,
    );

    apply_descriptor(&mut rules, &rule.descriptor);

    // Frozen copy that conformance checks compare against. Taken after
    // the descriptor ran: the rule file is the target's own baseline.
    let defaults = rules.clone();

    // Overlay order is contractual: config file first, command line second.
    if let Some(project) = project_file {
        if let Some(project_dir) = project.parent() {
            apply_config_overlay(&mut rules, project_dir, platform)?;
        }
    }
    apply_argument_overlay(&mut rules, args);

    // Conformance runs against the pre-normalization baseline; normalize
    // installs type-dependent definitions that are not user overrides.
    enforce_shared_environment(&rules, &defaults)?;
    normalize(&mut rules)?;

    Ok(rules)
}

#[allow(clippy::too_many_arguments)]
fn seed_defaults(
    name: &str,
    platform: TargetPlatform,
    configuration: TargetConfiguration,
    architecture: TargetArchitecture,
    project_file: Option<&Path>,
    rule_file: &Path,
    descriptor: &TargetDescriptor,
    args: &BuildArguments,
    installed_engine: bool,
) -> TargetRules {
    // Nested platform sub-records exist before the descriptor body runs.
    let platform_settings = descriptor
        .platform
        .get(platform.name())
        .cloned()
        .unwrap_or_default();

    TargetRules {
        name: InternedString::new(name),
        platform,
        configuration,
        architecture,
        project_file: project_file.map(Path::to_path_buf),
        file: rule_file.to_path_buf(),
        target_type: TargetType::Program,
        link_type: LinkType::Default,
        build_environment: BuildEnvironment::Shared,
        modules: Vec::new(),
        global_definitions: Vec::new(),
        project_definitions: Vec::new(),
        compile_against_engine: false,
        compile_against_core_uobject: false,
        build_with_editor_only_data: false,
        cpp_standard: CppStandard::Default,
        shadow_variable_warning_level: WarningLevel::Warning,
        unsafe_cast_warning_level: WarningLevel::Off,
        undefined_identifier_warning_level: WarningLevel::Warning,
        debug_info: configuration != TargetConfiguration::Shipping,
        platform_rules: PlatformSubRules::new(platform, platform_settings),
        args: args.clone(),
        installed_engine,
    }
}

fn apply_descriptor(rules: &mut TargetRules, descriptor: &TargetDescriptor) {
    rules.target_type = descriptor.target_type;
    if let Some(link_type) = descriptor.link_type {
        rules.link_type = link_type;
    }
    if let Some(environment) = descriptor.build_environment {
        rules.build_environment = environment;
    }
    rules.modules = descriptor.modules.iter().map(InternedString::new).collect();
    rules.global_definitions = descriptor.global_definitions.clone();
    rules.project_definitions = descriptor.project_definitions.clone();
    if let Some(value) = descriptor.compile_against_engine {
        rules.compile_against_engine = value;
    }
    if let Some(value) = descriptor.compile_against_core_uobject {
        rules.compile_against_core_uobject = value;
    }
    if let Some(value) = descriptor.build_with_editor_only_data {
        rules.build_with_editor_only_data = value;
    }
    if let Some(std) = descriptor.cpp_standard {
        rules.cpp_standard = std;
    }
    if let Some(level) = descriptor.shadow_variable_warning_level {
        rules.shadow_variable_warning_level = level;
    }
    if let Some(level) = descriptor.unsafe_cast_warning_level {
        rules.unsafe_cast_warning_level = level;
    }
    if let Some(level) = descriptor.undefined_identifier_warning_level {
        rules.undefined_identifier_warning_level = level;
    }
    if let Some(value) = descriptor.debug_info {
        rules.debug_info = value;
    }
}

/// Apply `Config/BuildConfiguration.toml` overlays: the base table, then
/// the active platform's table.
fn apply_config_overlay(
    rules: &mut TargetRules,
    project_dir: &Path,
    platform: TargetPlatform,
) -> Result<(), BuildError> {
    let path = project_dir.join("Config/BuildConfiguration.toml");
    if !path.exists() {
        return Ok(());
    }

    let text = std::fs::read_to_string(&path).map_err(|err| BuildError::Io {
        path: path.clone(),
        message: err.to_string(),
    })?;
    let overlay: OverlayFile = toml::from_str(&text).map_err(|err| {
        BuildError::configuration_in(rules.name.as_str(), format!("bad overlay file: {err}"), &path)
    })?;

    overlay.base.apply(rules);
    if let Some(platform_overlay) = overlay.platform.get(platform.name()) {
        platform_overlay.apply(rules);
    }
    Ok(())
}

fn apply_argument_overlay(rules: &mut TargetRules, args: &BuildArguments) {
    if let Some(link_type) = args.link_type {
        rules.link_type = link_type;
    }
    if let Some(unique) = args.unique_build_environment {
        rules.build_environment = if unique {
            BuildEnvironment::Unique
        } else {
            BuildEnvironment::Shared
        };
    }
    if let Some(std) = args.cpp_std {
        rules.cpp_standard = std;
    }
    rules
        .global_definitions
        .extend(args.definitions.iter().cloned());
}

fn normalize(rules: &mut TargetRules) -> Result<(), BuildError> {
    // Effective link type: Modular for editors, Monolithic otherwise.
    if rules.link_type == LinkType::Default {
        rules.link_type = if rules.target_type == TargetType::Editor {
            LinkType::Modular
        } else {
            LinkType::Monolithic
        };
    }

    if rules.link_type == LinkType::Modular && !rules.platform.supports_modular_builds() {
        return Err(BuildError::configuration(
            rules.name.as_str(),
            format!("platform {} does not support modular builds", rules.platform),
        ));
    }

    if rules.build_environment == BuildEnvironment::Unique && rules.installed_engine {
        return Err(BuildError::configuration(
            rules.name.as_str(),
            "a unique build environment cannot be used with an installed engine",
        ));
    }

    if rules.compile_against_engine {
        rules.compile_against_core_uobject = true;
    }
    if rules.target_type == TargetType::Editor {
        rules.build_with_editor_only_data = true;
    }

    // Debug info is stripped from shipping unless explicitly re-enabled
    // upstream; the seeded default already encodes that, so nothing to do
    // here beyond the type-dependent global definitions.
    install_global_definitions(rules);
    Ok(())
}

fn install_global_definitions(rules: &mut TargetRules) {
    let mut push = |def: String| {
        if !rules.global_definitions.contains(&def) {
            rules.global_definitions.push(def);
        }
    };

    push(format!(
        "WITH_EDITOR={}",
        u8::from(rules.target_type == TargetType::Editor)
    ));
    push(format!(
        "WITH_EDITORONLY_DATA={}",
        u8::from(rules.build_with_editor_only_data)
    ));
    push(format!(
        "IS_PROGRAM={}",
        u8::from(rules.target_type == TargetType::Program)
    ));
    push(format!(
        "IS_MONOLITHIC={}",
        u8::from(rules.link_type == LinkType::Monolithic)
    ));
    push(format!(
        "IS_SERVER={}",
        u8::from(rules.target_type == TargetType::Server)
    ));
    push(format!(
        "BUILD_{}=1",
        rules.configuration.name().to_uppercase()
    ));
}

/// Fields marked `requires_unique_environment` must keep their baseline
/// values when the build environment is shared.
fn enforce_shared_environment(
    rules: &TargetRules,
    defaults: &TargetRules,
) -> Result<(), BuildError> {
    if rules.build_environment != BuildEnvironment::Shared {
        return Ok(());
    }
    for field in OVERRIDABLE_FIELDS {
        if field.requires_unique_environment && (field.diverged)(rules, defaults) {
            return Err(BuildError::configuration(
                rules.name.as_str(),
                format!(
                    "`{}` may only be overridden with a unique build environment",
                    field.name
                ),
            ));
        }
    }
    Ok(())
}
