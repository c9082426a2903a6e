//! Rule descriptor schemas.
//!
//! Rule files are declarative TOML: `<Name>.build.toml` for modules,
//! `<Name>.target.toml` for targets. A file whose stem is
//! `<Name>_<Platform>` (or `<Name>_<Group>`) is a specialization overlay
//! applied on top of the base descriptor when instantiating for that
//! platform.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::rules::types::{
    BuildEnvironment, CppStandard, LinkType, ModuleKind, OptimizationMode, PchMode,
    PrecompileMode, SymbolVisibility, TargetType, WarningLevel,
};

/// A file staged next to the built target at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub path: String,
    #[serde(default)]
    pub staged_path: Option<String>,
}

/// An extra key/value recorded in the target receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptProperty {
    pub name: String,
    pub value: String,
}

/// Declarative body of a `<Name>.build.toml` rule file.
///
/// Every field is optional with an additive or overriding merge, so the
/// same schema serves both base descriptors and platform overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ModuleDescriptor {
    pub kind: Option<ModuleKind>,

    // Dependency name lists.
    pub public_dependencies: Vec<String>,
    pub private_dependencies: Vec<String>,
    pub dynamic_dependencies: Vec<String>,
    /// Known-circular edges that graph construction tolerates.
    pub circular_dependencies: Vec<String>,

    // Include surface, relative to the module directory.
    pub public_include_paths: Vec<String>,
    pub private_include_paths: Vec<String>,
    pub system_include_paths: Vec<String>,

    pub public_definitions: Vec<String>,
    pub private_definitions: Vec<String>,

    // Platform-specific passthrough.
    pub public_frameworks: Vec<String>,
    pub weak_frameworks: Vec<String>,
    pub additional_libraries: Vec<String>,
    pub bundle_resources: Vec<String>,

    // Compile knobs.
    pub use_rtti: Option<bool>,
    pub enable_avx: Option<bool>,
    pub enable_exceptions: Option<bool>,
    pub enable_buffer_security: Option<bool>,
    pub undefined_identifier_warning_level: Option<WarningLevel>,
    pub shadow_variable_warning_level: Option<WarningLevel>,
    pub unsafe_cast_warning_level: Option<WarningLevel>,
    pub cpp_standard: Option<CppStandard>,
    pub disable_unity_build: Option<bool>,
    pub pch_mode: Option<PchMode>,
    pub optimization: Option<OptimizationMode>,
    pub private_pch_header: Option<String>,
    /// Consumer-visible PCH header this module offers for sharing.
    pub shared_pch_header: Option<String>,
    pub treat_as_engine_module: Option<bool>,
    pub symbol_visibility: Option<SymbolVisibility>,
    pub precompile: Option<PrecompileMode>,
    pub use_precompiled: Option<bool>,

    // Deployment extras.
    pub runtime_dependencies: Vec<RuntimeDependency>,
    pub receipt_properties: Vec<ReceiptProperty>,
    pub type_libraries: Vec<String>,
    pub external_dependencies: Vec<String>,
}

/// Rule keys from older descriptor revisions: recognized, warned about,
/// and not honored.
const DEPRECATED_MODULE_KEYS: &[(&str, &str)] = &[
    ("pch_usage", "pch_mode"),
    ("faster_without_unity", "disable_unity_build"),
    ("min_source_files_for_unity", "disable_unity_build"),
];

impl ModuleDescriptor {
    /// Parse a module descriptor from TOML text. Deprecated keys are
    /// surfaced as warnings and rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let value: toml::Value =
            toml::from_str(text).context("malformed module rule descriptor")?;
        if let Some(table) = value.as_table() {
            for (deprecated, replacement) in DEPRECATED_MODULE_KEYS {
                if table.contains_key(*deprecated) {
                    tracing::warn!(
                        key = deprecated,
                        replacement,
                        "deprecated rule key is ignored"
                    );
                }
            }
        }
        value.try_into().context("malformed module rule descriptor")
    }

    /// Load a module descriptor from a rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = crate::util::fs::read_to_string(path)?;
        Self::parse(&text).with_context(|| format!("in rule file: {}", path.display()))
    }

    /// Apply a specialization overlay: scalar options override when set,
    /// list fields append.
    pub fn apply_overlay(&mut self, overlay: &ModuleDescriptor) {
        macro_rules! override_opt {
            ($($field:ident),* $(,)?) => {
                $(if overlay.$field.is_some() {
                    self.$field = overlay.$field.clone();
                })*
            };
        }
        macro_rules! extend_list {
            ($($field:ident),* $(,)?) => {
                $(self.$field.extend(overlay.$field.iter().cloned());)*
            };
        }

        override_opt!(
            kind,
            use_rtti,
            enable_avx,
            enable_exceptions,
            enable_buffer_security,
            undefined_identifier_warning_level,
            shadow_variable_warning_level,
            unsafe_cast_warning_level,
            cpp_standard,
            disable_unity_build,
            pch_mode,
            optimization,
            private_pch_header,
            shared_pch_header,
            treat_as_engine_module,
            symbol_visibility,
            precompile,
            use_precompiled,
        );
        extend_list!(
            public_dependencies,
            private_dependencies,
            dynamic_dependencies,
            circular_dependencies,
            public_include_paths,
            private_include_paths,
            system_include_paths,
            public_definitions,
            private_definitions,
            public_frameworks,
            weak_frameworks,
            additional_libraries,
            bundle_resources,
            runtime_dependencies,
            receipt_properties,
            type_libraries,
            external_dependencies,
        );
    }
}

/// Per-platform sub-rules carried by a target descriptor.
///
/// The descriptor file may declare several of these tables; instantiation
/// keeps only the one matching the active platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PlatformTargetSettings {
    pub definitions: Vec<String>,
    pub compiler_arguments: Vec<String>,
    pub linker_arguments: Vec<String>,
    pub enable_address_sanitizer: Option<bool>,
    pub min_os_version: Option<String>,
}

/// Declarative body of a `<Name>.target.toml` rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TargetDescriptor {
    #[serde(rename = "type")]
    pub target_type: TargetType,

    pub link_type: Option<LinkType>,
    pub build_environment: Option<BuildEnvironment>,

    /// Root modules compiled into the target besides dependency closure.
    pub modules: Vec<String>,

    pub global_definitions: Vec<String>,
    pub project_definitions: Vec<String>,

    pub compile_against_engine: Option<bool>,
    pub compile_against_core_uobject: Option<bool>,
    pub build_with_editor_only_data: Option<bool>,

    pub cpp_standard: Option<CppStandard>,
    pub shadow_variable_warning_level: Option<WarningLevel>,
    pub unsafe_cast_warning_level: Option<WarningLevel>,
    pub undefined_identifier_warning_level: Option<WarningLevel>,

    pub debug_info: Option<bool>,

    /// Per-platform sub-rule tables keyed by platform name.
    pub platform: BTreeMap<String, PlatformTargetSettings>,
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        TargetDescriptor {
            target_type: TargetType::Program,
            link_type: None,
            build_environment: None,
            modules: Vec::new(),
            global_definitions: Vec::new(),
            project_definitions: Vec::new(),
            compile_against_engine: None,
            compile_against_core_uobject: None,
            build_with_editor_only_data: None,
            cpp_standard: None,
            shadow_variable_warning_level: None,
            unsafe_cast_warning_level: None,
            undefined_identifier_warning_level: None,
            debug_info: None,
            platform: BTreeMap::new(),
        }
    }
}

impl TargetDescriptor {
    /// Parse a target descriptor from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("malformed target rule descriptor")
    }

    /// Load a target descriptor from a rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = crate::util::fs::read_to_string(path)?;
        Self::parse(&text).with_context(|| format!("in rule file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::TargetType;

    #[test]
    fn test_parse_module_descriptor() {
        let text = r#"
            public_dependencies = ["Core"]
            private_dependencies = ["TraceLog"]
            public_include_paths = ["Public"]
            private_include_paths = ["Private"]
            public_definitions = ["UI_API="]
            shared_pch_header = "Public/SharedPCH.UI.h"
            use_rtti = false
            pch_mode = "UseSharedPchs"
            optimization = "InNonDebugBuilds"
        "#;

        let desc = ModuleDescriptor::parse(text).unwrap();
        assert_eq!(desc.public_dependencies, vec!["Core"]);
        assert_eq!(desc.shared_pch_header.as_deref(), Some("Public/SharedPCH.UI.h"));
        assert_eq!(desc.use_rtti, Some(false));
        assert_eq!(desc.pch_mode, Some(PchMode::UseSharedPchs));
        assert_eq!(desc.kind, None);
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(ModuleDescriptor::parse("public_dependencies = 5").is_err());
    }

    #[test]
    fn test_deprecated_key_is_ignored_not_fatal() {
        let desc = ModuleDescriptor::parse("pch_usage = \"UseSharedPchs\"").unwrap();
        // Warned about, not honored.
        assert_eq!(desc.pch_mode, None);
    }

    #[test]
    fn test_overlay_appends_lists_and_overrides_scalars() {
        let mut base = ModuleDescriptor::parse(
            r#"
            public_dependencies = ["Core"]
            use_rtti = false
            "#,
        )
        .unwrap();
        let overlay = ModuleDescriptor::parse(
            r#"
            public_dependencies = ["D3D12RHI"]
            additional_libraries = ["d3d12.lib"]
            use_rtti = true
            "#,
        )
        .unwrap();

        base.apply_overlay(&overlay);
        assert_eq!(base.public_dependencies, vec!["Core", "D3D12RHI"]);
        assert_eq!(base.additional_libraries, vec!["d3d12.lib"]);
        assert_eq!(base.use_rtti, Some(true));
    }

    #[test]
    fn test_parse_target_descriptor_with_platform_tables() {
        let text = r#"
            type = "Editor"
            modules = ["MyGame"]
            global_definitions = ["WITH_EDITOR=1"]

            [platform.Win64]
            definitions = ["PLATFORM_WINDOWS=1"]
            linker_arguments = ["/DEBUG:FULL"]

            [platform.Linux]
            definitions = ["PLATFORM_LINUX=1"]
        "#;

        let desc = TargetDescriptor::parse(text).unwrap();
        assert_eq!(desc.target_type, TargetType::Editor);
        assert_eq!(desc.platform.len(), 2);
        assert_eq!(
            desc.platform["Win64"].definitions,
            vec!["PLATFORM_WINDOWS=1"]
        );
    }
}
