//! Platform, configuration, and rule-knob enums shared across the rules
//! layer and the planner.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform a target is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TargetPlatform {
    Win64,
    Linux,
    LinuxArm64,
    Mac,
    Android,
    #[serde(rename = "IOS", alias = "Ios")]
    Ios,
    #[serde(rename = "TVOS", alias = "Tvos")]
    Tvos,
}

impl TargetPlatform {
    /// All platforms the orchestrator knows about. Foreign-platform folder
    /// exclusion is computed from this set.
    pub fn all() -> &'static [TargetPlatform] {
        &[
            TargetPlatform::Win64,
            TargetPlatform::Linux,
            TargetPlatform::LinuxArm64,
            TargetPlatform::Mac,
            TargetPlatform::Android,
            TargetPlatform::Ios,
            TargetPlatform::Tvos,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetPlatform::Win64 => "Win64",
            TargetPlatform::Linux => "Linux",
            TargetPlatform::LinuxArm64 => "LinuxArm64",
            TargetPlatform::Mac => "Mac",
            TargetPlatform::Android => "Android",
            TargetPlatform::Ios => "IOS",
            TargetPlatform::Tvos => "TVOS",
        }
    }

    /// Groups this platform belongs to.
    pub fn groups(&self) -> &'static [PlatformGroup] {
        match self {
            TargetPlatform::Win64 => &[
                PlatformGroup::Windows,
                PlatformGroup::Microsoft,
                PlatformGroup::Desktop,
            ],
            TargetPlatform::Linux | TargetPlatform::LinuxArm64 => {
                &[PlatformGroup::Linux, PlatformGroup::Unix, PlatformGroup::Desktop]
            }
            TargetPlatform::Mac => &[
                PlatformGroup::Apple,
                PlatformGroup::Unix,
                PlatformGroup::Desktop,
            ],
            TargetPlatform::Android => &[PlatformGroup::Android, PlatformGroup::Mobile],
            TargetPlatform::Ios | TargetPlatform::Tvos => {
                &[PlatformGroup::Apple, PlatformGroup::Mobile]
            }
        }
    }

    /// Whether the platform can produce modular (DLL-per-module) builds.
    pub fn supports_modular_builds(&self) -> bool {
        !matches!(self, TargetPlatform::Ios | TargetPlatform::Tvos)
    }

    /// Directory names that must be pruned when discovering inputs for this
    /// platform: every known platform and group name minus the ones this
    /// platform includes.
    pub fn excluded_folder_names(&self) -> Vec<&'static str> {
        let mut included: Vec<&'static str> = vec![self.name()];
        included.extend(self.groups().iter().map(|g| g.name()));

        let mut excluded = Vec::new();
        for platform in TargetPlatform::all() {
            if !included.contains(&platform.name()) {
                excluded.push(platform.name());
            }
        }
        for group in PlatformGroup::all() {
            if !included.contains(&group.name()) {
                excluded.push(group.name());
            }
        }
        excluded
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Win64" => Ok(TargetPlatform::Win64),
            "Linux" => Ok(TargetPlatform::Linux),
            "LinuxArm64" => Ok(TargetPlatform::LinuxArm64),
            "Mac" => Ok(TargetPlatform::Mac),
            "Android" => Ok(TargetPlatform::Android),
            "IOS" => Ok(TargetPlatform::Ios),
            "TVOS" => Ok(TargetPlatform::Tvos),
            _ => Err(format!("unknown platform: {s}")),
        }
    }
}

/// A named family of platforms. Rule files may specialize per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformGroup {
    Windows,
    Microsoft,
    Apple,
    Unix,
    Linux,
    Android,
    #[serde(rename = "IOS")]
    Ios,
    Desktop,
    Mobile,
}

impl PlatformGroup {
    pub fn all() -> &'static [PlatformGroup] {
        &[
            PlatformGroup::Windows,
            PlatformGroup::Microsoft,
            PlatformGroup::Apple,
            PlatformGroup::Unix,
            PlatformGroup::Linux,
            PlatformGroup::Android,
            PlatformGroup::Ios,
            PlatformGroup::Desktop,
            PlatformGroup::Mobile,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlatformGroup::Windows => "Windows",
            PlatformGroup::Microsoft => "Microsoft",
            PlatformGroup::Apple => "Apple",
            PlatformGroup::Unix => "Unix",
            PlatformGroup::Linux => "Linux",
            PlatformGroup::Android => "Android",
            PlatformGroup::Ios => "IOS",
            PlatformGroup::Desktop => "Desktop",
            PlatformGroup::Mobile => "Mobile",
        }
    }

    pub fn contains(&self, platform: TargetPlatform) -> bool {
        platform.groups().contains(self)
    }
}

impl fmt::Display for PlatformGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlatformGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformGroup::all()
            .iter()
            .copied()
            .find(|g| g.name() == s)
            .ok_or_else(|| format!("unknown platform group: {s}"))
    }
}

/// Build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetConfiguration {
    Debug,
    DebugGame,
    Development,
    Test,
    Shipping,
}

impl TargetConfiguration {
    pub fn name(&self) -> &'static str {
        match self {
            TargetConfiguration::Debug => "Debug",
            TargetConfiguration::DebugGame => "DebugGame",
            TargetConfiguration::Development => "Development",
            TargetConfiguration::Test => "Test",
            TargetConfiguration::Shipping => "Shipping",
        }
    }
}

impl fmt::Display for TargetConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debug" => Ok(TargetConfiguration::Debug),
            "DebugGame" => Ok(TargetConfiguration::DebugGame),
            "Development" => Ok(TargetConfiguration::Development),
            "Test" => Ok(TargetConfiguration::Test),
            "Shipping" => Ok(TargetConfiguration::Shipping),
            _ => Err(format!("unknown configuration: {s}")),
        }
    }
}

/// Target architecture. Kept as an open string-backed value since platform
/// layers add architectures without touching the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetArchitecture {
    X64,
    Arm64,
}

impl TargetArchitecture {
    pub fn name(&self) -> &'static str {
        match self {
            TargetArchitecture::X64 => "x64",
            TargetArchitecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for TargetArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetArchitecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x64" | "X64" => Ok(TargetArchitecture::X64),
            "arm64" | "Arm64" => Ok(TargetArchitecture::Arm64),
            _ => Err(format!("unknown architecture: {s}")),
        }
    }
}

/// Kind of top-level artifact a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Game,
    Editor,
    Client,
    Server,
    Program,
}

/// How modules are linked into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkType {
    #[default]
    Default,
    /// All modules linked into one binary.
    Monolithic,
    /// One dynamic library per module.
    Modular,
}

/// Whether intermediates are shared with other targets or private.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BuildEnvironment {
    #[default]
    Shared,
    Unique,
}

/// Kind of module: compiled C++ or a prebuilt external.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModuleKind {
    #[default]
    CPlusPlus,
    External,
}

/// Precompiled-header policy for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PchMode {
    #[default]
    Default,
    None,
    NoSharedPchs,
    UseSharedPchs,
    UseExplicitOrSharedPchs,
}

/// When a module's code is optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OptimizationMode {
    #[default]
    Default,
    Never,
    InNonDebugBuilds,
    InShippingBuildsOnly,
    Always,
}

impl OptimizationMode {
    /// Whether optimization is enabled for `config`. Engine modules stay
    /// optimized in DebugGame; game modules do not.
    pub fn should_optimize(
        &self,
        config: TargetConfiguration,
        is_engine_module: bool,
    ) -> bool {
        match self {
            OptimizationMode::Never => false,
            OptimizationMode::Default | OptimizationMode::InNonDebugBuilds => {
                config != TargetConfiguration::Debug
                    && (config != TargetConfiguration::DebugGame || is_engine_module)
            }
            OptimizationMode::InShippingBuildsOnly => config == TargetConfiguration::Shipping,
            OptimizationMode::Always => true,
        }
    }
}

/// Diagnostic level for a class of compiler warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WarningLevel {
    #[default]
    Default,
    Off,
    Warning,
    Error,
}

/// C++ language standard requested by a module or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum CppStandard {
    #[default]
    Default,
    #[serde(rename = "14", alias = "c++14", alias = "cpp14")]
    Cpp14,
    #[serde(rename = "17", alias = "c++17", alias = "cpp17")]
    Cpp17,
    #[serde(rename = "20", alias = "c++20", alias = "cpp20")]
    Cpp20,
    Latest,
}

impl CppStandard {
    /// Get the standard as a compiler flag value (e.g., "c++17").
    pub fn as_flag_value(&self) -> &'static str {
        match self {
            CppStandard::Default | CppStandard::Cpp17 => "c++17",
            CppStandard::Cpp14 => "c++14",
            CppStandard::Cpp20 => "c++20",
            CppStandard::Latest => "c++latest",
        }
    }
}

impl FromStr for CppStandard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "14" | "c++14" | "cpp14" => Ok(CppStandard::Cpp14),
            "17" | "c++17" | "cpp17" => Ok(CppStandard::Cpp17),
            "20" | "c++20" | "cpp20" => Ok(CppStandard::Cpp20),
            "latest" | "Latest" => Ok(CppStandard::Latest),
            "default" | "Default" => Ok(CppStandard::Default),
            _ => Err(format!("unknown C++ standard: {s}")),
        }
    }
}

/// Symbol visibility for a compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SymbolVisibility {
    #[default]
    Default,
    Hidden,
    VisibleForDll,
}

/// What a compile action does about precompiled headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PchAction {
    #[default]
    None,
    Include,
    Create,
}

/// Whether a module should be precompiled for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PrecompileMode {
    /// Resolved from directory location at instantiation time.
    #[default]
    Default,
    Never,
    Always,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_folders_for_linux() {
        let excluded = TargetPlatform::Linux.excluded_folder_names();
        assert!(excluded.contains(&"Win64"));
        assert!(excluded.contains(&"Windows"));
        assert!(excluded.contains(&"Apple"));
        assert!(excluded.contains(&"Mobile"));
        // Own name and own groups are never excluded.
        assert!(!excluded.contains(&"Linux"));
        assert!(!excluded.contains(&"Unix"));
        assert!(!excluded.contains(&"Desktop"));
    }

    #[test]
    fn test_group_membership() {
        assert!(PlatformGroup::Apple.contains(TargetPlatform::Mac));
        assert!(PlatformGroup::Apple.contains(TargetPlatform::Ios));
        assert!(!PlatformGroup::Apple.contains(TargetPlatform::Win64));
        assert!(PlatformGroup::Desktop.contains(TargetPlatform::Win64));
    }

    #[test]
    fn test_optimization_policy() {
        use TargetConfiguration::*;

        let m = OptimizationMode::Never;
        assert!(!m.should_optimize(Shipping, true));

        let m = OptimizationMode::InNonDebugBuilds;
        assert!(!m.should_optimize(Debug, true));
        assert!(m.should_optimize(DebugGame, true));
        assert!(!m.should_optimize(DebugGame, false));
        assert!(m.should_optimize(Development, false));

        let m = OptimizationMode::Default;
        assert!(!m.should_optimize(Debug, false));
        assert!(m.should_optimize(Shipping, false));

        let m = OptimizationMode::InShippingBuildsOnly;
        assert!(!m.should_optimize(Test, true));
        assert!(m.should_optimize(Shipping, false));

        let m = OptimizationMode::Always;
        assert!(m.should_optimize(Debug, false));
    }

    #[test]
    fn test_platform_round_trip() {
        for p in TargetPlatform::all() {
            assert_eq!(p.name().parse::<TargetPlatform>().unwrap(), *p);
        }
    }
}
