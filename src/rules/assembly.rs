//! Rules assembly compilation.
//!
//! An assembly is the compiled registry of every rule descriptor found
//! under one logical layer (engine, enterprise, project, plugin).
//! Assemblies chain parent-ward, `plugin -> project -> enterprise ->
//! engine`; name lookups walk the chain and the first hit wins.
//!
//! Compilation is avoided when a side-car manifest proves the cached
//! artifact is current. The artifact and manifest are always rewritten as
//! a pair, atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::rules::context::ModuleRulesContext;
use crate::rules::descriptor::{ModuleDescriptor, TargetDescriptor};
use crate::rules::scanner::{rule_name, ScannedRules, MODULE_RULES_SUFFIX, TARGET_RULES_SUFFIX};
use crate::rules::scope::RulesScope;
use crate::rules::types::{PlatformGroup, TargetPlatform};
use crate::util::fs::{last_write_time, write_atomic};
use crate::util::InternedString;

/// Side-car manifest proving which sources produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssemblyManifest {
    pub source_files: Vec<String>,
    pub engine_version: String,
}

/// A platform or group specialization overlay for a module rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializedRule {
    pub file: PathBuf,
    pub descriptor: ModuleDescriptor,
}

/// A compiled module rule: base descriptor plus specialization overlays
/// keyed by platform or platform-group name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModuleRule {
    pub name: InternedString,
    pub file: PathBuf,
    pub directory: PathBuf,
    pub descriptor: ModuleDescriptor,
    pub specializations: BTreeMap<String, SpecializedRule>,
}

/// A compiled target rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledTargetRule {
    pub name: InternedString,
    pub file: PathBuf,
    pub directory: PathBuf,
    pub descriptor: TargetDescriptor,
}

/// What kind of rule a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Module,
    Target,
}

/// The persisted registry portion of an assembly.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RulesRegistry {
    format_version: u32,
    modules: BTreeMap<String, CompiledModuleRule>,
    targets: BTreeMap<String, CompiledTargetRule>,
}

/// Current registry artifact format. Bump on any schema change.
const REGISTRY_FORMAT_VERSION: u32 = 3;

/// A compiled rules assembly with its parent chain.
#[derive(Debug)]
pub struct RulesAssembly {
    name: InternedString,
    context: ModuleRulesContext,
    registry: RulesRegistry,
    parent: Option<Arc<RulesAssembly>>,
    /// Set when the layer is installed; its rules may not be mutated by
    /// per-target configuration.
    read_only: bool,
}

impl RulesAssembly {
    pub fn name(&self) -> InternedString {
        self.name
    }

    pub fn scope(&self) -> &Arc<RulesScope> {
        &self.context.scope
    }

    pub fn context(&self) -> &ModuleRulesContext {
        &self.context
    }

    pub fn parent(&self) -> Option<&Arc<RulesAssembly>> {
        self.parent.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Find a module rule by name, walking the parent chain. Returns the
    /// rule together with the assembly that owns it.
    pub fn find_module_rule(
        self: &Arc<Self>,
        name: &str,
    ) -> Option<(&CompiledModuleRule, Arc<RulesAssembly>)> {
        let mut current = Some(self);
        while let Some(assembly) = current {
            if let Some(rule) = assembly.registry.modules.get(name) {
                return Some((rule, assembly.clone()));
            }
            current = assembly.parent.as_ref();
        }
        None
    }

    /// Find a target rule by name. Accepts both the bare target name and
    /// the `Target`-suffixed rule name.
    pub fn find_target_rule(
        self: &Arc<Self>,
        name: &str,
    ) -> Option<(&CompiledTargetRule, Arc<RulesAssembly>)> {
        let suffixed = format!("{name}Target");
        let mut current = Some(self);
        while let Some(assembly) = current {
            let hit = assembly
                .registry
                .targets
                .get(name)
                .or_else(|| assembly.registry.targets.get(&suffixed));
            if let Some(rule) = hit {
                return Some((rule, assembly.clone()));
            }
            current = assembly.parent.as_ref();
        }
        None
    }

    /// Name -> rule-file lookup across the chain.
    pub fn rule_file(self: &Arc<Self>, name: &str) -> Option<PathBuf> {
        if let Some((rule, _)) = self.find_module_rule(name) {
            return Some(rule.file.clone());
        }
        self.find_target_rule(name).map(|(rule, _)| rule.file.clone())
    }

    /// Name -> rule-kind lookup across the chain.
    pub fn rule_kind(self: &Arc<Self>, name: &str) -> Option<RuleKind> {
        if self.find_module_rule(name).is_some() {
            return Some(RuleKind::Module);
        }
        if self.find_target_rule(name).is_some() {
            return Some(RuleKind::Target);
        }
        None
    }

    /// Module names registered in this assembly alone.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.registry.modules.keys().map(|s| s.as_str())
    }
}

/// Inputs for compiling one assembly.
pub struct AssemblyCompileOptions {
    pub name: InternedString,
    pub context: ModuleRulesContext,
    pub output_dir: PathBuf,
    pub engine_version: String,
    pub parent: Option<Arc<RulesAssembly>>,
    /// The layer is installed: skip writes, mark rules immutable.
    pub installed: bool,
    /// Trust the cached artifact without staleness checks when present.
    pub skip_staleness_check: bool,
}

/// Compile an assembly from scanned rule files, reusing the cached
/// artifact when the manifest proves it current.
pub fn compile_assembly(
    options: &AssemblyCompileOptions,
    scanned: &ScannedRules,
) -> Result<Arc<RulesAssembly>, BuildError> {
    let artifact_path = options.output_dir.join(format!("{}.rules.bin", options.name));
    let manifest_path = options
        .output_dir
        .join(format!("{}.manifest.json", options.name));

    let mut sources: Vec<PathBuf> = scanned
        .module_files
        .iter()
        .chain(scanned.target_files.iter())
        .cloned()
        .collect();
    sources.sort();

    let reuse = if options.skip_staleness_check {
        artifact_path.exists()
    } else {
        !needs_recompile(&artifact_path, &manifest_path, &sources, &options.engine_version)
    };

    if reuse {
        match load_registry(&artifact_path) {
            Ok(registry) => {
                tracing::debug!(assembly = %options.name, "reusing compiled rules artifact");
                return Ok(Arc::new(RulesAssembly {
                    name: options.name,
                    context: options.context.clone(),
                    registry,
                    parent: options.parent.clone(),
                    read_only: options.installed,
                }));
            }
            Err(err) => {
                // Cache errors are recoverable: fall through to recompile.
                tracing::warn!(
                    artifact = %artifact_path.display(),
                    %err,
                    "discarding unreadable rules artifact"
                );
            }
        }
    }

    let registry = parse_registry(options.name, scanned)?;

    if !options.installed {
        persist(&artifact_path, &manifest_path, &registry, &sources, options).map_err(|err| {
            BuildError::Io {
                path: artifact_path.clone(),
                message: format!("failed to persist compiled rules: {err:#}"),
            }
        })?;
    }

    Ok(Arc::new(RulesAssembly {
        name: options.name,
        context: options.context.clone(),
        registry,
        parent: options.parent.clone(),
        read_only: options.installed,
    }))
}

/// Recompilation is required iff any trigger fires: missing artifact,
/// newer host tool, missing or mismatched manifest, changed source set,
/// or a source newer than the artifact.
fn needs_recompile(
    artifact_path: &Path,
    manifest_path: &Path,
    sources: &[PathBuf],
    engine_version: &str,
) -> bool {
    let Some(artifact_time) = last_write_time(artifact_path) else {
        return true;
    };

    if let Some(tool_time) = host_tool_mtime() {
        if tool_time > artifact_time {
            return true;
        }
    }

    let manifest: AssemblyManifest = match std::fs::read_to_string(manifest_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
    {
        Some(manifest) => manifest,
        None => return true,
    };

    if manifest.engine_version != engine_version {
        return true;
    }

    let recorded: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();
    if manifest.source_files != recorded {
        return true;
    }

    // Parallel mtime sweep over the source set.
    sources
        .par_iter()
        .any(|source| match last_write_time(source) {
            Some(time) => time > artifact_time,
            None => true,
        })
}

fn host_tool_mtime() -> Option<SystemTime> {
    std::env::current_exe().ok().and_then(|exe| last_write_time(&exe))
}

fn load_registry(artifact_path: &Path) -> Result<RulesRegistry> {
    let bytes = std::fs::read(artifact_path)
        .with_context(|| format!("failed to read artifact: {}", artifact_path.display()))?;
    let registry: RulesRegistry =
        bincode::deserialize(&bytes).context("artifact deserialization failed")?;
    if registry.format_version != REGISTRY_FORMAT_VERSION {
        anyhow::bail!(
            "artifact format version {} != {}",
            registry.format_version,
            REGISTRY_FORMAT_VERSION
        );
    }
    Ok(registry)
}

/// Parse every rule file into the registry. The first parse error aborts
/// with a structured report naming the offending file.
fn parse_registry(
    assembly_name: InternedString,
    scanned: &ScannedRules,
) -> Result<RulesRegistry, BuildError> {
    let mut registry = RulesRegistry {
        format_version: REGISTRY_FORMAT_VERSION,
        ..Default::default()
    };

    // Base modules first so specialization stems can be told apart from
    // plain module names containing underscores.
    let mut parsed: Vec<(String, PathBuf, ModuleDescriptor)> = Vec::new();
    for file in &scanned.module_files {
        let Some(stem) = rule_name(file, MODULE_RULES_SUFFIX) else {
            continue;
        };
        let descriptor = ModuleDescriptor::load(file).map_err(|err| BuildError::Toolchain {
            assembly: assembly_name.to_string(),
            diagnostics: vec![format!("{}: {err:#}", file.display())],
        })?;
        parsed.push((stem.to_string(), file.clone(), descriptor));
    }

    let base_names: Vec<String> = parsed
        .iter()
        .filter(|(stem, _, _)| split_specialization(stem).is_none())
        .map(|(stem, _, _)| stem.clone())
        .collect();

    // Two passes: bases first, so an overlay whose base sorts later in
    // the file list still finds it.
    let (overlays, bases): (Vec<_>, Vec<_>) = parsed.into_iter().partition(|(stem, _, _)| {
        matches!(split_specialization(stem), Some((base, _)) if base_names.iter().any(|n| n == base))
    });

    for (stem, file, descriptor) in bases {
        let directory = file.parent().map(Path::to_path_buf).unwrap_or_default();
        registry.modules.insert(
            stem.clone(),
            CompiledModuleRule {
                name: InternedString::new(&stem),
                file,
                directory,
                descriptor,
                specializations: BTreeMap::new(),
            },
        );
    }

    for (stem, file, descriptor) in overlays {
        let (base, suffix) = split_specialization(&stem).expect("partitioned as overlay");
        let entry = registry.modules.get_mut(base).expect("base inserted above");
        entry
            .specializations
            .insert(suffix.to_string(), SpecializedRule { file, descriptor });
    }

    for file in &scanned.target_files {
        let Some(stem) = rule_name(file, TARGET_RULES_SUFFIX) else {
            continue;
        };
        let descriptor = TargetDescriptor::load(file).map_err(|err| BuildError::Toolchain {
            assembly: assembly_name.to_string(),
            diagnostics: vec![format!("{}: {err:#}", file.display())],
        })?;
        let directory = file.parent().map(Path::to_path_buf).unwrap_or_default();
        registry.targets.insert(
            stem.to_string(),
            CompiledTargetRule {
                name: InternedString::new(stem),
                file: file.clone(),
                directory,
                descriptor,
            },
        );
    }

    Ok(registry)
}

/// Split `Core_Win64` into `("Core", "Win64")` when the suffix names a
/// known platform or platform group.
fn split_specialization(stem: &str) -> Option<(&str, &str)> {
    let (base, suffix) = stem.rsplit_once('_')?;
    if base.is_empty() {
        return None;
    }
    let is_platform = suffix.parse::<TargetPlatform>().is_ok();
    let is_group = suffix.parse::<PlatformGroup>().is_ok();
    (is_platform || is_group).then_some((base, suffix))
}

/// Write the artifact and its manifest as a pair, each atomically.
fn persist(
    artifact_path: &Path,
    manifest_path: &Path,
    registry: &RulesRegistry,
    sources: &[PathBuf],
    options: &AssemblyCompileOptions,
) -> Result<()> {
    let bytes = bincode::serialize(registry).context("artifact serialization failed")?;
    write_atomic(artifact_path, &bytes)?;

    let manifest = AssemblyManifest {
        source_files: sources.iter().map(|p| p.display().to_string()).collect(),
        engine_version: options.engine_version.clone(),
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    write_atomic(manifest_path, manifest_json.as_bytes())?;

    tracing::info!(
        assembly = %options.name,
        modules = registry.modules.len(),
        targets = registry.targets.len(),
        "compiled rules assembly"
    );
    Ok(())
}
