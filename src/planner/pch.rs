//! Precompiled-header planning.
//!
//! Modules that declare a public shared PCH header contribute a
//! [`PchTemplate`]. A consumer picks the first template owned by a module
//! in its dependency closure, then reuses a compatible instance or
//! synthesizes a new one whose wrapper file name carries a deterministic
//! suffix describing how it diverges from the template. Modules that opt
//! out of sharing get a private wrapper, and adaptive non-unity files can
//! fall back to a dedicated per-file PCH.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::error::BuildError;
use crate::graph::environment::CompileEnvironment;
use crate::graph::resolve::ModuleGraph;
use crate::planner::actions::{Action, ActionGraphBuilder, ActionKind};
use crate::rules::module::ModuleRules;
use crate::rules::types::{PchAction, PchMode, WarningLevel};
use crate::util::fs::{last_write_time, touch};
use crate::util::InternedString;

/// Artifacts produced by compiling one PCH instance.
#[derive(Debug, Clone)]
pub struct PchOutput {
    pub object_files: Vec<PathBuf>,
    pub debug_files: Vec<PathBuf>,
    pub generated_headers: Vec<PathBuf>,
    pub pch_artifact: PathBuf,
}

/// A concrete, compiled variant of a shared PCH template.
#[derive(Debug, Clone)]
pub struct PchInstance {
    /// The emitted wrapper header this instance compiles.
    pub header_file: PathBuf,
    pub environment: CompileEnvironment,
    pub output: PchOutput,
}

/// A shared PCH offered by one module to its dependents.
#[derive(Debug)]
pub struct PchTemplate {
    pub owning_module: InternedString,
    pub base_environment: CompileEnvironment,
    pub pch_header_file: PathBuf,
    pub output_dir: PathBuf,
    pub instances: Vec<PchInstance>,
}

/// What PCH arrangement a module ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PchSelection {
    None,
    Shared {
        wrapper: PathBuf,
        artifact: PathBuf,
        owner: InternedString,
    },
    Private {
        wrapper: PathBuf,
        artifact: PathBuf,
    },
}

/// Two environments may share one PCH instance iff every axis that
/// changes the precompiled state matches.
pub fn is_compatible_for_shared_pch(a: &CompileEnvironment, b: &CompileEnvironment) -> bool {
    a.optimize_code == b.optimize_code
        && a.use_rtti == b.use_rtti
        && a.enable_exceptions == b.enable_exceptions
        && a.shadow_variable_warning_level == b.shadow_variable_warning_level
        && a.unsafe_cast_warning_level == b.unsafe_cast_warning_level
        && a.undefined_identifier_warning_level == b.undefined_identifier_warning_level
        && a.is_building_dll == b.is_building_dll
        && a.is_building_library == b.is_building_library
}

/// A template applies to a module at all only when their binary shapes
/// agree; knob differences are handled by instances.
fn is_valid_for(template: &CompileEnvironment, module: &CompileEnvironment) -> bool {
    template.is_building_dll == module.is_building_dll
        && template.is_building_library == module.is_building_library
}

/// Deterministic wrapper-name suffix describing how `module` diverges
/// from `template`, one token per divergent axis in fixed order.
fn instance_suffix(template: &CompileEnvironment, module: &CompileEnvironment) -> String {
    let mut suffix = String::new();
    if template.optimize_code != module.optimize_code {
        suffix.push_str(if module.optimize_code {
            ".Optimized"
        } else {
            ".NonOptimized"
        });
    }
    if template.use_rtti != module.use_rtti {
        suffix.push_str(if module.use_rtti { ".RTTI" } else { ".NonRTTI" });
    }
    if template.enable_exceptions != module.enable_exceptions {
        suffix.push_str(if module.enable_exceptions {
            ".Exceptions"
        } else {
            ".NoExceptions"
        });
    }
    if template.shadow_variable_warning_level != module.shadow_variable_warning_level {
        suffix.push_str(match module.shadow_variable_warning_level {
            WarningLevel::Error => ".ShadowErrors",
            WarningLevel::Warning => ".ShadowWarnings",
            _ => ".NoShadow",
        });
    }
    if template.unsafe_cast_warning_level != module.unsafe_cast_warning_level {
        suffix.push_str(match module.unsafe_cast_warning_level {
            WarningLevel::Error => ".TypeCastErrors",
            WarningLevel::Warning => ".TypeCastWarnings",
            _ => ".NoTypeCast",
        });
    }
    if template.undefined_identifier_warning_level != module.undefined_identifier_warning_level {
        suffix.push_str(
            if module.undefined_identifier_warning_level == WarningLevel::Off {
                ".NoUndef"
            } else {
                ".Undef"
            },
        );
    }
    suffix
}

/// Planner state for one target: discovered templates and their grown
/// instance lists.
#[derive(Default)]
pub struct PchPlanner {
    templates: Vec<PchTemplate>,
}

impl PchPlanner {
    /// Discover shared PCH templates from the graph. Templates attach in
    /// reverse topological order so the most derived provider in a
    /// consumer's closure is found first.
    pub fn discover(
        graph: &ModuleGraph,
        module_envs: &dyn Fn(InternedString) -> Option<CompileEnvironment>,
        intermediate_dir: &Path,
    ) -> Self {
        let mut templates = Vec::new();
        let mut order = graph.topological_order();
        order.reverse();

        for name in order {
            let Some(module) = graph.module(name) else {
                continue;
            };
            let Some(header) = &module.shared_pch_header else {
                continue;
            };
            if !module.context.can_use_for_shared_pch {
                continue;
            }
            let Some(environment) = module_envs(name) else {
                continue;
            };
            templates.push(PchTemplate {
                owning_module: name,
                base_environment: environment,
                pch_header_file: header.clone(),
                output_dir: intermediate_dir.join(name.as_str()).join("SharedPCHs"),
                instances: Vec::new(),
            });
        }

        PchPlanner { templates }
    }

    pub fn templates(&self) -> &[PchTemplate] {
        &self.templates
    }

    /// Configure `env` for `module` per its PCH policy, emitting wrapper
    /// files and `Create` actions as needed.
    pub fn setup_module_pch(
        &mut self,
        module: &Arc<ModuleRules>,
        env: &mut CompileEnvironment,
        graph: &ModuleGraph,
        target: &crate::rules::target::TargetRules,
        builder: &ActionGraphBuilder,
        module_intermediate_dir: &Path,
    ) -> Result<PchSelection, BuildError> {
        match module.effective_pch_mode(target) {
            PchMode::None => Ok(PchSelection::None),
            PchMode::NoSharedPchs | PchMode::UseExplicitOrSharedPchs
                if module.private_pch_header.is_some() =>
            {
                self.setup_private_pch(module, env, builder, module_intermediate_dir)
            }
            PchMode::NoSharedPchs => Ok(PchSelection::None),
            PchMode::UseSharedPchs | PchMode::UseExplicitOrSharedPchs => {
                self.setup_shared_pch(module, env, graph, builder, module_intermediate_dir)
            }
            PchMode::Default => unreachable!("effective_pch_mode resolves Default"),
        }
    }

    fn setup_shared_pch(
        &mut self,
        module: &Arc<ModuleRules>,
        env: &mut CompileEnvironment,
        graph: &ModuleGraph,
        builder: &ActionGraphBuilder,
        module_intermediate_dir: &Path,
    ) -> Result<PchSelection, BuildError> {
        let closure = graph.transitive_dependencies(module.name);

        let template_index = self.templates.iter().position(|template| {
            closure.contains(&template.owning_module)
                && is_valid_for(&template.base_environment, env)
        });
        let Some(template_index) = template_index else {
            // No provider in the closure: the module compiles without a
            // PCH rather than failing the build.
            tracing::debug!(module = %module.name, "no shared PCH template in closure");
            return Ok(PchSelection::None);
        };

        let instance_index = {
            let template = &self.templates[template_index];
            template
                .instances
                .iter()
                .position(|instance| is_compatible_for_shared_pch(&instance.environment, env))
        };

        let instance_index = match instance_index {
            Some(index) => index,
            None => self.create_instance(template_index, env, builder)?,
        };

        let template = &self.templates[template_index];
        let instance = &template.instances[instance_index];

        // Definitions move into a force-included header that defuses the
        // module's export macro before the shared PCH re-declares it.
        let definitions_header = module_intermediate_dir.join(format!("Definitions.{}.h", module.name));
        let contents = consumer_definitions(module, env);
        builder
            .create_intermediate_text_file(&definitions_header, &contents)
            .map_err(|err| BuildError::io(&definitions_header, format!("{err:#}")))?;
        env.definitions.clear();

        env.pch_action = PchAction::Include;
        env.pch_header = Some(instance.header_file.clone());
        env.precompiled_header_file = Some(instance.output.pch_artifact.clone());
        env.force_include_files.push(definitions_header);
        env.force_include_files.push(instance.header_file.clone());
        env.additional_prerequisites
            .push(instance.output.pch_artifact.clone());

        Ok(PchSelection::Shared {
            wrapper: instance.header_file.clone(),
            artifact: instance.output.pch_artifact.clone(),
            owner: template.owning_module,
        })
    }

    /// Synthesize a new instance of a template for `consumer_env`.
    fn create_instance(
        &mut self,
        template_index: usize,
        consumer_env: &CompileEnvironment,
        builder: &ActionGraphBuilder,
    ) -> Result<usize, BuildError> {
        let template = &mut self.templates[template_index];
        let suffix = instance_suffix(&template.base_environment, consumer_env);

        let wrapper = template
            .output_dir
            .join(format!("SharedPCH.{}{}.h", template.owning_module, suffix));

        // The wrapper carries the owning module's definitions and a
        // single include of the canonical header.
        let mut contents = String::new();
        for definition in template.base_environment.definitions.iter() {
            contents.push_str(&define_line(definition));
        }
        contents.push_str(&format!(
            "#include \"{}\"\n",
            template.pch_header_file.display()
        ));
        builder
            .create_intermediate_text_file(&wrapper, &contents)
            .map_err(|err| BuildError::io(&wrapper, format!("{err:#}")))?;

        // Timestamp coherence: the wrapper must never predate the header
        // it includes.
        if let (Some(header_time), Some(wrapper_time)) = (
            last_write_time(&template.pch_header_file),
            last_write_time(&wrapper),
        ) {
            if header_time > wrapper_time {
                touch(&wrapper).map_err(|err| BuildError::io(&wrapper, format!("{err:#}")))?;
            }
        }

        let artifact = wrapper.with_extension("h.gch");
        let object_file = wrapper.with_extension("o");

        let mut environment = template.base_environment.clone();
        environment.optimize_code = consumer_env.optimize_code;
        environment.use_rtti = consumer_env.use_rtti;
        environment.enable_exceptions = consumer_env.enable_exceptions;
        environment.shadow_variable_warning_level = consumer_env.shadow_variable_warning_level;
        environment.unsafe_cast_warning_level = consumer_env.unsafe_cast_warning_level;
        environment.undefined_identifier_warning_level =
            consumer_env.undefined_identifier_warning_level;
        environment.is_building_dll = consumer_env.is_building_dll;
        environment.is_building_library = consumer_env.is_building_library;
        environment.pch_action = PchAction::Create;
        environment.pch_header = Some(wrapper.clone());
        environment.precompiled_header_file = Some(artifact.clone());

        let mut action = Action::new(ActionKind::Compile);
        action.prerequisite_items = vec![wrapper.clone(), template.pch_header_file.clone()];
        action.produced_items = vec![artifact.clone(), object_file.clone()];
        action.working_dir = template.output_dir.clone();
        action.status_description = wrapper
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        action.can_execute_remotely = true;
        builder.push(action)?;

        template.instances.push(PchInstance {
            header_file: wrapper,
            environment,
            output: PchOutput {
                object_files: vec![object_file],
                debug_files: Vec::new(),
                generated_headers: Vec::new(),
                pch_artifact: artifact,
            },
        });
        Ok(template.instances.len() - 1)
    }

    fn setup_private_pch(
        &mut self,
        module: &Arc<ModuleRules>,
        env: &mut CompileEnvironment,
        builder: &ActionGraphBuilder,
        module_intermediate_dir: &Path,
    ) -> Result<PchSelection, BuildError> {
        let private_header = module
            .private_pch_header
            .clone()
            .expect("private PCH requires a header");

        // Definitions migrate into a force-included header so the PCH
        // compiles clean and consumers stay in sync with it.
        let definitions_header =
            module_intermediate_dir.join(format!("Definitions.{}.h", module.name));
        let mut contents = String::new();
        for definition in env.definitions.iter() {
            contents.push_str(&define_line(definition));
        }
        builder
            .create_intermediate_text_file(&definitions_header, &contents)
            .map_err(|err| BuildError::io(&definitions_header, format!("{err:#}")))?;
        env.definitions.clear();

        let wrapper = module_intermediate_dir.join(format!("PCH.{}.h", module.name));
        let wrapper_contents = format!("#include \"{}\"\n", private_header.display());
        builder
            .create_intermediate_text_file(&wrapper, &wrapper_contents)
            .map_err(|err| BuildError::io(&wrapper, format!("{err:#}")))?;

        if let (Some(header_time), Some(wrapper_time)) =
            (last_write_time(&private_header), last_write_time(&wrapper))
        {
            if header_time > wrapper_time {
                touch(&wrapper).map_err(|err| BuildError::io(&wrapper, format!("{err:#}")))?;
            }
        }

        let artifact = wrapper.with_extension("h.gch");
        let object_file = wrapper.with_extension("o");

        let mut action = Action::new(ActionKind::Compile);
        action.prerequisite_items = vec![wrapper.clone(), private_header];
        action.produced_items = vec![artifact.clone(), object_file];
        action.working_dir = module_intermediate_dir.to_path_buf();
        action.status_description = wrapper
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        action.can_execute_remotely = true;
        builder.push(action)?;

        env.pch_action = PchAction::Include;
        env.pch_header = Some(wrapper.clone());
        env.precompiled_header_file = Some(artifact.clone());
        env.force_include_files.push(definitions_header);
        env.force_include_files.push(wrapper.clone());
        env.additional_prerequisites.push(artifact.clone());

        Ok(PchSelection::Private { wrapper, artifact })
    }
}

/// Consumer-side definitions header: defuse the export macro, patch
/// game-module deprecation macros, then restate the module definitions.
fn consumer_definitions(module: &ModuleRules, env: &CompileEnvironment) -> String {
    let mut contents = String::new();
    contents.push_str(&format!("#undef {}\n", module.api_macro()));
    if !module.treat_as_engine_module {
        contents.push_str("#undef DEPRECATED_FORGAME\n");
        contents.push_str("#define DEPRECATED_FORGAME DEPRECATED\n");
    }
    for definition in env.definitions.iter() {
        contents.push_str(&define_line(definition));
    }
    contents
}

fn define_line(definition: &str) -> String {
    match definition.split_once('=') {
        Some((name, "")) => format!("#define {name}\n"),
        Some((name, value)) => format!("#define {name} {value}\n"),
        None => format!("#define {definition} 1\n"),
    }
}

/// How an adaptive non-unity file compiles relative to the module PCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptivePchPolicy {
    /// Compile with no PCH at all.
    DisablePch,
    /// Synthesize a dedicated PCH from the file's leading includes.
    PerFileDedicated,
    /// Keep the module PCH, drop optimization for fast iteration.
    ModulePchWithDistinctFlags,
}

/// Derive the environment an adaptive file compiles under.
pub fn adaptive_environment(
    file: &Path,
    policy: AdaptivePchPolicy,
    module_env: &CompileEnvironment,
    builder: &ActionGraphBuilder,
    output_dir: &Path,
) -> Result<CompileEnvironment, BuildError> {
    let mut env = module_env.clone();
    env.use_unity = false;

    match policy {
        AdaptivePchPolicy::DisablePch => {
            env.pch_action = PchAction::None;
            env.pch_header = None;
            env.precompiled_header_file = None;
        }
        AdaptivePchPolicy::ModulePchWithDistinctFlags => {
            env.optimize_code = false;
        }
        AdaptivePchPolicy::PerFileDedicated => {
            let includes = leading_includes(file)
                .map_err(|err| BuildError::io(file, format!("{err:#}")))?;
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let wrapper = output_dir.join(format!("PCH.{stem}.dedicated.h"));
            let mut contents = String::new();
            for include in &includes {
                contents.push_str(&format!("#include {include}\n"));
            }
            builder
                .create_intermediate_text_file(&wrapper, &contents)
                .map_err(|err| BuildError::io(&wrapper, format!("{err:#}")))?;

            let artifact = wrapper.with_extension("h.gch");
            let mut action = Action::new(ActionKind::Compile);
            action.prerequisite_items = vec![wrapper.clone(), file.to_path_buf()];
            action.produced_items = vec![artifact.clone()];
            action.working_dir = output_dir.to_path_buf();
            action.status_description = wrapper
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            builder.push(action)?;

            env.pch_action = PchAction::Include;
            env.pch_header = Some(wrapper);
            env.precompiled_header_file = Some(artifact.clone());
            env.additional_prerequisites.push(artifact);
        }
    }

    Ok(env)
}

/// The `#include` directives at the top of a translation unit, stopping
/// at the first line of real code.
fn leading_includes(file: &Path) -> Result<Vec<String>> {
    let text = crate::util::fs::read_to_string(file)?;
    let mut includes = Vec::new();
    let mut in_block_comment = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("#pragma") {
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block_comment = true;
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("#include") {
            includes.push(rest.trim().to_string());
            continue;
        }
        break;
    }
    Ok(includes)
}
