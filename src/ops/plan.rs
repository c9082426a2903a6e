//! End-to-end planning for one target.
//!
//! Scans rule sources, compiles assemblies, instantiates the target and
//! its module graph, derives compile environments, plans PCHs and unity
//! batches, and emits the dependency-tracked action graph. The graph and
//! the per-target makefile are persisted only on success.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::graph::environment::{build_module_environment, CompileEnvironment};
use crate::graph::resolve::ModuleGraph;
use crate::planner::actions::{Action, ActionGraph, ActionGraphBuilder, ActionKind};
use crate::planner::depcache::CppDependencyCache;
use crate::planner::inputs::discover_inputs;
use crate::planner::pch::PchPlanner;
use crate::planner::unity::{plan_unity_batches, EmptyWorkingSet, UnityPlan, DEFAULT_UNITY_BUDGET};
use crate::rules::assembly::{compile_assembly, AssemblyCompileOptions, RulesAssembly};
use crate::rules::context::ModuleRulesContext;
use crate::rules::module::ModuleRules;
use crate::rules::scope::RulesScope;
use crate::rules::target::{create_target, TargetRules};
use crate::rules::types::{
    ModuleKind, TargetArchitecture, TargetConfiguration, TargetPlatform,
};
use crate::session::BuildSession;
use crate::util::diagnostic::Diagnostic;
use crate::util::files::FileSystemCache;
use crate::util::fs::{ensure_dir, write_if_different};
use crate::util::InternedString;
use crate::version::BuildVersion;

/// What to plan: the target tuple.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub target_name: String,
    pub platform: TargetPlatform,
    pub configuration: TargetConfiguration,
    pub architecture: TargetArchitecture,
    pub project_file: Option<PathBuf>,
}

/// Per-module manifest of precompiled outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrecompiledManifest {
    pub output_files: Vec<String>,
}

/// A successfully constructed plan.
#[derive(Debug)]
pub struct BuildPlan {
    pub target: TargetRules,
    pub actions: ActionGraph,
    /// Indices into `actions` whose outputs are missing or stale.
    pub outdated: Vec<usize>,
    pub intermediate_dir: PathBuf,
    pub module_count: usize,
}

/// Result of a planning session.
#[derive(Debug)]
pub enum PlanOutcome {
    Completed(Box<BuildPlan>),
    /// The session token was cancelled; nothing was persisted.
    Cancelled,
}

/// Plan the action graph for one target.
pub fn plan_target(
    session: &BuildSession,
    request: &PlanRequest,
) -> Result<PlanOutcome, BuildError> {
    let assembly = load_assemblies(session)?;
    if session.cancellation.is_cancelled() {
        return Ok(PlanOutcome::Cancelled);
    }

    let target = create_target(
        &assembly,
        &request.target_name,
        request.platform,
        request.configuration,
        request.architecture,
        request.project_file.as_deref(),
        &session.args,
        session.is_installed_engine(),
    )?;

    let graph = ModuleGraph::build(&assembly, &target)?;
    if session.cancellation.is_cancelled() {
        return Ok(PlanOutcome::Cancelled);
    }

    let base_env = CompileEnvironment::for_target(&target);

    // Environment construction is embarrassingly parallel: each module
    // reads only the frozen graph.
    let module_envs: BTreeMap<InternedString, CompileEnvironment> = graph
        .modules()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|module| {
            (
                module.name,
                build_module_environment(&base_env, module, &target, &graph),
            )
        })
        .collect();

    let plan_root = session
        .project_root
        .clone()
        .unwrap_or_else(|| session.engine_root.clone());
    let intermediate_dir = plan_root.join(target.intermediate_subdir());
    ensure_dir(&intermediate_dir).map_err(|err| BuildError::io(&intermediate_dir, format!("{err:#}")))?;

    let mut pch_planner = PchPlanner::discover(
        &graph,
        &|name| module_envs.get(&name).cloned(),
        &intermediate_dir,
    );

    let builder = ActionGraphBuilder::new();
    let binaries_dir = plan_root
        .join("Binaries")
        .join(target.platform.name());

    let mut all_objects: Vec<PathBuf> = Vec::new();
    let mut module_objects: BTreeMap<InternedString, Vec<PathBuf>> = BTreeMap::new();

    for name in graph.topological_order() {
        if session.cancellation.is_cancelled() {
            return Ok(PlanOutcome::Cancelled);
        }
        let module = graph.module(name).expect("module in topo order").clone();
        let env = module_envs.get(&name).expect("env built above").clone();

        let objects = emit_module_actions(
            &module,
            env,
            &graph,
            &target,
            &mut pch_planner,
            &builder,
            &intermediate_dir,
            &binaries_dir,
        )?;
        all_objects.extend(objects.iter().cloned());
        module_objects.insert(name, objects);
    }

    emit_link_actions(&target, &module_objects, &all_objects, &binaries_dir, &builder)?;

    // The final step is a self-invocation that writes the target receipt
    // once every binary exists.
    if !all_objects.is_empty() {
        let binary = binaries_dir.join(target.name.as_str());
        let receipt = binaries_dir.join(format!("{}.target", target.name));
        builder.push_recursive_tool(
            "WriteMetadata",
            &[
                format!("-Target={}", target.name),
                format!("-Receipt={}", receipt.display()),
            ],
            vec![binary],
            vec![receipt],
        )?;
    }

    let actions = builder.finish();
    if !actions.diagnostics.is_empty() {
        // Presentation belongs to the caller; the graph carries them.
        tracing::debug!(count = actions.diagnostics.len(), "plan collected diagnostics");
    }

    // Persist the makefile; content-addressed so an unchanged plan leaves
    // the file untouched.
    let makefile = intermediate_dir.join("Makefile.json");
    let json = serde_json::to_string_pretty(&actions.actions)
        .map_err(|err| BuildError::io(&makefile, err.to_string()))?;
    write_if_different(&makefile, &json)
        .map_err(|err| BuildError::io(&makefile, format!("{err:#}")))?;

    // Staleness pass against the dependency caches, with mtimes served
    // from the session's interning cache.
    let dependency_cache = open_dependency_caches(session, &target, &intermediate_dir);
    let outdated = outdated_actions(&actions.actions, &dependency_cache, &session.files);
    if !session.cancellation.is_cancelled() {
        CppDependencyCache::save_all(&[dependency_cache]);
    }

    let module_count = graph.len();
    Ok(PlanOutcome::Completed(Box::new(BuildPlan {
        target,
        actions,
        outdated,
        intermediate_dir,
        module_count,
    })))
}

/// Compile the engine assembly, then the project assembly chained onto
/// it, returning the most derived one.
fn load_assemblies(session: &BuildSession) -> Result<Arc<RulesAssembly>, BuildError> {
    let version = BuildVersion::read_or_default(&session.engine_root.join("Build/Build.version"))
        .unwrap_or_else(|err| {
            tracing::warn!(err = %format!("{err:#}"), "ignoring malformed build version");
            BuildVersion::default()
        });
    let engine_version = version.version_string();

    let engine_source = session.engine_root.join("Source");
    let scanned_engine = session
        .scanner
        .scan_root(&engine_source)
        .map_err(|err| BuildError::io(&engine_source, format!("{err:#}")))?;

    let engine_scope = RulesScope::engine();
    let engine_context = ModuleRulesContext::new(
        engine_scope.clone(),
        session.engine_root.join("Intermediate/Build"),
    );
    let engine = compile_assembly(
        &AssemblyCompileOptions {
            name: InternedString::new("Engine"),
            context: engine_context,
            output_dir: BuildSession::build_rules_dir(&session.engine_root),
            engine_version: engine_version.clone(),
            parent: None,
            installed: session.is_installed_engine(),
            skip_staleness_check: session.args.skip_rules_compile,
        },
        &scanned_engine,
    )?;

    let Some(project_root) = &session.project_root else {
        return Ok(engine);
    };

    let project_source = project_root.join("Source");
    let scanned_project = session
        .scanner
        .scan_root(&project_source)
        .map_err(|err| BuildError::io(&project_source, format!("{err:#}")))?;

    let project_scope = RulesScope::child(&engine_scope, "project");
    let mut project_context =
        ModuleRulesContext::new(project_scope, project_root.join("Intermediate/Build"));
    project_context.classify_as_game_module = true;
    project_context.can_hot_reload = !session.args.no_hot_reload_from_ide;

    let project = compile_assembly(
        &AssemblyCompileOptions {
            name: InternedString::new("Project"),
            context: project_context,
            output_dir: BuildSession::build_rules_dir(project_root),
            engine_version,
            parent: Some(engine),
            installed: false,
            skip_staleness_check: session.args.skip_rules_compile,
        },
        &scanned_project,
    )?;
    Ok(project)
}

/// Emit every action for one module; returns its object files.
#[allow(clippy::too_many_arguments)]
fn emit_module_actions(
    module: &Arc<ModuleRules>,
    mut env: CompileEnvironment,
    graph: &ModuleGraph,
    target: &TargetRules,
    pch_planner: &mut PchPlanner,
    builder: &ActionGraphBuilder,
    intermediate_dir: &Path,
    binaries_dir: &Path,
) -> Result<Vec<PathBuf>, BuildError> {
    let module_dir = intermediate_dir.join(module.name.as_str());

    // Dead whitelist entries are the canonical non-fatal case: they go
    // through the builder's diagnostics hook, never a log line.
    for dependency in module.undeclared_circular_dependencies() {
        builder.add_diagnostic(
            Diagnostic::warning(format!(
                "module `{}` lists `{dependency}` in circular_dependencies but not as a dependency",
                module.name
            ))
            .with_location(&module.file),
        );
    }

    // Staged runtime files copy regardless of module kind.
    for dependency in &module.runtime_dependencies {
        let source = module.directory.join(&dependency.path);
        let staged = dependency.staged_path.as_deref().unwrap_or(&dependency.path);
        let destination = binaries_dir.join(staged);
        builder.push_copy(&source, &destination)?;
    }

    if module.kind == ModuleKind::External {
        return Ok(Vec::new());
    }

    if module.use_precompiled {
        // Precompiled modules contribute their recorded outputs; a
        // missing manifest is fatal for the target.
        let manifest_path = module_dir.join("Precompiled.json");
        let manifest = read_precompiled_manifest(&manifest_path)?;
        return Ok(manifest
            .output_files
            .iter()
            .map(|rel| intermediate_dir.join(rel))
            .collect());
    }

    let inputs = discover_inputs(&module.directory, target.platform);
    if inputs.compilable_count() == 0 {
        // Empty module: no actions, no precompiled manifest.
        return Ok(Vec::new());
    }

    ensure_dir(&module_dir).map_err(|err| BuildError::io(&module_dir, format!("{err:#}")))?;
    pch_planner.setup_module_pch(module, &mut env, graph, target, builder, &module_dir)?;

    let sources: Vec<PathBuf> = inputs.compilable().cloned().collect();
    let unity_plan = if env.use_unity {
        let budget = if target.args.stress_test_unity {
            // Stress mode: one file per batch shakes out missing includes.
            0
        } else {
            DEFAULT_UNITY_BUDGET
        };
        plan_unity_batches(module.name.as_str(), &sources, &EmptyWorkingSet, budget)
    } else {
        UnityPlan::disabled(&sources)
    };

    // The mapping manifest records which unity file owns each source.
    if !unity_plan.batches.is_empty() {
        let manifest: BTreeMap<String, String> = unity_plan
            .mapping
            .iter()
            .map(|(source, unity)| (source.display().to_string(), unity.clone()))
            .collect();
        let manifest_path = module_dir.join("UnityManifest.json");
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|err| BuildError::io(&manifest_path, err.to_string()))?;
        builder
            .create_intermediate_text_file(&manifest_path, &json)
            .map_err(|err| BuildError::io(&manifest_path, format!("{err:#}")))?;
    }

    let response_file = module_dir.join(format!("{}.rsp", module.name));
    builder
        .create_intermediate_text_file(&response_file, &render_response_file(&env))
        .map_err(|err| BuildError::io(&response_file, format!("{err:#}")))?;

    let mut objects = Vec::new();

    // Individually compiled files first, in discovery order; unity
    // batches after.
    for source in &unity_plan.adaptive_files {
        objects.push(emit_compile_action(
            builder,
            module,
            &env,
            source,
            &module_dir,
            &response_file,
        )?);
    }

    for batch in &unity_plan.batches {
        let unity_file = module_dir.join(&batch.name);
        builder
            .create_intermediate_text_file(&unity_file, &batch.contents())
            .map_err(|err| BuildError::io(&unity_file, format!("{err:#}")))?;

        let mut prerequisites = vec![unity_file.clone()];
        prerequisites.extend(batch.files.iter().cloned());
        let object = module_dir.join(Path::new(&batch.name).with_extension("o"));

        let mut action = compile_action_base(module, &response_file, &unity_file, &object);
        action.prerequisite_items = dedup_paths(
            prerequisites
                .into_iter()
                .chain(env.force_include_files.iter().cloned())
                .chain(env.additional_prerequisites.iter().cloned())
                .chain([response_file.clone()]),
        );
        builder.push(action)?;
        objects.push(object);
    }

    if module.precompile {
        let manifest_path = module_dir.join("Precompiled.json");
        write_precompiled_manifest(&manifest_path, intermediate_dir, &objects, builder)?;
    }

    Ok(objects)
}

fn emit_compile_action(
    builder: &ActionGraphBuilder,
    module: &Arc<ModuleRules>,
    env: &CompileEnvironment,
    source: &Path,
    module_dir: &Path,
    response_file: &Path,
) -> Result<PathBuf, BuildError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let object = module_dir.join(format!("{stem}.o"));

    let mut action = compile_action_base(module, response_file, source, &object);
    action.prerequisite_items = dedup_paths(
        [source.to_path_buf(), response_file.to_path_buf()]
            .into_iter()
            .chain(env.force_include_files.iter().cloned())
            .chain(env.additional_prerequisites.iter().cloned()),
    );
    builder.push(action)?;
    Ok(object)
}

fn compile_action_base(
    module: &Arc<ModuleRules>,
    response_file: &Path,
    source: &Path,
    object: &Path,
) -> Action {
    let mut action = Action::new(ActionKind::Compile);
    action.command_path = PathBuf::from("c++");
    action.command_args = vec![
        format!("@{}", response_file.display()),
        "-c".to_string(),
        source.display().to_string(),
        "-o".to_string(),
        object.display().to_string(),
    ];
    action.working_dir = module.directory.clone();
    action.produced_items = vec![object.to_path_buf()];
    action.status_description = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    action.can_execute_remotely = true;
    action
}

fn dedup_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Flags rendered into the per-module response file. Include and
/// definition order mirrors the environment exactly.
fn render_response_file(env: &CompileEnvironment) -> String {
    let mut text = String::new();
    for path in env.user_include_paths.iter() {
        text.push_str(&format!("-I{}\n", path.display()));
    }
    for path in env.system_include_paths.iter() {
        text.push_str(&format!("-isystem{}\n", path.display()));
    }
    for definition in env.definitions.iter() {
        text.push_str(&format!("-D{definition}\n"));
    }
    for include in &env.force_include_files {
        text.push_str(&format!("-include{}\n", include.display()));
    }
    text.push_str(&format!("-std={}\n", env.cpp_standard.as_flag_value()));
    text.push_str(if env.optimize_code { "-O2\n" } else { "-O0\n" });
    text.push_str(if env.use_rtti { "-frtti\n" } else { "-fno-rtti\n" });
    text.push_str(if env.enable_exceptions {
        "-fexceptions\n"
    } else {
        "-fno-exceptions\n"
    });
    if env.enable_avx {
        text.push_str("-mavx\n");
    }
    text
}

fn emit_link_actions(
    target: &TargetRules,
    module_objects: &BTreeMap<InternedString, Vec<PathBuf>>,
    all_objects: &[PathBuf],
    binaries_dir: &Path,
    builder: &ActionGraphBuilder,
) -> Result<(), BuildError> {
    if all_objects.is_empty() {
        return Ok(());
    }

    if target.is_modular() {
        let mut produced_libraries = Vec::new();
        for (name, objects) in module_objects {
            if objects.is_empty() {
                continue;
            }
            let library = binaries_dir.join(format!("lib{name}.so"));
            let mut action = Action::new(ActionKind::Link);
            action.command_path = PathBuf::from("c++");
            action.command_args = vec!["-shared".to_string(), "-o".to_string(), library.display().to_string()];
            action.working_dir = binaries_dir.to_path_buf();
            action.prerequisite_items = objects.clone();
            action.produced_items = vec![library.clone()];
            action.status_description = format!("lib{name}.so");
            builder.push(action)?;
            produced_libraries.push(library);
        }

        let binary = binaries_dir.join(target.name.as_str());
        let mut action = Action::new(ActionKind::Link);
        action.command_path = PathBuf::from("c++");
        action.command_args = vec!["-o".to_string(), binary.display().to_string()];
        action.working_dir = binaries_dir.to_path_buf();
        action.prerequisite_items = produced_libraries;
        action.produced_items = vec![binary];
        action.status_description = target.name.to_string();
        builder.push(action)?;
    } else {
        let binary = binaries_dir.join(target.name.as_str());
        let mut action = Action::new(ActionKind::Link);
        action.command_path = PathBuf::from("c++");
        action.command_args = vec!["-o".to_string(), binary.display().to_string()];
        action.working_dir = binaries_dir.to_path_buf();
        action.prerequisite_items = all_objects.to_vec();
        action.produced_items = vec![binary];
        action.status_description = target.name.to_string();
        builder.push(action)?;
    }
    Ok(())
}

fn write_precompiled_manifest(
    manifest_path: &Path,
    intermediate_dir: &Path,
    objects: &[PathBuf],
    builder: &ActionGraphBuilder,
) -> Result<(), BuildError> {
    let manifest = PrecompiledManifest {
        output_files: objects
            .iter()
            .map(|object| {
                crate::util::fs::relative_path(intermediate_dir, object)
                    .display()
                    .to_string()
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|err| BuildError::io(manifest_path, err.to_string()))?;
    builder
        .create_intermediate_text_file(manifest_path, &json)
        .map_err(|err| BuildError::io(manifest_path, format!("{err:#}")))?;
    Ok(())
}

fn read_precompiled_manifest(manifest_path: &Path) -> Result<PrecompiledManifest, BuildError> {
    let text = std::fs::read_to_string(manifest_path).map_err(|_| {
        BuildError::io(
            manifest_path,
            "precompiled module manifest is missing; build without --use-precompiled first",
        )
    })?;
    serde_json::from_str(&text)
        .map_err(|err| BuildError::io(manifest_path, format!("malformed precompiled manifest: {err}")))
}

fn open_dependency_caches(
    session: &BuildSession,
    target: &TargetRules,
    intermediate_dir: &Path,
) -> Arc<CppDependencyCache> {
    let engine_cache = CppDependencyCache::load(
        session
            .engine_root
            .join(target.intermediate_subdir())
            .join("DependencyCache.bin"),
        session.engine_root.clone(),
        None,
    );
    match &session.project_root {
        Some(project_root) => CppDependencyCache::load(
            intermediate_dir.join("DependencyCache.bin"),
            project_root.clone(),
            Some(engine_cache),
        ),
        None => engine_cache,
    }
}

/// Indices of actions whose outputs are missing or older than an input.
/// Staleness cascades through produced items in emission order, which is
/// already dependency-first.
fn outdated_actions(
    actions: &[Action],
    cache: &Arc<CppDependencyCache>,
    files: &FileSystemCache,
) -> Vec<usize> {
    let mut outdated = Vec::new();
    let mut stale_products: HashSet<&Path> = HashSet::new();

    let mtime_of = |path: &Path| files.file(path).last_write_time();

    for (index, action) in actions.iter().enumerate() {
        let mut stale = false;

        let mut oldest_product = None;
        for produced in &action.produced_items {
            match mtime_of(produced) {
                None => {
                    stale = true;
                    break;
                }
                Some(time) => {
                    oldest_product = Some(match oldest_product {
                        None => time,
                        Some(existing) if time < existing => time,
                        Some(existing) => existing,
                    });
                }
            }
        }

        if !stale {
            for prerequisite in &action.prerequisite_items {
                if stale_products.contains(prerequisite.as_path()) {
                    stale = true;
                    break;
                }
                if let (Some(input), Some(output)) = (mtime_of(prerequisite), oldest_product) {
                    if input > output {
                        stale = true;
                        break;
                    }
                }
            }
        }

        // Compiler-discovered header dependencies, when a prior run left
        // a dependency list next to the object.
        if !stale {
            for produced in &action.produced_items {
                let dep_file = produced.with_extension("d");
                if !files.file(&dep_file).exists() {
                    continue;
                }
                if let Ok(dependencies) = cache.dependencies(&dep_file) {
                    for dependency in dependencies {
                        if let (Some(input), Some(output)) =
                            (mtime_of(&dependency), oldest_product)
                        {
                            if input > output {
                                stale = true;
                                break;
                            }
                        }
                    }
                }
                if stale {
                    break;
                }
            }
        }

        if stale {
            outdated.push(index);
            for produced in &action.produced_items {
                stale_products.insert(produced.as_path());
            }
        }
    }

    outdated
}
