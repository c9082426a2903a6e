//! `slipway plan` - construct the action graph for a target.

use std::io::IsTerminal;

use slipway::ops::{plan_target, PlanOutcome, PlanRequest};
use slipway::rules::types::LinkType;
use slipway::session::{BuildArguments, BuildSession};
use slipway::util::diagnostic;
use slipway::BuildError;

use crate::cli::PlanArgs;

pub fn execute(args: PlanArgs) -> i32 {
    let build_args = BuildArguments {
        all_modules: args.all_modules,
        build_plugin: args.build_plugin.clone(),
        enable_plugins: args.enable_plugin.clone(),
        disable_plugins: args.disable_plugin.clone(),
        link_type: if args.monolithic {
            Some(LinkType::Monolithic)
        } else if args.modular {
            Some(LinkType::Modular)
        } else {
            None
        },
        unique_build_environment: if args.unique_build_environment {
            Some(true)
        } else if args.shared_build_environment {
            Some(false)
        } else {
            None
        },
        precompile: args.precompile,
        use_precompiled: args.use_precompiled,
        iwyu: args.iwyu,
        no_pch: args.no_pch,
        disable_unity: args.disable_unity,
        force_unity: args.force_unity,
        stress_test_unity: args.stress_test_unity,
        no_hot_reload_from_ide: args.no_hot_reload_from_ide,
        skip_rules_compile: args.skip_rules_compile,
        max_parallel_actions: args.max_parallel_actions,
        definitions: args.definitions.clone(),
        cpp_std: args.cpp_std,
        compiler_arguments: args.compiler_arguments.clone(),
        linker_arguments: args.linker_arguments.clone(),
    };

    let project_root = args
        .project
        .as_ref()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()));
    let session = BuildSession::new(args.engine_root.clone(), project_root, build_args);

    let request = PlanRequest {
        target_name: args.target.clone(),
        platform: args.platform,
        configuration: args.configuration,
        architecture: args.architecture,
        project_file: args.project.clone(),
    };

    match plan_target(&session, &request) {
        Ok(PlanOutcome::Completed(plan)) => {
            let color = std::io::stderr().is_terminal();
            for collected in &plan.actions.diagnostics {
                diagnostic::emit(collected, color);
            }
            tracing::info!(
                target = %plan.target.name,
                modules = plan.module_count,
                actions = plan.actions.actions.len(),
                outdated = plan.outdated.len(),
                "plan complete"
            );
            if let Some(path) = &args.emit_json {
                if let Err(err) = plan.actions.write_json(path) {
                    return report(BuildError::io(path, format!("{err:#}")));
                }
            }
            0
        }
        Ok(PlanOutcome::Cancelled) => {
            tracing::warn!("plan cancelled; nothing persisted");
            0
        }
        Err(err) => report(err),
    }
}

/// Render a fatal error through miette and return its exit code.
fn report(err: BuildError) -> i32 {
    let code = err.exit_code();
    let chain = err.reference_chain();
    eprintln!("{:?}", miette::Report::new(err));
    if let Some(chain) = chain {
        eprintln!("  via: {chain}");
    }
    code
}
