//! `slipway clean` - remove a target's intermediate tree.

use slipway::util::fs::remove_dir_all_if_exists;

use crate::cli::CleanArgs;

pub fn execute(args: CleanArgs) -> i32 {
    let root = args
        .project
        .as_ref()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| args.engine_root.clone());

    let intermediate = root
        .join("Intermediate/Build")
        .join(args.platform.name())
        .join(args.architecture.name())
        .join(&args.target)
        .join(args.configuration.name());

    match remove_dir_all_if_exists(&intermediate) {
        Ok(()) => {
            tracing::info!(dir = %intermediate.display(), "cleaned");
            0
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            3
        }
    }
}
