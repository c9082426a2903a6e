//! Build session context.
//!
//! Everything that used to be ambient (interned files, scanned rules,
//! loaded assemblies, dependency caches) hangs off an explicit
//! [`BuildSession`] passed to every operation, so cache lifetimes are the
//! session's lifetime and nothing leaks between sessions.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::rules::scanner::RulesScanner;
use crate::rules::types::{CppStandard, LinkType};
use crate::util::files::FileSystemCache;

/// Command-line arguments consumed by the core.
///
/// The CLI layer parses whatever surface it likes and folds it into this
/// record; the core never sees the argument parser.
#[derive(Debug, Clone, Default)]
pub struct BuildArguments {
    /// Compile every module the rules assemblies know about.
    pub all_modules: bool,
    /// Build a single plugin's modules.
    pub build_plugin: Option<String>,
    pub enable_plugins: Vec<String>,
    pub disable_plugins: Vec<String>,
    /// Link-type override; `-Monolithic` / `-Modular`.
    pub link_type: Option<LinkType>,
    /// Build-environment override; `-SharedBuildEnvironment` / `-UniqueBuildEnvironment`.
    pub unique_build_environment: Option<bool>,
    pub precompile: bool,
    pub use_precompiled: bool,
    /// Include-what-you-use mode: compile headers standalone, no PCH reuse.
    pub iwyu: bool,
    pub no_pch: bool,
    pub disable_unity: bool,
    pub force_unity: bool,
    /// Pack unity batches as small as possible to shake out missing includes.
    pub stress_test_unity: bool,
    pub no_hot_reload_from_ide: bool,
    pub skip_rules_compile: bool,
    pub max_parallel_actions: Option<usize>,
    /// Extra `-Define:NAME=VALUE` definitions appended to every module.
    pub definitions: Vec<String>,
    pub cpp_std: Option<CppStandard>,
    pub compiler_arguments: Vec<String>,
    pub linker_arguments: Vec<String>,
}

/// Cooperative cancellation token carried by a session.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A single orchestration session.
///
/// Worker loops check [`CancellationToken::is_cancelled`] between tasks;
/// on cancellation partial action graphs are discarded and persistent
/// caches are left as the previous session wrote them.
pub struct BuildSession {
    /// Root of the engine tree.
    pub engine_root: PathBuf,
    /// Root of the project tree, when building a project target.
    pub project_root: Option<PathBuf>,
    /// Interned files and cached directory listings.
    pub files: FileSystemCache,
    /// Memoized rule-file scanner.
    pub scanner: RulesScanner,
    /// Arguments this session was invoked with.
    pub args: BuildArguments,
    pub cancellation: CancellationToken,
}

impl BuildSession {
    pub fn new(engine_root: PathBuf, project_root: Option<PathBuf>, args: BuildArguments) -> Self {
        BuildSession {
            engine_root,
            project_root,
            files: FileSystemCache::new(),
            scanner: RulesScanner::new(),
            args,
            cancellation: CancellationToken::new(),
        }
    }

    /// Directory compiled rules artifacts live under for a root.
    pub fn build_rules_dir(root: &std::path::Path) -> PathBuf {
        root.join("Intermediate/Build/BuildRules")
    }

    /// Whether the engine tree is installed (read-only distribution).
    /// An installed layer carries a marker file at its root.
    pub fn is_installed_engine(&self) -> bool {
        self.engine_root.join("Build/InstalledBuild.txt").exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_installed_engine_detection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = BuildSession::new(tmp.path().to_path_buf(), None, BuildArguments::default());
        assert!(!session.is_installed_engine());

        std::fs::create_dir_all(tmp.path().join("Build")).unwrap();
        std::fs::write(tmp.path().join("Build/InstalledBuild.txt"), "").unwrap();
        assert!(session.is_installed_engine());
    }
}
