//! Rules source scanner.
//!
//! Enumerates rule files beneath a set of roots: module rules
//! (`*.build.toml`), target rules (`*.target.toml`), and automation
//! modules (`*.automation.toml`). A directory that declares module rules
//! or an automation module is a leaf; the walk does not descend past it.
//! Target rule files never stop descent.
//!
//! Results are memoized per root and can be selectively invalidated. The
//! scanner also remembers the order roots were first scanned in, which is
//! the parent-first linearization assembly composition relies on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

pub const MODULE_RULES_SUFFIX: &str = ".build.toml";
pub const TARGET_RULES_SUFFIX: &str = ".target.toml";
pub const AUTOMATION_SUFFIX: &str = ".automation.toml";

/// Sorted rule files discovered under one root.
#[derive(Debug, Default, Clone)]
pub struct ScannedRules {
    pub module_files: Vec<PathBuf>,
    pub target_files: Vec<PathBuf>,
    pub automation_files: Vec<PathBuf>,
}

impl ScannedRules {
    pub fn is_empty(&self) -> bool {
        self.module_files.is_empty()
            && self.target_files.is_empty()
            && self.automation_files.is_empty()
    }
}

#[derive(Default)]
struct Collector {
    module_files: Mutex<Vec<PathBuf>>,
    target_files: Mutex<Vec<PathBuf>>,
    automation_files: Mutex<Vec<PathBuf>>,
}

/// Memoizing scanner over a set of rules roots.
#[derive(Default)]
pub struct RulesScanner {
    cache: Mutex<HashMap<PathBuf, Arc<ScannedRules>>>,
    scan_order: Mutex<Vec<PathBuf>>,
}

impl RulesScanner {
    pub fn new() -> Self {
        RulesScanner::default()
    }

    /// Scan a root directory, returning memoized results when available.
    ///
    /// A missing root is fatal; unreadable directories below it are logged
    /// and skipped.
    pub fn scan_root(&self, root: &Path) -> Result<Arc<ScannedRules>> {
        if let Some(cached) = self.cache.lock().unwrap().get(root) {
            return Ok(cached.clone());
        }

        if !root.is_dir() {
            bail!("rules search path does not exist: {}", root.display());
        }

        let collector = Collector::default();
        rayon::scope(|scope| {
            scan_directory(scope, root.to_path_buf(), &collector);
        });

        let mut result = ScannedRules {
            module_files: collector.module_files.into_inner().unwrap(),
            target_files: collector.target_files.into_inner().unwrap(),
            automation_files: collector.automation_files.into_inner().unwrap(),
        };
        result.module_files.sort();
        result.target_files.sort();
        result.automation_files.sort();

        let result = Arc::new(result);
        self.cache
            .lock()
            .unwrap()
            .insert(root.to_path_buf(), result.clone());
        self.scan_order.lock().unwrap().push(root.to_path_buf());
        Ok(result)
    }

    /// Roots in the order they were first scanned: parents before children.
    pub fn scanned_roots(&self) -> Vec<PathBuf> {
        self.scan_order.lock().unwrap().clone()
    }

    /// Drop the memoized result for one root.
    pub fn invalidate(&self, root: &Path) {
        self.cache.lock().unwrap().remove(root);
        self.scan_order.lock().unwrap().retain(|r| r != root);
    }

    /// Drop all memoized results.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
        self.scan_order.lock().unwrap().clear();
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(suffix))
}

/// Name stem of a rule file: `Core.build.toml` -> `Core`.
pub fn rule_name<'a>(path: &'a Path, suffix: &str) -> Option<&'a str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(suffix))
        .filter(|n| !n.is_empty())
}

fn scan_directory<'s>(scope: &rayon::Scope<'s>, dir: PathBuf, collector: &'s Collector) {
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), %err, "skipping unreadable directory");
            return;
        }
    };

    let mut subdirs = Vec::new();
    let mut modules = Vec::new();
    let mut targets = Vec::new();
    let mut automation = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            subdirs.push(path);
        } else if has_suffix(&path, MODULE_RULES_SUFFIX) {
            modules.push(path);
        } else if has_suffix(&path, TARGET_RULES_SUFFIX) {
            targets.push(path);
        } else if has_suffix(&path, AUTOMATION_SUFFIX) {
            automation.push(path);
        }
    }

    let stop_descent = !modules.is_empty() || !automation.is_empty();

    if !modules.is_empty() {
        collector.module_files.lock().unwrap().extend(modules);
    }
    if !targets.is_empty() {
        collector.target_files.lock().unwrap().extend(targets);
    }
    if !automation.is_empty() {
        collector.automation_files.lock().unwrap().extend(automation);
    }

    if !stop_descent {
        for subdir in subdirs {
            scope.spawn(move |scope| scan_directory(scope, subdir, collector));
        }
    }
}
