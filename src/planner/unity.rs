//! Unity batching.
//!
//! Small translation units are concatenated into generated unity files to
//! amortize per-file compile overhead. Files in the developer's working
//! set are held out ("adaptive non-unity") and compiled individually so
//! iteration stays fast.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default byte budget per unity batch.
pub const DEFAULT_UNITY_BUDGET: u64 = 384 * 1024;

/// Modules with fewer compilable files than this are not unity-batched.
pub const MIN_FILES_FOR_UNITY: usize = 2;

/// Oracle answering whether a file is in the active working set.
pub trait WorkingSet {
    fn contains(&self, file: &Path) -> bool;
}

/// A working set that holds nothing; every file unifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyWorkingSet;

impl WorkingSet for EmptyWorkingSet {
    fn contains(&self, _file: &Path) -> bool {
        false
    }
}

/// A fixed set of paths, for tests and explicit exclusion lists.
#[derive(Debug, Default, Clone)]
pub struct StaticWorkingSet {
    files: Vec<PathBuf>,
}

impl StaticWorkingSet {
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        StaticWorkingSet {
            files: files.into_iter().collect(),
        }
    }
}

impl WorkingSet for StaticWorkingSet {
    fn contains(&self, file: &Path) -> bool {
        self.files.iter().any(|f| f == file)
    }
}

/// One generated unity group.
#[derive(Debug, Clone)]
pub struct UnityBatch {
    /// Generated file name, e.g. `Unity_Core_2.cpp`.
    pub name: String,
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
}

impl UnityBatch {
    /// The generated translation unit: an include per member file.
    pub fn contents(&self) -> String {
        let mut text = String::new();
        for file in &self.files {
            text.push_str(&format!("#include \"{}\"\n", file.display()));
        }
        text
    }
}

/// The batching decision for one module's sources.
#[derive(Debug, Default, Clone)]
pub struct UnityPlan {
    pub batches: Vec<UnityBatch>,
    /// Working-set files compiled individually under the adaptive
    /// environment.
    pub adaptive_files: Vec<PathBuf>,
    /// Every batched source maps to exactly one unity file name.
    pub mapping: BTreeMap<PathBuf, String>,
}

impl UnityPlan {
    /// A plan that batches nothing: all files compile individually.
    pub fn disabled(files: &[PathBuf]) -> Self {
        UnityPlan {
            batches: Vec::new(),
            adaptive_files: files.to_vec(),
            mapping: BTreeMap::new(),
        }
    }
}

/// Partition `files` into unity batches under `budget` bytes each.
///
/// Working-set files become adaptive. The rest are sorted by name and
/// greedily grouped; a file alone larger than the budget still gets its
/// own group.
pub fn plan_unity_batches(
    module_name: &str,
    files: &[PathBuf],
    working_set: &dyn WorkingSet,
    budget: u64,
) -> UnityPlan {
    if files.len() < MIN_FILES_FOR_UNITY {
        return UnityPlan::disabled(files);
    }

    let mut adaptive_files = Vec::new();
    let mut unified: Vec<PathBuf> = Vec::new();
    for file in files {
        if working_set.contains(file) {
            adaptive_files.push(file.clone());
        } else {
            unified.push(file.clone());
        }
    }

    // Deterministic grouping: name order, full path as tie-break.
    unified.sort_by(|a, b| {
        a.file_name()
            .cmp(&b.file_name())
            .then_with(|| a.cmp(b))
    });

    let mut batches: Vec<UnityBatch> = Vec::new();
    let mut current: Vec<PathBuf> = Vec::new();
    let mut current_bytes: u64 = 0;

    for file in unified {
        let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
        if !current.is_empty() && current_bytes + size > budget {
            batches.push(UnityBatch {
                name: String::new(),
                files: std::mem::take(&mut current),
                total_bytes: current_bytes,
            });
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(file);
    }
    if !current.is_empty() {
        batches.push(UnityBatch {
            name: String::new(),
            files: current,
            total_bytes: current_bytes,
        });
    }

    let mut mapping = BTreeMap::new();
    for (index, batch) in batches.iter_mut().enumerate() {
        batch.name = format!("Unity_{}_{}.cpp", module_name, index + 1);
        for file in &batch.files {
            mapping.insert(file.clone(), batch.name.clone());
        }
    }

    UnityPlan {
        batches,
        adaptive_files,
        mapping,
    }
}
