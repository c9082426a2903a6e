//! Input file discovery.
//!
//! Walks a module's directory tree, pruning folders that belong to
//! foreign platforms, and classifies everything compilable by extension.
//! The walk is sorted, so discovery order (and with it action emission
//! order) is deterministic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::rules::types::TargetPlatform;

/// Classified source files for one module.
#[derive(Debug, Default, Clone)]
pub struct InputFileCollection {
    pub headers: Vec<PathBuf>,
    pub ispc_headers: Vec<PathBuf>,
    pub cpp_files: Vec<PathBuf>,
    pub c_files: Vec<PathBuf>,
    pub cc_files: Vec<PathBuf>,
    /// Objective-C and Objective-C++ sources.
    pub objc_files: Vec<PathBuf>,
    pub rc_files: Vec<PathBuf>,
    pub ispc_files: Vec<PathBuf>,

    /// Directories containing at least one compilable source; these are
    /// the graph-invalidation roots for the module.
    pub source_directories: BTreeSet<PathBuf>,
}

impl InputFileCollection {
    /// All translation units that produce objects, in classification
    /// order: cpp, c, cc, objc, rc, ispc.
    pub fn compilable(&self) -> impl Iterator<Item = &PathBuf> {
        self.cpp_files
            .iter()
            .chain(self.c_files.iter())
            .chain(self.cc_files.iter())
            .chain(self.objc_files.iter())
            .chain(self.rc_files.iter())
            .chain(self.ispc_files.iter())
    }

    pub fn compilable_count(&self) -> usize {
        self.cpp_files.len()
            + self.c_files.len()
            + self.cc_files.len()
            + self.objc_files.len()
            + self.rc_files.len()
            + self.ispc_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compilable_count() == 0 && self.headers.is_empty() && self.ispc_headers.is_empty()
    }
}

/// Discover and classify the inputs beneath `module_dir` for `platform`.
pub fn discover_inputs(module_dir: &Path, platform: TargetPlatform) -> InputFileCollection {
    let excluded = platform.excluded_folder_names();
    let mut collection = InputFileCollection::default();

    let walker = WalkDir::new(module_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            entry
                .file_name()
                .to_str()
                .map(|name| !excluded.contains(&name))
                .unwrap_or(true)
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };

        let is_source = classify(&mut collection, path, extension);
        if is_source {
            if let Some(parent) = path.parent() {
                collection.source_directories.insert(parent.to_path_buf());
            }
        }
    }

    collection
}

/// Route one file into its bucket; returns true for compilable sources.
fn classify(collection: &mut InputFileCollection, path: &Path, extension: &str) -> bool {
    let path = path.to_path_buf();
    match extension {
        "h" | "hpp" | "hxx" | "inl" => {
            collection.headers.push(path);
            false
        }
        "isph" => {
            collection.ispc_headers.push(path);
            false
        }
        "cpp" | "cxx" => {
            collection.cpp_files.push(path);
            true
        }
        "c" => {
            collection.c_files.push(path);
            true
        }
        "cc" => {
            collection.cc_files.push(path);
            true
        }
        "m" | "mm" => {
            collection.objc_files.push(path);
            true
        }
        "rc" => {
            collection.rc_files.push(path);
            true
        }
        "ispc" => {
            collection.ispc_files.push(path);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_classification_by_extension() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        touch(&dir.join("Private/A.cpp"));
        touch(&dir.join("Private/B.c"));
        touch(&dir.join("Private/C.cc"));
        touch(&dir.join("Private/D.mm"));
        touch(&dir.join("Private/E.rc"));
        touch(&dir.join("Private/F.ispc"));
        touch(&dir.join("Public/Api.h"));
        touch(&dir.join("Public/Math.isph"));
        touch(&dir.join("Docs/readme.md"));

        let inputs = discover_inputs(dir, TargetPlatform::Linux);
        assert_eq!(inputs.cpp_files.len(), 1);
        assert_eq!(inputs.c_files.len(), 1);
        assert_eq!(inputs.cc_files.len(), 1);
        assert_eq!(inputs.objc_files.len(), 1);
        assert_eq!(inputs.rc_files.len(), 1);
        assert_eq!(inputs.ispc_files.len(), 1);
        assert_eq!(inputs.headers.len(), 1);
        assert_eq!(inputs.ispc_headers.len(), 1);
        assert_eq!(inputs.compilable_count(), 6);
    }

    #[test]
    fn test_foreign_platform_folders_are_pruned() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        touch(&dir.join("Private/Core.cpp"));
        touch(&dir.join("Private/Windows/WinCore.cpp"));
        touch(&dir.join("Private/Linux/LinuxCore.cpp"));
        touch(&dir.join("Private/Apple/AppleCore.cpp"));

        let inputs = discover_inputs(dir, TargetPlatform::Linux);
        let names: Vec<String> = inputs
            .cpp_files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Core.cpp", "LinuxCore.cpp"]);

        let inputs = discover_inputs(dir, TargetPlatform::Win64);
        let names: Vec<String> = inputs
            .cpp_files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Core.cpp", "WinCore.cpp"]);
    }

    #[test]
    fn test_source_directories_only_track_compilable() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        touch(&dir.join("Private/Core.cpp"));
        touch(&dir.join("Public/Api.h"));

        let inputs = discover_inputs(dir, TargetPlatform::Linux);
        assert_eq!(inputs.source_directories.len(), 1);
        assert!(inputs
            .source_directories
            .iter()
            .next()
            .unwrap()
            .ends_with("Private"));
    }

    #[test]
    fn test_discovery_order_is_sorted() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        touch(&dir.join("Private/Zeta.cpp"));
        touch(&dir.join("Private/Alpha.cpp"));
        touch(&dir.join("Private/Mid.cpp"));

        let inputs = discover_inputs(dir, TargetPlatform::Linux);
        let names: Vec<&str> = inputs
            .cpp_files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Alpha.cpp", "Mid.cpp", "Zeta.cpp"]);
    }

    #[test]
    fn test_empty_module_has_no_inputs() {
        let tmp = TempDir::new().unwrap();
        let inputs = discover_inputs(tmp.path(), TargetPlatform::Linux);
        assert!(inputs.is_empty());
    }
}
