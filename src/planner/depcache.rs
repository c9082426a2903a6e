//! Per-output dependency caching.
//!
//! Compilers emit dependency lists either as makefile-style `.d` files or
//! as plain text lists. Each list is parsed once and memoized against the
//! file's timestamp; the results persist across sessions in a versioned
//! binary cache. Caches chain parent-ward by base directory, so engine
//! and project trees keep separate files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::util::files::ticks_from_system_time;
use crate::util::fs::write_atomic;

/// Bumped whenever the on-disk record layout changes; a mismatch
/// discards the whole cache.
pub const DEPENDENCY_CACHE_VERSION: u32 = 2;

/// Dependencies of one output file, keyed to the mtime the list was
/// parsed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub last_write_ticks: i64,
    pub dependencies: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    records: Vec<(PathBuf, DependencyInfo)>,
}

/// One level of the dependency-cache hierarchy.
pub struct CppDependencyCache {
    /// On-disk location of this cache.
    location: PathBuf,
    /// Directory subtree this cache covers.
    base_dir: PathBuf,
    parent: Option<Arc<CppDependencyCache>>,
    entries: DashMap<PathBuf, DependencyInfo>,
    dirty: AtomicBool,
}

impl CppDependencyCache {
    /// Load a cache, tolerating a missing, corrupt, or version-mismatched
    /// file by starting empty.
    pub fn load(
        location: PathBuf,
        base_dir: PathBuf,
        parent: Option<Arc<CppDependencyCache>>,
    ) -> Arc<CppDependencyCache> {
        let entries = DashMap::new();
        match std::fs::read(&location) {
            Ok(bytes) => match bincode::deserialize::<CacheFile>(&bytes) {
                Ok(file) if file.version == DEPENDENCY_CACHE_VERSION => {
                    for (path, info) in file.records {
                        entries.insert(path, info);
                    }
                }
                Ok(file) => {
                    tracing::warn!(
                        cache = %location.display(),
                        found = file.version,
                        expected = DEPENDENCY_CACHE_VERSION,
                        "discarding dependency cache with wrong version"
                    );
                }
                Err(err) => {
                    tracing::warn!(cache = %location.display(), %err, "discarding corrupt dependency cache");
                }
            },
            Err(_) => {}
        }

        Arc::new(CppDependencyCache {
            location,
            base_dir,
            parent,
            entries,
            dirty: AtomicBool::new(false),
        })
    }

    /// The cache in the chain covering `file`: the nearest base dir that
    /// contains it, falling back to the outermost cache.
    fn covering<'a>(self: &'a Arc<Self>, file: &Path) -> &'a Arc<CppDependencyCache> {
        let mut current = self;
        loop {
            if file.starts_with(&current.base_dir) {
                return current;
            }
            match current.parent.as_ref() {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// Dependencies listed in `dep_file`, memoized against its mtime.
    pub fn dependencies(self: &Arc<Self>, dep_file: &Path) -> Result<Vec<PathBuf>> {
        let cache = self.covering(dep_file);

        let ticks = std::fs::metadata(dep_file)
            .and_then(|m| m.modified())
            .map(ticks_from_system_time)
            .with_context(|| format!("missing dependency file: {}", dep_file.display()))?;

        if let Some(entry) = cache.entries.get(dep_file) {
            if entry.last_write_ticks == ticks {
                return Ok(entry.dependencies.clone());
            }
        }

        let text = crate::util::fs::read_to_string(dep_file)?;
        let tokens = if dep_file.extension().and_then(|e| e.to_str()) == Some("d") {
            parse_makefile_dependencies(&text)
        } else {
            parse_text_list(&text)
        };
        let dependencies: Vec<PathBuf> = tokens.into_iter().map(PathBuf::from).collect();

        cache.entries.insert(
            dep_file.to_path_buf(),
            DependencyInfo {
                last_write_ticks: ticks,
                dependencies: dependencies.clone(),
            },
        );
        cache.dirty.store(true, Ordering::SeqCst);
        Ok(dependencies)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist this cache if it changed since load.
    pub fn save(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let mut records: Vec<(PathBuf, DependencyInfo)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));

        let bytes = bincode::serialize(&CacheFile {
            version: DEPENDENCY_CACHE_VERSION,
            records,
        })
        .context("failed to serialize dependency cache")?;
        write_atomic(&self.location, &bytes)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Save a set of caches in parallel. Errors are logged per cache; a
    /// failed save leaves the previous file intact.
    pub fn save_all(caches: &[Arc<CppDependencyCache>]) {
        caches.par_iter().for_each(|cache| {
            if let Err(err) = cache.save() {
                tracing::warn!(cache = %cache.location.display(), err = %format!("{err:#}"), "failed to save dependency cache");
            }
        });
    }
}

/// Parse a makefile-style `.d` file: `target: dep dep ...` with
/// backslash-newline continuations. Returns the dependency tokens, not
/// the target.
pub fn parse_makefile_dependencies(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut seen_target = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                // Escaped newline: continuation, token boundary.
                Some('\n') => {
                    chars.next();
                    flush(&mut current, &mut tokens, &mut seen_target, false);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush(&mut current, &mut tokens, &mut seen_target, false);
                }
                // Escaped space is part of the token.
                Some(' ') => {
                    chars.next();
                    current.push(' ');
                }
                _ => current.push('\\'),
            },
            ':' => {
                // Drive-letter heuristic: a colon in the second position
                // after an alphabetic first character belongs to the
                // token; any other colon is the target delimiter.
                let is_drive = current.len() == 1
                    && current.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
                if is_drive {
                    current.push(':');
                } else {
                    flush(&mut current, &mut tokens, &mut seen_target, true);
                }
            }
            c if c.is_whitespace() => {
                flush(&mut current, &mut tokens, &mut seen_target, false);
            }
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens, &mut seen_target, false);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>, seen_target: &mut bool, at_colon: bool) {
    if !current.is_empty() {
        if *seen_target {
            tokens.push(std::mem::take(current));
        } else {
            current.clear();
        }
    }
    if at_colon {
        *seen_target = true;
    }
}

/// Parse a plain text dependency list: one path per line. Lines naming
/// compiler-generated COM headers (`.tlh`/`.tli`) are dropped, and
/// doubled backslashes collapse to single ones.
pub fn parse_text_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.ends_with(".tlh") && !line.ends_with(".tli"))
        .map(|line| line.replace("\\\\", "\\"))
        .collect()
}

/// Serialize dependencies back into the text-list format.
pub fn serialize_text_list(dependencies: &[String]) -> String {
    let mut text = String::new();
    for dependency in dependencies {
        text.push_str(dependency);
        text.push('\n');
    }
    text
}
