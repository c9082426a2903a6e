//! Build version records.
//!
//! The engine ships a `Build.version` JSON file; its `M.m.p` triple gates
//! compiled rules artifacts across engine upgrades.

use std::path::Path;

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// On-disk build version record, PascalCase per the documented schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BuildVersion {
    pub major_version: u64,
    pub minor_version: u64,
    pub patch_version: u64,
    pub changelist: u64,
    pub compatible_changelist: u64,
    pub is_licensee_version: u8,
    pub is_promoted_build: u8,
    pub branch_name: String,
    pub build_id: String,
    pub build_version: String,
}

impl Default for BuildVersion {
    fn default() -> Self {
        BuildVersion {
            major_version: 0,
            minor_version: 1,
            patch_version: 0,
            changelist: 0,
            compatible_changelist: 0,
            is_licensee_version: 0,
            is_promoted_build: 0,
            branch_name: String::new(),
            build_id: String::new(),
            build_version: String::new(),
        }
    }
}

impl BuildVersion {
    /// Read a version file; a missing file yields the default version.
    pub fn read_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(BuildVersion::default());
        }
        let text = crate::util::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed build version file: {}", path.display()))
    }

    /// Write the version file with pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        crate::util::fs::write_string(path, &text)
    }

    /// The `M.m.p` triple as a semver version.
    pub fn semver(&self) -> Version {
        Version::new(self.major_version, self.minor_version, self.patch_version)
    }

    /// Rendered `M.m.p` string stored in assembly manifests.
    pub fn version_string(&self) -> String {
        self.semver().to_string()
    }
}
