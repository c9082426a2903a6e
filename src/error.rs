//! Error taxonomy for the orchestrator.
//!
//! Configuration and graph errors bubble to the session boundary; cache
//! errors are recovered locally; I/O errors are fatal for the affected
//! target only. Exit codes: 0 success, 1 rule-compile error, 2
//! graph-construction error, 3 I/O error.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// Fatal error kinds surfaced at the session boundary. The CLI renders
/// these through miette.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum BuildError {
    /// Malformed rule file or illegal option combination.
    #[error("configuration error in `{rule}`: {message}")]
    #[diagnostic(
        code(slipway::configuration),
        help("Check the rule descriptor for illegal option combinations")
    )]
    Configuration {
        rule: String,
        message: String,
        file: Option<PathBuf>,
    },

    /// Unresolved module, non-whitelisted cycle, or ambiguous
    /// specialization, reported with the reference chain.
    #[error("graph error: {message}")]
    #[diagnostic(
        code(slipway::graph),
        help("Ensure every referenced module has a rule file, and whitelist known cycles in `circular_dependencies`")
    )]
    Graph {
        message: String,
        reference_chain: Vec<String>,
    },

    /// Corrupt or version-mismatched persisted cache. Recoverable: the
    /// cache is discarded and rebuilt, so this rarely escapes.
    #[error("cache error at `{path}`: {message}")]
    #[diagnostic(
        code(slipway::cache),
        help("Delete the cache file; it is rebuilt on the next run")
    )]
    Cache { path: PathBuf, message: String },

    /// Missing required file or unwritable output directory.
    #[error("I/O error at `{path}`: {message}")]
    #[diagnostic(
        code(slipway::io),
        help("Check that the path exists and is writable")
    )]
    Io { path: PathBuf, message: String },

    /// Rule-assembly compilation failure with the parser diagnostics.
    #[error("failed to compile rules assembly `{assembly}`")]
    #[diagnostic(
        code(slipway::rules_compile),
        help("Fix the first reported rule file and re-run")
    )]
    Toolchain {
        assembly: String,
        diagnostics: Vec<String>,
    },
}

impl BuildError {
    pub fn configuration(rule: impl Into<String>, message: impl Into<String>) -> Self {
        BuildError::Configuration {
            rule: rule.into(),
            message: message.into(),
            file: None,
        }
    }

    pub fn configuration_in(
        rule: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        BuildError::Configuration {
            rule: rule.into(),
            message: message.into(),
            file: Some(file.into()),
        }
    }

    pub fn graph(message: impl Into<String>, reference_chain: Vec<String>) -> Self {
        BuildError::Graph {
            message: message.into(),
            reference_chain,
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        BuildError::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Configuration { .. } | BuildError::Toolchain { .. } => 1,
            BuildError::Graph { .. } => 2,
            BuildError::Cache { .. } | BuildError::Io { .. } => 3,
        }
    }

    /// Render the reference chain of a graph error, `A -> B -> A` style.
    pub fn reference_chain(&self) -> Option<String> {
        match self {
            BuildError::Graph {
                reference_chain, ..
            } if !reference_chain.is_empty() => Some(reference_chain.join(" -> ")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BuildError::configuration("MyGame", "bad knob").exit_code(), 1);
        assert_eq!(
            BuildError::graph("cycle", vec!["A".into(), "B".into(), "A".into()]).exit_code(),
            2
        );
        assert_eq!(BuildError::io("/out", "unwritable").exit_code(), 3);
    }

    #[test]
    fn test_reference_chain_rendering() {
        let err = BuildError::graph("cycle", vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.reference_chain().unwrap(), "A -> B -> A");
    }
}
