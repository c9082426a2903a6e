//! Action graph emission.
//!
//! Actions are opaque commands with declared inputs and outputs; the
//! orchestrator never runs them. The builder is append-only behind a
//! coarse lock and validates the one structural invariant executors
//! depend on: produced items never appear among prerequisites.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::util::diagnostic::Diagnostic;
use crate::util::fs::write_if_different;

/// Tag consumed by executors to pick a runner for the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Compile,
    Link,
    Copy,
    BuildProject,
}

/// One node of the emitted action graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub command_path: PathBuf,
    pub command_args: Vec<String>,
    pub working_dir: PathBuf,
    pub prerequisite_items: Vec<PathBuf>,
    pub produced_items: Vec<PathBuf>,
    /// Outputs removed before the action reruns; stale copies must not
    /// survive a failed run.
    pub delete_items: Vec<PathBuf>,
    pub status_description: String,
    pub can_execute_remotely: bool,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Action {
            kind,
            command_path: PathBuf::new(),
            command_args: Vec::new(),
            working_dir: PathBuf::new(),
            prerequisite_items: Vec::new(),
            produced_items: Vec::new(),
            delete_items: Vec::new(),
            status_description: String::new(),
            can_execute_remotely: false,
        }
    }
}

/// The completed graph for one target.
#[derive(Debug, Default)]
pub struct ActionGraph {
    pub actions: Vec<Action>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ActionGraph {
    /// Serialize the action list as JSON for external consumers.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.actions)?;
        crate::util::fs::write_string(path, &json)
    }
}

/// Append-only action collector for one target. Not shared across
/// targets; emission within it is serialized by one coarse lock.
#[derive(Default)]
pub struct ActionGraphBuilder {
    actions: Mutex<Vec<Action>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl ActionGraphBuilder {
    pub fn new() -> Self {
        ActionGraphBuilder::default()
    }

    /// Append an action after validating produced/prerequisite
    /// disjointness.
    pub fn push(&self, action: Action) -> Result<(), BuildError> {
        for produced in &action.produced_items {
            if action.prerequisite_items.contains(produced) {
                return Err(BuildError::graph(
                    format!(
                        "action `{}` lists `{}` as both prerequisite and product",
                        action.status_description,
                        produced.display()
                    ),
                    Vec::new(),
                ));
            }
        }
        self.actions.lock().unwrap().push(action);
        Ok(())
    }

    /// Emit a copy action as a shell command with host-appropriate
    /// quoting. The destination is declared both produced and deleted.
    pub fn push_copy(&self, source: &Path, destination: &Path) -> Result<(), BuildError> {
        let action = if cfg!(windows) {
            Action {
                command_path: PathBuf::from("cmd.exe"),
                command_args: vec![
                    "/c".to_string(),
                    format!(
                        "copy /Y {} {}",
                        quote(&source.display().to_string()),
                        quote(&destination.display().to_string())
                    ),
                ],
                ..Action::new(ActionKind::Copy)
            }
        } else {
            Action {
                command_path: PathBuf::from("/bin/sh"),
                command_args: vec![
                    "-c".to_string(),
                    format!(
                        "cp {} {}",
                        quote(&source.display().to_string()),
                        quote(&destination.display().to_string())
                    ),
                ],
                ..Action::new(ActionKind::Copy)
            }
        };

        self.push(Action {
            working_dir: source.parent().map(Path::to_path_buf).unwrap_or_default(),
            prerequisite_items: vec![source.to_path_buf()],
            produced_items: vec![destination.to_path_buf()],
            delete_items: vec![destination.to_path_buf()],
            status_description: destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            can_execute_remotely: false,
            ..action
        })
    }

    /// Emit a recursive invocation of the orchestrator in a sub-mode:
    /// `<self> -Mode=<mode> <args>`.
    pub fn push_recursive_tool(
        &self,
        mode: &str,
        args: &[String],
        prerequisite_items: Vec<PathBuf>,
        produced_items: Vec<PathBuf>,
    ) -> Result<(), BuildError> {
        let tool = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("slipway"));
        let mut command_args = vec![format!("-Mode={mode}")];
        command_args.extend(args.iter().cloned());

        self.push(Action {
            command_path: tool,
            command_args,
            working_dir: std::env::current_dir().unwrap_or_default(),
            prerequisite_items,
            produced_items,
            status_description: mode.to_string(),
            can_execute_remotely: false,
            ..Action::new(ActionKind::BuildProject)
        })
    }

    /// Materialize an intermediate text file (response file, wrapper
    /// header, definitions header), writing only when the content
    /// differs from what is on disk.
    pub fn create_intermediate_text_file(&self, location: &Path, contents: &str) -> Result<PathBuf> {
        let written = write_if_different(location, contents)?;
        if written {
            tracing::debug!(file = %location.display(), "wrote intermediate file");
        }
        Ok(location.to_path_buf())
    }

    /// Surface a long-running or recoverable condition to the session.
    pub fn add_diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }

    pub fn action_count(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    /// Consume the builder, yielding the immutable graph.
    pub fn finish(self) -> ActionGraph {
        ActionGraph {
            actions: self.actions.into_inner().unwrap(),
            diagnostics: self.diagnostics.into_inner().unwrap(),
        }
    }
}

fn quote(text: &str) -> String {
    if text.contains(' ') || text.contains('"') {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_push_preserves_emission_order() {
        let builder = ActionGraphBuilder::new();
        for i in 0..3 {
            let mut action = Action::new(ActionKind::Compile);
            action.status_description = format!("unit{i}");
            action.produced_items = vec![PathBuf::from(format!("unit{i}.o"))];
            builder.push(action).unwrap();
        }
        let graph = builder.finish();
        let names: Vec<&str> = graph
            .actions
            .iter()
            .map(|a| a.status_description.as_str())
            .collect();
        assert_eq!(names, vec!["unit0", "unit1", "unit2"]);
    }

    #[test]
    fn test_produced_items_disjoint_from_prerequisites() {
        let builder = ActionGraphBuilder::new();
        let mut action = Action::new(ActionKind::Compile);
        action.prerequisite_items = vec![PathBuf::from("a.cpp"), PathBuf::from("a.o")];
        action.produced_items = vec![PathBuf::from("a.o")];
        let err = builder.push(action).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_copy_action_declares_destination_twice() {
        let builder = ActionGraphBuilder::new();
        builder
            .push_copy(Path::new("/src/data.bin"), Path::new("/out/data.bin"))
            .unwrap();
        let graph = builder.finish();
        let action = &graph.actions[0];
        assert_eq!(action.kind, ActionKind::Copy);
        assert_eq!(action.produced_items, vec![PathBuf::from("/out/data.bin")]);
        assert_eq!(action.delete_items, vec![PathBuf::from("/out/data.bin")]);
    }

    #[test]
    fn test_copy_action_quotes_spaces() {
        let builder = ActionGraphBuilder::new();
        builder
            .push_copy(
                Path::new("/src/my data.bin"),
                Path::new("/out/my data.bin"),
            )
            .unwrap();
        let graph = builder.finish();
        assert!(graph.actions[0].command_args[1].contains("\"/src/my data.bin\""));
    }

    #[test]
    fn test_recursive_tool_mode_argument() {
        let builder = ActionGraphBuilder::new();
        builder
            .push_recursive_tool(
                "DeployTarget",
                &["-Platform=Linux".to_string()],
                vec![PathBuf::from("/bin/Game")],
                Vec::new(),
            )
            .unwrap();
        let graph = builder.finish();
        assert_eq!(graph.actions[0].command_args[0], "-Mode=DeployTarget");
        assert_eq!(graph.actions[0].command_args[1], "-Platform=Linux");
        assert_eq!(graph.actions[0].kind, ActionKind::BuildProject);
    }

    #[test]
    fn test_intermediate_text_file_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let builder = ActionGraphBuilder::new();
        let path = tmp.path().join("defs.h");

        builder
            .create_intermediate_text_file(&path, "#define CORE_API\n")
            .unwrap();
        let first = std::fs::metadata(&path).unwrap().modified().unwrap();

        builder
            .create_intermediate_text_file(&path, "#define CORE_API\n")
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), first);
    }

    #[test]
    fn test_json_export() {
        let tmp = TempDir::new().unwrap();
        let builder = ActionGraphBuilder::new();
        let mut action = Action::new(ActionKind::Link);
        action.status_description = "TestGame".to_string();
        builder.push(action).unwrap();

        let graph = builder.finish();
        let path = tmp.path().join("actions.json");
        graph.write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"Link\""));
        assert!(text.contains("TestGame"));
    }
}
