//! End-to-end planning scenarios.
//!
//! These tests drive the library the way the CLI does: a synthetic engine
//! tree with rule descriptors and sources, a session, and a full plan.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use slipway::ops::{plan_target, BuildPlan, PlanOutcome, PlanRequest};
use slipway::planner::ActionKind;
use slipway::rules::types::{TargetArchitecture, TargetConfiguration, TargetPlatform};
use slipway::session::{BuildArguments, BuildSession};

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn session(engine_root: &Path) -> BuildSession {
    BuildSession::new(engine_root.to_path_buf(), None, BuildArguments::default())
}

fn request(target: &str) -> PlanRequest {
    PlanRequest {
        target_name: target.to_string(),
        platform: TargetPlatform::Linux,
        configuration: TargetConfiguration::Development,
        architecture: TargetArchitecture::X64,
        project_file: None,
    }
}

fn plan(session: &BuildSession, target: &str) -> BuildPlan {
    match plan_target(session, &request(target)).unwrap() {
        PlanOutcome::Completed(plan) => *plan,
        PlanOutcome::Cancelled => panic!("plan unexpectedly cancelled"),
    }
}

fn compile_actions(plan: &BuildPlan) -> Vec<&slipway::planner::Action> {
    plan.actions
        .actions
        .iter()
        .filter(|a| a.kind == ActionKind::Compile)
        .collect()
}

fn pch_create_actions(plan: &BuildPlan) -> Vec<PathBuf> {
    plan.actions
        .actions
        .iter()
        .flat_map(|a| a.produced_items.iter())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("gch"))
        .cloned()
        .collect()
}

fn set_mtime(path: &Path, time: SystemTime) {
    let file = fs::OpenOptions::new().append(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

// ============================================================================
// Scenario 1: trivial engine module
// ============================================================================

#[test]
fn test_trivial_engine_module() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        root,
        "Source/Core/Core.build.toml",
        "disable_unity_build = true\npublic_definitions = [\"CORE_FLAG=1\"]",
    );
    write(root, "Source/Core/Private/A.cpp", "int a() { return 1; }\n");
    write(root, "Source/Core/Private/B.cpp", "int b() { return 2; }\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"Core\"]");

    let session = session(root);
    let plan = plan(&session, "TestGame");

    let compiles = compile_actions(&plan);
    assert_eq!(compiles.len(), 2);
    assert!(pch_create_actions(&plan).is_empty());

    // Definitions flow into the module response file in insertion order.
    let rsp = fs::read_to_string(plan.intermediate_dir.join("Core/Core.rsp")).unwrap();
    assert!(rsp.contains("-DIS_ENGINE_MODULE=1"));
    assert!(rsp.contains("-DCORE_FLAG=1"));
    assert!(rsp.find("-DIS_ENGINE_MODULE=1").unwrap() < rsp.find("-DCORE_FLAG=1").unwrap());

    // The engine module precompiles: its manifest lists both objects.
    let manifest: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(plan.intermediate_dir.join("Core/Precompiled.json")).unwrap(),
    )
    .unwrap();
    let outputs = manifest["OutputFiles"].as_array().unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs[0].as_str().unwrap().ends_with("A.o"));
    assert!(outputs[1].as_str().unwrap().ends_with("B.o"));
}

// ============================================================================
// Scenario 2: shared PCH reuse
// ============================================================================

fn shared_pch_fixture(root: &Path, uib_extra: &str) {
    write(
        root,
        "Source/CoreUI/CoreUI.build.toml",
        "public_include_paths = [\"Public\"]\nshared_pch_header = \"Public/SharedPCH.CoreUI.h\"",
    );
    write(root, "Source/CoreUI/Public/SharedPCH.CoreUI.h", "#pragma once\n");
    write(
        root,
        "Source/UIa/UIa.build.toml",
        "public_dependencies = [\"CoreUI\"]",
    );
    write(root, "Source/UIa/Private/UIa.cpp", "int uia();\n");
    write(
        root,
        "Source/UIb/UIb.build.toml",
        &format!("public_dependencies = [\"CoreUI\"]\n{uib_extra}"),
    );
    write(root, "Source/UIb/Private/UIb.cpp", "int uib();\n");
    write(
        root,
        "Source/TestGame.target.toml",
        "type = \"Game\"\nmodules = [\"UIa\", \"UIb\"]",
    );
}

#[test]
fn test_shared_pch_reused_across_compatible_modules() {
    let tmp = TempDir::new().unwrap();
    shared_pch_fixture(tmp.path(), "");

    let session = session(tmp.path());
    let plan = plan(&session, "TestGame");

    // Exactly one Create action for the shared PCH.
    let artifacts = pch_create_actions(&plan);
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert!(artifact
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("SharedPCH.CoreUI"));

    // Both consumers reference the same artifact.
    for status in ["UIa.cpp", "UIb.cpp"] {
        let action = plan
            .actions
            .actions
            .iter()
            .find(|a| a.status_description == status)
            .unwrap();
        assert!(action.prerequisite_items.contains(artifact));
    }
}

// ============================================================================
// Scenario 3: PCH splitting on a divergent knob
// ============================================================================

#[test]
fn test_shared_pch_splits_on_rtti() {
    let tmp = TempDir::new().unwrap();
    shared_pch_fixture(tmp.path(), "use_rtti = true");

    let session = session(tmp.path());
    let plan = plan(&session, "TestGame");

    let mut artifacts = pch_create_actions(&plan);
    artifacts.sort();
    assert_eq!(artifacts.len(), 2);

    let names: Vec<&str> = artifacts
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap())
        .collect();
    assert!(names.contains(&"SharedPCH.CoreUI.h.gch"));
    assert!(names.contains(&"SharedPCH.CoreUI.RTTI.h.gch"));

    // Each consumer references its own instance.
    let uia = plan
        .actions
        .actions
        .iter()
        .find(|a| a.status_description == "UIa.cpp")
        .unwrap();
    let uib = plan
        .actions
        .actions
        .iter()
        .find(|a| a.status_description == "UIb.cpp")
        .unwrap();
    let uia_pch = uia
        .prerequisite_items
        .iter()
        .find(|p| p.to_str().unwrap().ends_with(".gch"))
        .unwrap();
    let uib_pch = uib
        .prerequisite_items
        .iter()
        .find(|p| p.to_str().unwrap().ends_with(".gch"))
        .unwrap();
    assert_ne!(uia_pch, uib_pch);
    assert!(uib_pch.to_str().unwrap().contains(".RTTI"));
}

// ============================================================================
// Scenario 4: cycle detection
// ============================================================================

#[test]
fn test_unwhitelisted_cycle_fails_without_actions() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/A/A.build.toml", "public_dependencies = [\"B\"]");
    write(root, "Source/A/Private/A.cpp", "int a();\n");
    write(root, "Source/B/B.build.toml", "public_dependencies = [\"A\"]");
    write(root, "Source/B/Private/B.cpp", "int b();\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"A\"]");

    let session = session(root);
    let err = plan_target(&session, &request("TestGame")).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.reference_chain().unwrap(), "A -> B -> A");

    // No action graph was persisted.
    let intermediate = root.join("Intermediate/Build/Linux/x64/TestGame/Development");
    assert!(!intermediate.join("Makefile.json").exists());
}

// ============================================================================
// Scenario 5: incremental rebuild
// ============================================================================

#[test]
fn test_incremental_rebuild_touches_only_dependents() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        root,
        "Source/App/App.build.toml",
        "disable_unity_build = true\npublic_dependencies = [\"Mid\"]",
    );
    write(root, "Source/App/Private/App.cpp", "int app();\n");
    write(
        root,
        "Source/Mid/Mid.build.toml",
        "disable_unity_build = true\npublic_dependencies = [\"Base\"]\npublic_include_paths = [\"Public\"]",
    );
    write(root, "Source/Mid/Private/Mid.cpp", "int mid();\n");
    write(root, "Source/Mid/Public/Mid.h", "#pragma once\n");
    write(root, "Source/Base/Base.build.toml", "disable_unity_build = true");
    write(root, "Source/Base/Private/Base.cpp", "int base();\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"App\"]");

    // Session 1: everything is outdated (no outputs exist yet).
    let first = plan(&session(root), "TestGame");
    assert_eq!(first.outdated.len(), first.actions.actions.len());

    let artifact = root.join("Intermediate/Build/BuildRules/Engine.rules.bin");
    let artifact_mtime = fs::metadata(&artifact).unwrap().modified().unwrap();

    // Simulate the executor: produce every output, newer than the plan's
    // own intermediates.
    let now = SystemTime::now();
    let produced_time = now + Duration::from_secs(200);
    for action in &first.actions.actions {
        for produced in &action.produced_items {
            fs::create_dir_all(produced.parent().unwrap()).unwrap();
            fs::write(produced, "").unwrap();
            set_mtime(produced, produced_time);
        }
    }

    // The executor also left a dependency list for Mid's object.
    let header = root.join("Source/Mid/Public/Mid.h");
    let mid_dep = first.intermediate_dir.join("Mid/Mid.d");
    fs::write(&mid_dep, format!("Mid.o: {}\n", header.display())).unwrap();

    // Touch the header past every output.
    set_mtime(&header, now + Duration::from_secs(400));

    // Session 2: only Mid's compile and the steps downstream of its
    // object are outdated.
    let second = plan(&session(root), "TestGame");
    let outdated_statuses: Vec<&str> = second
        .outdated
        .iter()
        .map(|&i| second.actions.actions[i].status_description.as_str())
        .collect();
    assert_eq!(outdated_statuses, vec!["Mid.cpp", "TestGame", "WriteMetadata"]);

    // The rules assembly was not recompiled.
    assert_eq!(fs::metadata(&artifact).unwrap().modified().unwrap(), artifact_mtime);

    // Session 3: after the executor catches up, nothing is outdated and
    // the dependency cache is not rewritten.
    let cache_file = second.intermediate_dir.join("DependencyCache.bin");
    assert!(cache_file.exists());
    let cache_mtime = fs::metadata(&cache_file).unwrap().modified().unwrap();

    for &index in &second.outdated {
        for produced in &second.actions.actions[index].produced_items {
            set_mtime(produced, now + Duration::from_secs(600));
        }
    }

    let third = plan(&session(root), "TestGame");
    assert!(third.outdated.is_empty());
    assert_eq!(fs::metadata(&cache_file).unwrap().modified().unwrap(), cache_mtime);
}

// ============================================================================
// Scenario 6: unity batching
// ============================================================================

#[test]
fn test_unity_batches_and_manifest() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/Big/Big.build.toml", "");
    for i in 0..8 {
        let path = root.join(format!("Source/Big/Private/File{i}.cpp"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![b'/'; 50 * 1024]).unwrap();
    }
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"Big\"]");

    let session = session(root);
    let plan = plan(&session, "TestGame");

    // 8 x 50 KiB under the 384 KiB budget: 7 + 1.
    let unity_actions: Vec<_> = compile_actions(&plan)
        .into_iter()
        .filter(|a| a.status_description.starts_with("Unity_Big_"))
        .collect();
    assert_eq!(unity_actions.len(), 2);

    // The mapping covers every source exactly once.
    let manifest: std::collections::BTreeMap<String, String> = serde_json::from_str(
        &fs::read_to_string(plan.intermediate_dir.join("Big/UnityManifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.len(), 8);
    let unity_files: std::collections::BTreeSet<&String> = manifest.values().collect();
    assert_eq!(unity_files.len(), 2);
}

#[test]
fn test_single_source_module_is_not_batched() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/One/One.build.toml", "");
    write(root, "Source/One/Private/Only.cpp", "int only();\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"One\"]");

    let session = session(root);
    let plan = plan(&session, "TestGame");

    assert_eq!(compile_actions(&plan).len(), 1);
    assert!(!plan.intermediate_dir.join("One/UnityManifest.json").exists());
}

// ============================================================================
// Boundary: empty module
// ============================================================================

#[test]
fn test_empty_module_emits_nothing() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/Empty/Empty.build.toml", "");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"Empty\"]");

    let session = session(root);
    let plan = plan(&session, "TestGame");

    assert!(compile_actions(&plan).is_empty());
    assert!(!plan.intermediate_dir.join("Empty/Precompiled.json").exists());
}

#[test]
fn test_undeclared_circular_entry_flows_through_diagnostics() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        root,
        "Source/Net/Net.build.toml",
        "public_dependencies = [\"Core\"]\ncircular_dependencies = [\"Ghost\"]",
    );
    write(root, "Source/Net/Private/Net.cpp", "int net();\n");
    write(root, "Source/Core/Core.build.toml", "");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"Net\"]");

    let session = session(root);
    let plan = plan(&session, "TestGame");

    // Non-fatal: the plan completes, and the dead whitelist entry rides
    // the action graph's diagnostics.
    assert_eq!(compile_actions(&plan).len(), 1);
    let warning = plan
        .actions
        .diagnostics
        .iter()
        .find(|d| d.message.contains("Ghost"))
        .expect("dead whitelist entry should be reported");
    assert!(warning.message.contains("circular_dependencies"));
    assert!(warning
        .location
        .as_ref()
        .unwrap()
        .ends_with("Net/Net.build.toml"));
}

#[test]
fn test_missing_precompiled_manifest_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/Pre/Pre.build.toml", "use_precompiled = true");
    write(root, "Source/Pre/Private/Pre.cpp", "int pre();\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"Pre\"]");

    let session = session(root);
    let err = plan_target(&session, &request("TestGame")).unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

// ============================================================================
// Laws: idempotence and monotonicity
// ============================================================================

#[test]
fn test_planning_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        root,
        "Source/App/App.build.toml",
        "public_dependencies = [\"Lib\"]\npublic_definitions = [\"APP=1\"]",
    );
    write(root, "Source/App/Private/App.cpp", "int app();\n");
    write(root, "Source/App/Private/More.cpp", "int more();\n");
    write(root, "Source/Lib/Lib.build.toml", "public_include_paths = [\"Public\"]");
    write(root, "Source/Lib/Private/Lib.cpp", "int lib();\n");
    write(root, "Source/TestGame.target.toml", "type = \"Game\"\nmodules = [\"App\"]");

    let first = plan(&session(root), "TestGame");
    let second = plan(&session(root), "TestGame");

    let first_json = serde_json::to_string(&first.actions.actions).unwrap();
    let second_json = serde_json::to_string(&second.actions.actions).unwrap();
    assert_eq!(first_json, second_json);
}

#[test]
fn test_whitelisted_cycle_does_not_change_other_environments() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "Source/A/A.build.toml", "public_dependencies = [\"B\"]\ndisable_unity_build = true");
    write(root, "Source/A/Private/A.cpp", "int a();\n");
    write(root, "Source/B/B.build.toml", "disable_unity_build = true");
    write(root, "Source/B/Private/B.cpp", "int b();\n");
    write(root, "Source/C/C.build.toml", "disable_unity_build = true\npublic_definitions = [\"C=1\"]");
    write(root, "Source/C/Private/C.cpp", "int c();\n");
    write(
        root,
        "Source/TestGame.target.toml",
        "type = \"Game\"\nmodules = [\"A\", \"C\"]",
    );

    let first = plan(&session(root), "TestGame");
    let c_rsp = first.intermediate_dir.join("C/C.rsp");
    let before = fs::read_to_string(&c_rsp).unwrap();

    // B grows a whitelisted circular edge back to A.
    write(
        root,
        "Source/B/B.build.toml",
        "disable_unity_build = true\npublic_dependencies = [\"A\"]\ncircular_dependencies = [\"A\"]",
    );

    let second = plan(&session(root), "TestGame");
    let after = fs::read_to_string(second.intermediate_dir.join("C/C.rsp")).unwrap();
    assert_eq!(before, after);
}
