use clap::Parser;
use phasegate::core::config::Config;
use phasegate::core::error::PhaseGateError;
use phasegate::core::phase::{BacklogStatus, Phase};
use phasegate::core::store::WorkflowStore;
use phasegate::plugins::workflow::{WorkflowCli, run_workflow_cli};
use std::fs;
use tempfile::tempdir;

fn run(config: &Config, args: &[&str]) -> Result<(), PhaseGateError> {
    let mut argv = vec!["workflow"];
    argv.extend_from_slice(args);
    let cli = WorkflowCli::try_parse_from(argv).expect("parse");
    run_workflow_cli(config, cli)
}

#[test]
fn cli_drives_the_lifecycle() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    let store = WorkflowStore::open(&config);

    run(&config, &["start", "login"]).expect("start");
    run(&config, &["set-phase", "4"]).expect("set-phase");
    run(&config, &["red-done", "2 failed"]).expect("red");
    run(&config, &["files", "src/login.py", "src/session/*"]).expect("files");
    run(&config, &["spec", "docs/specs/login.md"]).expect("spec");
    run(&config, &["advance", "--format", "json"]).expect("advance");

    let (name, wf) = store.status(None).expect("status");
    assert_eq!(name, "login");
    assert_eq!(wf.current_phase, Phase::Implement);
    assert!(wf.red_test_done);
    assert_eq!(wf.red_test_result.as_deref(), Some("2 failed"));
    assert_eq!(wf.affected_files, vec!["src/login.py", "src/session/*"]);
    assert_eq!(wf.spec_file.as_deref(), Some("docs/specs/login.md"));

    run(&config, &["green-done", "all passed"]).expect("green");
    assert_eq!(store.status(None).expect("status").1.current_phase, Phase::Validate);
    run(&config, &["complete"]).expect("complete");
    assert_eq!(store.load().expect("load").active_workflow, None);
}

#[test]
fn workflow_flag_targets_a_non_active_workflow() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    let store = WorkflowStore::open(&config);
    run(&config, &["start", "a"]).expect("start a");
    run(&config, &["start", "b", "--no-activate"]).expect("start b");
    run(&config, &["set-phase", "phase2_analyse", "--workflow", "b"]).expect("set b");

    let loaded = store.load().expect("load");
    assert_eq!(loaded.active_workflow.as_deref(), Some("a"));
    assert_eq!(loaded.workflows.get("a").expect("a").current_phase, Phase::Idle);
    assert_eq!(loaded.workflows.get("b").expect("b").current_phase, Phase::Analyse);
}

#[test]
fn backlog_pin_and_auto() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    let store = WorkflowStore::open(&config);
    run(&config, &["start", "a"]).expect("start");
    run(&config, &["backlog", "blocked"]).expect("pin");
    run(&config, &["advance"]).expect("advance");
    assert_eq!(
        store.status(None).expect("status").1.backlog_status,
        Some(BacklogStatus::Blocked)
    );
    run(&config, &["backlog", "auto"]).expect("auto");
    assert_eq!(
        store.status(None).expect("status").1.backlog_status,
        Some(BacklogStatus::Open)
    );
    assert!(run(&config, &["backlog", "someday"]).is_err());
}

#[test]
fn bad_input_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    assert!(matches!(
        run(&config, &["start", "bad name!"]),
        Err(PhaseGateError::ValidationError(_))
    ));
    assert!(matches!(
        run(&config, &["advance"]),
        Err(PhaseGateError::NotFound(_))
    ));
    run(&config, &["start", "a"]).expect("start");
    assert!(run(&config, &["set-phase", "phase9_party"]).is_err());
    assert!(matches!(
        run(&config, &["switch", "ghost"]),
        Err(PhaseGateError::NotFound(_))
    ));
    assert!(run(&config, &["artifact", "--type", "hologram", "--path", "x", "--description", "long enough"]).is_err());
}

#[test]
fn artifact_records_digest_and_phase() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    run(&config, &["start", "a"]).expect("start");
    run(&config, &["set-phase", "phase5_tdd_red"]).expect("phase");
    fs::write(tmp.path().join("red.log"), "AssertionError: expected 1 got 2\n").expect("write");
    run(
        &config,
        &["artifact", "--type", "log", "--path", "red.log", "--description", "assert fails on totals"],
    )
    .expect("artifact");

    let (_, wf) = WorkflowStore::open(&config).status(None).expect("status");
    let artifact = &wf.test_artifacts[0];
    assert_eq!(artifact.phase.as_deref(), Some("phase5_tdd_red"));
    assert_eq!(artifact.sha256.as_ref().map(|h| h.len()), Some(64));
    assert!(artifact.created.is_some());
}

#[test]
fn read_only_commands_do_not_create_state() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    run(&config, &["list"]).expect("list");
    run(&config, &["resolve", "src/app.py"]).expect("resolve");
    run(&config, &["check", "src/app.py", "--format", "json"]).expect("check");
    assert!(!config.store_path().exists());
}
