use phasegate::core::classify::{ClassRule, PathClass};
use phasegate::core::config::Config;
use phasegate::core::hook_input::{self, HookInput};
use phasegate::core::override_token::OverrideStore;
use phasegate::core::phase::Phase;
use phasegate::core::store::{Artifact, WorkflowStore};
use phasegate::core::time;
use phasegate::plugins::hooks::{self, EXIT_ALLOW, EXIT_BLOCK, HookOutcome};
use serde_json::json;
use std::fs;
use tempfile::{TempDir, tempdir};

struct Project {
    _tmp: TempDir,
    config: Config,
}

impl Project {
    fn new() -> Self {
        let tmp = tempdir().expect("tempdir");
        let config = Config::load(tmp.path()).expect("config");
        Self { _tmp: tmp, config }
    }

    fn store(&self) -> WorkflowStore<phasegate::core::backend::FileBackend> {
        WorkflowStore::open(&self.config)
    }

    fn gate(&self, path: &str) -> HookOutcome {
        hooks::gate(&self.config, &edit(path), time::now_secs()).expect("gate")
    }
}

fn edit(path: &str) -> HookInput {
    let doc = json!({ "tool_name": "Edit", "tool_input": { "file_path": path } });
    hook_input::resolve(None, &doc.to_string())
}

fn bash(command: &str) -> HookInput {
    let doc = json!({ "tool_name": "Bash", "tool_input": { "command": command } });
    hook_input::resolve(None, &doc.to_string())
}

fn message(outcome: &HookOutcome) -> &str {
    outcome.message.as_deref().unwrap_or("")
}

#[test]
fn scenario_1_empty_store_allows() {
    let p = Project::new();
    let out = p.gate("src/app.py");
    assert_eq!(out.exit_code, EXIT_ALLOW);
    assert!(!p.config.store_path().exists());
}

#[test]
fn scenario_2_idle_workflow_blocks_with_start_instructions() {
    let p = Project::new();
    p.store().start("feature-x", true).expect("start");
    let out = p.gate("src/app.py");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert!(message(&out).contains("WORKFLOW NOT STARTED!"));
    assert!(message(&out).contains("/context"));
}

#[test]
fn scenario_3_red_flag_opens_implementation() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Approved).expect("phase 4");

    let out = p.gate("src/app.py");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert!(message(&out).contains("TDD RED PHASE REQUIRED!"));

    assert_eq!(store.mark_red_done(None, "1 failed").expect("red"), Phase::TddRed);
    store.set_phase(None, Phase::Implement).expect("phase 6");
    assert_eq!(p.gate("src/app.py").exit_code, EXIT_ALLOW);
}

#[test]
fn scenario_3_valid_red_artifact_in_phase_five() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Approved).expect("phase 4");
    store.mark_red_done(None, "1 failed").expect("red");

    let out = p.gate("src/app.py");
    assert!(message(&out).contains("TDD RED PHASE - Capture Failure First!"));

    fs::create_dir_all(p.config.root.join("evidence")).expect("mkdir");
    fs::write(
        p.config.root.join("evidence/red.txt"),
        "FAILED tests/test_login.py::test_rejects_bad_password - AssertionError\n",
    )
    .expect("write evidence");
    let recorded = store
        .add_artifact(
            None,
            Artifact {
                artifact_type: "test_output".to_string(),
                path: "evidence/red.txt".to_string(),
                description: "login test fails with AssertionError".to_string(),
                ..Artifact::default()
            },
        )
        .expect("artifact");
    assert_eq!(recorded.phase.as_deref(), Some("phase5_tdd_red"));
    assert!(recorded.sha256.is_some());

    assert_eq!(p.gate("src/app.py").exit_code, EXIT_ALLOW);
    store.advance(None).expect("phase 6");
    assert_eq!(p.gate("src/app.py").exit_code, EXIT_ALLOW);
}

#[test]
fn scenario_4_scope_violation_names_affected_files() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Implement).expect("phase 6");
    store.mark_red_done(None, "1 failed").expect("red");
    store
        .add_affected_files(None, &["src/app.py".to_string()])
        .expect("files");

    let out = p.gate("src/other.py");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert!(message(&out).contains("FILE NOT IN WORKFLOW SCOPE!"));
    assert!(message(&out).contains("src/app.py"));

    let absolute = p.config.root.join("src/app.py");
    assert_eq!(p.gate(&absolute.to_string_lossy()).exit_code, EXIT_ALLOW);
}

#[test]
fn scenario_5_override_is_human_only_and_bypasses_scope() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Implement).expect("phase 6");
    store.mark_red_done(None, "1 failed").expect("red");
    store
        .add_affected_files(None, &["src/app.py".to_string()])
        .expect("files");

    let granted = hooks::prompt(&p.config, "OK, override for this one").expect("prompt");
    assert_eq!(granted.exit_code, EXIT_ALLOW);
    assert!(granted.notices.iter().any(|n| n.contains("Override granted")));
    assert!(p.config.token_path().exists());
    assert!(store.status(None).expect("status").1.user_override);

    for target in [
        ".claude/user_override_token.json",
        "/elsewhere/.claude/user_override_token.json",
    ] {
        let mut input = edit(target);
        input.tool_name = Some("Write".to_string());
        let out = hooks::guard_write(&p.config, &input).expect("guard");
        assert_eq!(out.exit_code, EXIT_BLOCK, "{}", target);
        assert!(message(&out).contains("PROTECTED FILE"));
    }
    let out = hooks::guard_bash(&p.config, &bash("echo '{}' > .claude/user_override_token.json"))
        .expect("guard bash");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert_eq!(
        hooks::guard_bash(&p.config, &bash("ls -la")).expect("guard bash").exit_code,
        EXIT_ALLOW
    );

    assert_eq!(p.gate("src/other.py").exit_code, EXIT_ALLOW);
}

#[test]
fn override_for_one_workflow_does_not_open_another() {
    let p = Project::new();
    let store = p.store();
    store.start("a", true).expect("start a");
    store.start("b", false).expect("start b");
    hooks::prompt(&p.config, "override").expect("prompt");
    assert_eq!(p.gate("src/app.py").exit_code, EXIT_ALLOW);

    store.switch("b").expect("switch");
    let out = p.gate("src/app.py");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert!(message(&out).contains("WORKFLOW NOT STARTED!"));
    let token = OverrideStore::open(&p.config).read().expect("read").expect("token");
    assert_eq!(token.workflow, "a");
}

#[test]
fn scenario_6_batch_window() {
    let p = Project::new();
    let t0 = 1_800_000_000;
    let first = hooks::batch(&p.config, &edit("src/a.py"), t0).expect("batch");
    let second = hooks::batch(&p.config, &edit("src/b.py"), t0 + 30).expect("batch");
    assert_eq!(first.exit_code, EXIT_ALLOW);
    assert_eq!(second.exit_code, EXIT_ALLOW);
    let lock = fs::read_to_string(p.config.lock_path()).expect("lock");
    assert!(lock.contains("src/a.py") && lock.contains("src/b.py"));

    let late = t0 + 30 + 6 * 60;
    let third = hooks::batch(&p.config, &edit("src/c.py"), late).expect("batch");
    assert_eq!(third.exit_code, EXIT_BLOCK);
    assert!(message(&third).contains("Batch Window Expired"));
    assert!(message(&third).contains("src/a.py, src/b.py"));

    let approval = hooks::prompt(&p.config, "validated, looks right").expect("prompt");
    assert!(approval.notices.iter().any(|n| n.contains("batch")));
    assert!(p.config.marker_path().exists());

    let next = hooks::batch(&p.config, &edit("src/c.py"), late + 5).expect("batch");
    assert_eq!(next.exit_code, EXIT_ALLOW);
    assert!(!p.config.marker_path().exists());
    let lock = fs::read_to_string(p.config.lock_path()).expect("lock");
    assert!(lock.contains("src/c.py") && !lock.contains("src/a.py"));
}

#[test]
fn batch_ignores_exempt_paths() {
    let p = Project::new();
    let out = hooks::batch(&p.config, &edit("docs/src/notes.md"), 1_800_000_000).expect("batch");
    assert_eq!(out.exit_code, EXIT_ALLOW);
    assert!(!p.config.lock_path().exists());
}

#[test]
fn uncompilable_patterns_block_code_edits() {
    let mut p = Project::new();
    p.store().start("feature-x", true).expect("start");
    p.store().set_phase(None, Phase::Complete).expect("phase");
    p.config.settings.tdd.red_test_paths = vec!["(".to_string()];
    p.config.settings.batch.protected_paths = vec!["src/(".to_string()];
    p.config.settings.classification.rules = vec![ClassRule {
        pattern: "[".to_string(),
        class: PathClass::Docs,
    }];
    let now = time::now_secs();

    let gated = hooks::gate(&p.config, &edit("src/app.py"), now).expect("gate");
    assert_eq!(gated.exit_code, EXIT_BLOCK);
    assert!(message(&gated).contains("PHASEGATE CONFIG INVALID!"), "{}", message(&gated));
    let guarded = hooks::guard_write(&p.config, &edit("src/app.py")).expect("guard");
    assert_eq!(guarded.exit_code, EXIT_BLOCK);
    let batched = hooks::batch(&p.config, &edit("src/app.py"), now).expect("batch");
    assert_eq!(batched.exit_code, EXIT_BLOCK);

    let docs = hooks::gate(&p.config, &edit("docs/notes.md"), now).expect("gate");
    assert_eq!(docs.exit_code, EXIT_ALLOW);
}

#[test]
fn prompt_approves_spec_only_in_phase_three() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Analyse).expect("phase 2");
    hooks::prompt(&p.config, "approved").expect("prompt");
    assert_eq!(store.status(None).expect("status").1.current_phase, Phase::Analyse);

    store.advance(None).expect("phase 3");
    let out = hooks::prompt(&p.config, "Spec OK, go ahead").expect("prompt");
    assert!(out.notices.iter().any(|n| n.contains("approved")));
    let (_, wf) = store.status(None).expect("status");
    assert_eq!(wf.current_phase, Phase::Approved);
    assert!(wf.spec_approved);
}

#[test]
fn prompt_pause_keeps_phase() {
    let p = Project::new();
    let store = p.store();
    store.start("feature-x", true).expect("start");
    store.set_phase(None, Phase::Implement).expect("phase 6");
    hooks::prompt(&p.config, "that's it, stop here for today").expect("prompt");
    let (_, wf) = store.status(None).expect("status");
    assert_eq!(wf.current_phase, Phase::Implement);
    assert_eq!(wf.backlog_status.map(|s| s.as_str()), Some("spec_ready"));
}

#[test]
fn audit_log_records_gate_decisions() {
    let p = Project::new();
    p.store().start("feature-x", true).expect("start");
    p.gate("src/app.py");
    p.gate("README.md");
    let log = fs::read_to_string(p.config.events_path()).expect("events");
    let events: Vec<serde_json::Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["decision"], "block");
    assert_eq!(events[0]["reason"], "workflow_not_started");
    assert_eq!(events[1]["decision"], "allow");
    assert_eq!(events[1]["target"], "README.md");
}

#[test]
fn pre_commit_blocks_on_failing_tests_and_revokes_on_success() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("phasegate.toml"),
        "[commit]\ntest_command = \"echo 'ok 1'; echo 'FAILED test_x'; exit 3\"\n",
    )
    .expect("config");
    let config = Config::load(tmp.path()).expect("config");
    WorkflowStore::open(&config).start("w", true).expect("start");
    hooks::prompt(&config, "override").expect("grant");

    let out = hooks::pre_commit(&config, &bash("git commit -m 'wip'")).expect("pre-commit");
    assert_eq!(out.exit_code, EXIT_BLOCK);
    assert!(message(&out).contains("TESTS FAILING"));
    assert!(message(&out).contains("FAILED test_x"));
    assert!(message(&out).contains("exit code 3"));
    assert!(config.token_path().exists());

    let amend = hooks::pre_commit(&config, &bash("git commit --amend --no-edit")).expect("amend");
    assert_eq!(amend.exit_code, EXIT_ALLOW);

    fs::write(
        tmp.path().join("phasegate.toml"),
        "[commit]\ntest_command = \"true\"\n",
    )
    .expect("config");
    let config = Config::load(tmp.path()).expect("config");
    let out = hooks::pre_commit(&config, &bash("git commit -m 'done'")).expect("pre-commit");
    assert_eq!(out.exit_code, EXIT_ALLOW);
    assert!(!config.token_path().exists());
    let (_, wf) = WorkflowStore::open(&config).status(None).expect("status");
    assert!(!wf.user_override);
}

#[test]
fn pre_commit_ignores_other_commands() {
    let p = Project::new();
    let out = hooks::pre_commit(&p.config, &bash("git status")).expect("pre-commit");
    assert_eq!(out.exit_code, EXIT_ALLOW);
    assert!(!p.config.state_dir().join(hooks::TEST_LOG_FILE).exists());
}
