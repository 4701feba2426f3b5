use phasegate::core::backend::{FileBackend, StateBackend};
use phasegate::core::config::Config;
use phasegate::core::phase::{BacklogStatus, Phase};
use phasegate::core::resolver::{self, Resolution};
use phasegate::core::store::{Store, WorkflowStore};
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn file_store(root: &std::path::Path) -> WorkflowStore<FileBackend> {
    WorkflowStore::open(&Config::load(root).expect("config"))
}

#[test]
fn concurrent_transactions_lose_no_updates() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    file_store(&root).start("shared", true).expect("start");

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = file_store(&root);
                barrier.wait();
                for j in 0..5 {
                    store
                        .add_affected_files(Some("shared"), &[format!("src/w{}_{}.py", i, j)])
                        .expect("add files");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker");
    }

    let (_, wf) = file_store(&root).status(Some("shared")).expect("status");
    assert_eq!(wf.affected_files.len(), workers * 5);
    let leftovers: Vec<_> = fs::read_dir(root.join(".claude"))
        .expect("state dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn concurrent_starts_keep_every_workflow() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                file_store(&root)
                    .start(&format!("feature-{}", i), false)
                    .expect("start")
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().expect("worker"));
    }
    assert_eq!(file_store(&root).list().expect("list").len(), 6);
}

#[test]
fn legacy_document_on_disk_is_migrated_once() {
    let tmp = tempdir().expect("tempdir");
    let state = tmp.path().join(".claude");
    fs::create_dir_all(&state).expect("mkdir");
    fs::write(
        state.join("workflow_state.json"),
        r#"{
  "current_phase": "spec_approved",
  "feature_name": "checkout",
  "spec_file": "docs/specs/checkout.md",
  "spec_approved": true,
  "last_updated": "2025-11-02T10:15:00"
}"#,
    )
    .expect("write legacy");

    let store = file_store(tmp.path());
    let loaded = store.load().expect("load");
    assert_eq!(loaded.version, "2.0");
    assert_eq!(loaded.active_workflow.as_deref(), Some("checkout"));
    let wf = loaded.workflows.get("checkout").expect("migrated");
    assert_eq!(wf.current_phase, Phase::Approved);
    assert!(wf.spec_approved);
    assert_eq!(wf.created, "2025-11-02T10:15:00");

    // First mutation persists the v2 shape; the next load is not a migration.
    store.mark_red_done(None, "1 failed").expect("red");
    let text = fs::read_to_string(state.join("workflow_state.json")).expect("read");
    assert!(text.contains("\"version\": \"2.0\""));
    let again = store.load().expect("reload");
    assert_eq!(
        again.workflows.get("checkout").expect("wf").current_phase,
        Phase::TddRed
    );
}

#[test]
fn load_save_is_idempotent_and_keeps_unknown_keys() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("state.json");
    let doc = r#"{
  "version": "2.0",
  "workflows": {
    "zeta": {"current_phase": "phase6_implement", "affected_files": ["src/z.py"], "owner": "team-a"},
    "alpha": {"current_phase": "phase1_context", "backlog_status": "blocked"}
  },
  "active_workflow": "zeta",
  "generator": "external-tool"
}"#;
    fs::write(&path, doc).expect("write");
    let store = WorkflowStore::new(FileBackend::new(&path), tmp.path());
    let first = store.load().expect("load");
    store.save(&first).expect("save");
    let written = fs::read_to_string(&path).expect("read");
    let second = Store::from_json(&written).expect("parse");
    assert_eq!(first, second);
    assert_eq!(second.workflows.names(), vec!["zeta".to_string(), "alpha".to_string()]);
    assert!(written.contains("\"owner\": \"team-a\""));
    assert!(written.contains("\"generator\": \"external-tool\""));
    assert_eq!(
        second.workflows.get("alpha").expect("alpha").backlog_status,
        Some(BacklogStatus::Blocked)
    );

    store.save(&second).expect("save again");
    assert_eq!(fs::read_to_string(&path).expect("read"), written);
}

#[test]
fn overlapping_claims_resolve_in_store_order_after_reload() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    let store = file_store(&root);
    for name in ["zeta", "alpha", "mid"] {
        store.start(name, false).expect("start");
    }
    let shared = vec!["src/shared.py".to_string()];
    store.add_affected_files(Some("alpha"), &shared).expect("alpha files");
    store.add_affected_files(Some("zeta"), &shared).expect("zeta files");

    let reloaded = file_store(&root).load().expect("load");
    assert_eq!(reloaded.workflows.names(), vec!["zeta", "alpha", "mid"]);
    assert_eq!(
        resolver::resolve(&reloaded, &root, "src/shared.py"),
        Resolution::Owned("zeta".to_string())
    );

    file_store(&root).save(&reloaded).expect("save");
    let again = file_store(&root).load().expect("load again");
    assert_eq!(again.workflows.names(), vec!["zeta", "alpha", "mid"]);
}

#[test]
fn file_backend_lock_file_sits_next_to_document() {
    let tmp = tempdir().expect("tempdir");
    let backend = FileBackend::new(tmp.path().join("nested/doc.json"));
    backend
        .with_lock(|| backend.write("{}"))
        .expect("locked write");
    assert_eq!(backend.read().expect("read").as_deref(), Some("{}"));
    assert!(tmp.path().join("nested/doc.json.lock").exists());
    backend.remove().expect("remove");
    backend.remove().expect("remove twice");
    assert_eq!(backend.read().expect("read"), None);
}

#[test]
fn full_lifecycle_through_the_store() {
    let tmp = tempdir().expect("tempdir");
    let store = file_store(tmp.path());
    store.start("login", true).expect("start");
    for _ in 0..3 {
        store.advance(None).expect("advance");
    }
    assert_eq!(store.status(None).expect("status").1.current_phase, Phase::Spec);
    assert_eq!(store.approve_spec(None).expect("approve").as_deref(), Some("login"));
    assert_eq!(store.mark_red_done(None, "2 failed").expect("red"), Phase::TddRed);
    store.advance(None).expect("advance");
    assert_eq!(store.mark_green_done(None, "all passed").expect("green"), Phase::Validate);
    store.complete(None).expect("complete");

    let (_, wf) = store.status(Some("login")).expect("status");
    assert_eq!(wf.current_phase, Phase::Complete);
    assert_eq!(wf.backlog_status, Some(BacklogStatus::Done));
    assert_eq!(wf.phases_completed.len(), 8);
    assert_eq!(store.load().expect("load").active_workflow, None);
}
