use clap::Parser;
use phasegate::core::batch_lock::BatchTracker;
use phasegate::core::config::Config;
use phasegate::core::override_token::{OverrideStore, TokenCheck};
use phasegate::core::store::WorkflowStore;
use phasegate::core::time;
use phasegate::plugins::approval::{
    BatchCli, OverrideCli, revoke_override, run_batch_cli, run_override_cli,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn revoke_clears_token_and_flags() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    let store = WorkflowStore::open(&config);
    store.start("a", true).expect("start a");
    store.start("b", false).expect("start b");
    store
        .transaction(|s| {
            for (_, wf) in s.workflows.iter_mut() {
                wf.user_override = true;
            }
            Ok(())
        })
        .expect("flag");
    OverrideStore::open(&config).grant("a").expect("grant");

    assert!(revoke_override(&config).expect("revoke"));
    assert!(!config.token_path().exists());
    let loaded = store.load().expect("load");
    assert!(loaded.workflows.iter().all(|(_, wf)| !wf.user_override));

    assert!(!revoke_override(&config).expect("second revoke"));
}

#[test]
fn revoke_without_workflows_leaves_no_store_behind() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    assert!(!revoke_override(&config).expect("revoke"));
    assert!(!config.store_path().exists());
}

#[test]
fn override_status_drops_an_expired_token() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    WorkflowStore::open(&config).start("a", true).expect("start");
    fs::create_dir_all(config.state_dir()).expect("mkdir");
    fs::write(
        config.token_path(),
        serde_json::json!({
            "workflow": "a",
            "created": time::format_epoch_z(time::now_secs() - 3 * 3600),
            "granted_by": "user_prompt"
        })
        .to_string(),
    )
    .expect("write token");

    let cli = OverrideCli::try_parse_from(["override", "--format", "json", "status"]).expect("parse");
    run_override_cli(&config, cli).expect("status");
    assert!(!config.token_path().exists());
    assert_eq!(
        OverrideStore::open(&config).check("a", time::now_secs()).expect("check"),
        TokenCheck::Absent
    );
}

#[test]
fn override_revoke_command() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    OverrideStore::open(&config).grant("a").expect("grant");
    let cli = OverrideCli::try_parse_from(["override", "revoke"]).expect("parse");
    run_override_cli(&config, cli).expect("revoke");
    assert!(!config.token_path().exists());
}

#[test]
fn batch_status_reads_without_mutating() {
    let tmp = tempdir().expect("tempdir");
    let config = Config::load(tmp.path()).expect("config");
    let tracker = BatchTracker::open(&config).expect("tracker");
    tracker
        .record_change("src/a.py", time::now_secs())
        .expect("record");
    let before = fs::read_to_string(config.lock_path()).expect("lock");

    for format in ["text", "json"] {
        let cli = BatchCli::try_parse_from(["batch", "--format", format, "status"]).expect("parse");
        run_batch_cli(&config, cli).expect("status");
    }
    assert_eq!(fs::read_to_string(config.lock_path()).expect("lock"), before);
    assert!(!tracker.approved().expect("approved"));
}
