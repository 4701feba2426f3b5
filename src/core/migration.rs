//! One-way migration from the single-workflow (v1) state document.
//!
//! A v1 document has no `version` key and describes one feature through
//! `feature_name`. Loading such a document yields a v2 store holding that
//! one workflow. Migration is detected by the missing `version` key, so a
//! migrated-and-saved store is never migrated twice.

use crate::core::phase::Phase;
use crate::core::store::{Store, Workflow};
use crate::core::time;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// The v1 document shape. Only the fields that carry over are read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LegacyState {
    pub current_phase: Option<String>,
    pub feature_name: Option<String>,
    pub spec_file: Option<String>,
    pub spec_approved: Option<bool>,
    pub last_updated: Option<String>,
}

/// True for an object document without a `version` key. Only the key set is
/// inspected, so the parsed value is discarded.
pub fn needs_migration(text: &str) -> Result<bool, serde_json::Error> {
    Ok(match serde_json::from_str::<JsonValue>(text)? {
        JsonValue::Object(obj) => !obj.contains_key("version"),
        _ => false,
    })
}

pub fn migrate_legacy(legacy: LegacyState) -> Store {
    let name = match legacy.feature_name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return Store::default(),
    };
    let phase = Phase::from_legacy(legacy.current_phase.as_deref().unwrap_or("idle"));
    let stamp = legacy.last_updated.unwrap_or_else(time::now_epoch_z);
    let workflow = Workflow {
        current_phase: phase,
        created: stamp.clone(),
        last_updated: stamp,
        spec_file: legacy.spec_file,
        spec_approved: legacy.spec_approved.unwrap_or(false),
        ..Workflow::default()
    };
    let mut store = Store::default();
    store.workflows.insert(name.clone(), workflow);
    store.active_workflow = Some(name);
    store
}
