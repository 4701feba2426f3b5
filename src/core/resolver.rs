//! File-to-workflow ownership.
//!
//! A workflow owns a file when one of its `affected_files` entries matches
//! the normalized path. Entries are tried per workflow in list order with
//! this precedence for each entry: exact match, then suffix containment in
//! either direction, then `*` glob. Workflows are scanned in store order and
//! the first owner wins, so overlapping claims resolve to the workflow that
//! was created first.
//!
//! A file nobody claims belongs to the active workflow only while that
//! workflow has not declared any files. Once it has, an unclaimed file is a
//! scope violation.

use crate::core::store::{Store, Workflow};
use regex::Regex;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The store holds no workflows; the gate is inert.
    NoWorkflows,
    Owned(String),
    /// Claimed by nobody, attributed to the still-unscoped active workflow.
    ActiveFallback(String),
    Unowned { active: Option<String> },
}

impl Resolution {
    /// The workflow the file belongs to, if any.
    pub fn workflow_name(&self) -> Option<&str> {
        match self {
            Resolution::Owned(n) | Resolution::ActiveFallback(n) => Some(n.as_str()),
            _ => None,
        }
    }
}

/// Which rule matched an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Suffix,
    Glob,
}

/// Make `file_path` comparable with `affected_files` entries.
pub fn normalize(root: &Path, file_path: &str) -> String {
    let mut path = file_path.replace('\\', "/");
    let root_str = root.to_string_lossy().replace('\\', "/");
    let root_str = root_str.trim_end_matches('/');
    if !root_str.is_empty() {
        if let Some(rest) = path.strip_prefix(root_str) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest.to_string();
            }
        }
    }
    strip_leading(&path).to_string()
}

fn strip_leading(mut s: &str) -> &str {
    loop {
        if let Some(rest) = s.strip_prefix("./") {
            s = rest;
        } else if let Some(rest) = s.strip_prefix('/') {
            s = rest;
        } else {
            return s;
        }
    }
}

fn normalize_entry(entry: &str) -> String {
    strip_leading(&entry.trim().replace('\\', "/")).to_string()
}

fn glob_regex(entry: &str) -> Option<Regex> {
    let pattern = entry
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}", pattern)).ok()
}

/// Match a normalized path against one entry.
pub fn match_entry(path: &str, entry: &str) -> Option<MatchKind> {
    let entry = normalize_entry(entry);
    if entry.is_empty() || path.is_empty() {
        return None;
    }
    if path == entry {
        return Some(MatchKind::Exact);
    }
    if path.ends_with(&format!("/{}", entry)) || entry.ends_with(&format!("/{}", path)) {
        return Some(MatchKind::Suffix);
    }
    if entry.contains('*') {
        if glob_regex(&entry).is_some_and(|re| re.is_match(path)) {
            return Some(MatchKind::Glob);
        }
        let bare = entry.replace('*', "");
        let bare = strip_leading(&bare);
        if !bare.is_empty() && path.ends_with(&format!("/{}", bare)) {
            return Some(MatchKind::Glob);
        }
    }
    None
}

/// True when any of the workflow's entries matches the normalized path.
pub fn workflow_claims(wf: &Workflow, path: &str) -> bool {
    wf.affected_files
        .iter()
        .any(|entry| match_entry(path, entry).is_some())
}

pub fn resolve(store: &Store, root: &Path, file_path: &str) -> Resolution {
    if store.workflows.is_empty() {
        return Resolution::NoWorkflows;
    }
    let path = normalize(root, file_path);
    if let Some((name, _)) = store
        .workflows
        .iter()
        .find(|(_, wf)| workflow_claims(wf, &path))
    {
        return Resolution::Owned(name.to_string());
    }
    match store.active() {
        Some((name, wf)) if wf.affected_files.is_empty() => {
            Resolution::ActiveFallback(name.to_string())
        }
        Some((name, _)) => Resolution::Unowned {
            active: Some(name.to_string()),
        },
        None => Resolution::Unowned { active: None },
    }
}

/// The owning workflow, or `None` for both "no workflows" and "unowned".
pub fn resolve_workflow<'a>(store: &'a Store, root: &Path, file_path: &str) -> Option<&'a Workflow> {
    resolve(store, root, file_path)
        .workflow_name()
        .and_then(|name| store.workflows.get(name))
}
