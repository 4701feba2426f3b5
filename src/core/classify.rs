//! Path classification.
//!
//! One ordered rule table decides what kind of file a path is. The table is
//! data: it can be replaced from config, but the protected rules guarding
//! the approval files are always evaluated first.

use crate::core::config::Settings;
use crate::core::error::PhaseGateError;
use crate::core::resolver;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathClass {
    /// Approval state the agent must never write.
    Protected,
    Infrastructure,
    Docs,
    Test,
    Config,
    Code,
    Other,
}

impl PathClass {
    /// Classes the gate allows without consulting any workflow.
    pub fn is_exempt(self) -> bool {
        matches!(
            self,
            PathClass::Infrastructure | PathClass::Docs | PathClass::Test | PathClass::Config
        )
    }
}

impl std::fmt::Display for PathClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PathClass::Protected => "protected",
            PathClass::Infrastructure => "infrastructure",
            PathClass::Docs => "docs",
            PathClass::Test => "test",
            PathClass::Config => "config",
            PathClass::Code => "code",
            PathClass::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassRule {
    pub pattern: String,
    pub class: PathClass,
}

fn rule(pattern: &str, class: PathClass) -> ClassRule {
    ClassRule {
        pattern: pattern.to_string(),
        class,
    }
}

pub fn protected_rules() -> Vec<ClassRule> {
    vec![
        rule(r"user_override_token", PathClass::Protected),
        rule(r"user_approved_validation", PathClass::Protected),
        rule(r"pending_validation\.json", PathClass::Protected),
        // Phase and approval flags; changed only through the workflow CLI.
        rule(r"(^|/)workflow_state\.json$", PathClass::Protected),
    ]
}

/// The built-in exemption table, in evaluation order.
pub fn default_rules() -> Vec<ClassRule> {
    vec![
        rule(r"(^|/)\.claude/", PathClass::Infrastructure),
        rule(r"(^|/)scripts/", PathClass::Infrastructure),
        rule(r"(^|/)tools/", PathClass::Infrastructure),
        rule(r"(^|/)docs/", PathClass::Docs),
        rule(r"\.md$", PathClass::Docs),
        rule(r"\.txt$", PathClass::Docs),
        rule(r"(?i)(^|/)(README|CHANGELOG|LICENSE)[^/]*$", PathClass::Docs),
        rule(r"(^|/)(Tests|UITests|Test|test|tests|__tests__)/", PathClass::Test),
        rule(r"(^|/)test_[^/]*$", PathClass::Test),
        rule(r"_test\.[^/]*$", PathClass::Test),
        rule(r"\.test\.[^/]*$", PathClass::Test),
        rule(r"\.spec\.[^/]*$", PathClass::Test),
        rule(r"_spec\.[^/]*$", PathClass::Test),
        rule(r"(^|/)spec/", PathClass::Test),
        rule(r"\.json$", PathClass::Config),
        rule(r"\.ya?ml$", PathClass::Config),
        rule(r"\.gitignore$", PathClass::Config),
    ]
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Regex, PathClass)>,
    code_extensions: Vec<String>,
}

impl Classifier {
    pub fn new(table: &[ClassRule], code_extensions: &[String]) -> Result<Self, PhaseGateError> {
        let mut rules = Vec::with_capacity(table.len() + 4);
        for r in protected_rules().iter().chain(table.iter()) {
            rules.push((Regex::new(&r.pattern)?, r.class));
        }
        Ok(Self {
            rules,
            code_extensions: code_extensions.to_vec(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PhaseGateError> {
        Self::new(&settings.classification.rules, &settings.code_extensions)
    }

    pub fn classify(&self, path: &str) -> PathClass {
        let path = path.replace('\\', "/");
        for (re, class) in &self.rules {
            if re.is_match(&path) {
                return *class;
            }
        }
        if self.is_code(&path) {
            PathClass::Code
        } else {
            PathClass::Other
        }
    }

    /// Classify a path the hook received, possibly absolute. Protected rules
    /// see it as given; the rest see it relative to `root`, so a project
    /// living under e.g. `~/tools/` is not exempt wholesale.
    pub fn classify_under(&self, root: &Path, path: &str) -> PathClass {
        match self.classify(path) {
            PathClass::Protected => PathClass::Protected,
            _ => self.classify(&resolver::normalize(root, path)),
        }
    }

    pub fn is_code(&self, path: &str) -> bool {
        self.code_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

/// True when a shell command mentions any protected state file.
pub fn references_protected(command: &str) -> bool {
    ["user_override_token", "user_approved_validation", "pending_validation"]
        .iter()
        .any(|name| command.contains(name))
}
