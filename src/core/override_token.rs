//! Human-only override token.
//!
//! The token is written only by the prompt hook, from text the human typed.
//! Agent-originated writes to it are stopped by the write and shell guards
//! before they reach the filesystem. A token is bound to one workflow and
//! expires after `override.ttl_minutes`.

use crate::core::backend::{FileBackend, StateBackend};
use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::time;
use serde::{Deserialize, Serialize};

pub const GRANTED_BY_PROMPT: &str = "user_prompt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideToken {
    pub workflow: String,
    pub created: String,
    pub granted_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenCheck {
    Absent,
    /// Expired tokens are deleted as a side effect of the check.
    Expired,
    /// Granted for another workflow than the one asked about.
    WrongWorkflow(String),
    Valid(OverrideToken),
}

impl TokenCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenCheck::Valid(_))
    }
}

pub struct OverrideStore<B: StateBackend> {
    backend: B,
    ttl_minutes: u64,
}

impl OverrideStore<FileBackend> {
    pub fn open(config: &Config) -> Self {
        Self::new(
            FileBackend::new(config.token_path()),
            config.settings.override_token.ttl_minutes,
        )
    }
}

impl<B: StateBackend> OverrideStore<B> {
    pub fn new(backend: B, ttl_minutes: u64) -> Self {
        Self {
            backend,
            ttl_minutes,
        }
    }

    pub fn grant(&self, workflow: &str) -> Result<OverrideToken, PhaseGateError> {
        let token = OverrideToken {
            workflow: workflow.to_string(),
            created: time::now_epoch_z(),
            granted_by: GRANTED_BY_PROMPT.to_string(),
        };
        let text = serde_json::to_string_pretty(&token)?;
        self.backend.with_lock(|| self.backend.write(&text))?;
        Ok(token)
    }

    /// The stored token. A malformed document counts as no token.
    pub fn read(&self) -> Result<Option<OverrideToken>, PhaseGateError> {
        Ok(self
            .backend
            .read()?
            .and_then(|text| serde_json::from_str(&text).ok()))
    }

    pub fn check(&self, workflow: &str, now: i64) -> Result<TokenCheck, PhaseGateError> {
        let Some(token) = self.read()? else {
            return Ok(TokenCheck::Absent);
        };
        let fresh = time::parse_ts(&token.created)
            .map(|created| now - created <= self.ttl_minutes as i64 * 60)
            .unwrap_or(false);
        if !fresh {
            self.backend.remove()?;
            return Ok(TokenCheck::Expired);
        }
        if token.workflow != workflow {
            return Ok(TokenCheck::WrongWorkflow(token.workflow));
        }
        Ok(TokenCheck::Valid(token))
    }

    /// Delete the token. Returns whether one existed.
    pub fn revoke(&self) -> Result<bool, PhaseGateError> {
        self.backend.with_lock(|| {
            let existed = self.backend.read()?.is_some();
            self.backend.remove()?;
            Ok(existed)
        })
    }
}
