//! Process-facing surfaces: hook entry points and CLI commands.

pub mod approval;
pub mod hooks;
pub mod workflow;
