//! Core engine: state, policy, and the primitives hooks are built from.
//!
//! Nothing here parses command lines or prints. Hooks and CLI commands in
//! `plugins` load inputs, call into these modules, and render the result.

pub mod artifact;
pub mod backend;
pub mod batch_lock;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod hook_input;
pub mod migration;
pub mod output;
pub mod override_token;
pub mod phase;
pub mod resolver;
pub mod store;
pub mod time;
