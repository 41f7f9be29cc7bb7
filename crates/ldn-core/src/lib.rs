//! # ldn-core
//!
//! Core types for the ldn inbox orchestrator.
//!
//! ldn watches a Linked Data Notifications inbox for `Create` activities,
//! runs the requested job through external tools, and posts an `Announce`
//! back to the same inbox for every artifact it produces.
//!
//! ## Core Paradigm
//!
//! - The inbox is the only shared interface between producers and runners
//! - Messages are identified by content fingerprint, not by position
//! - Every distinct message gets at most one processing attempt
//! - Every artifact is announced with a link to the activity that made it

pub mod config;
mod error;
pub mod fail_open;
mod fingerprint;
mod types;

pub use config::{OrchestratorConfig, StageConfig, StrategyConfig};
pub use error::{LdnError, Result};
pub use fingerprint::{canonical_string, Fingerprint};
pub use types::*;
