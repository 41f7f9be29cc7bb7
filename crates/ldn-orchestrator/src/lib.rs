//! # ldn-orchestrator
//!
//! The inbox side of ldn: polling, deduplication, capability filtering,
//! job dispatch and provenance announcements.
//!
//! ## Message lifecycle
//!
//! 1. Fetch the inbox and fingerprint each message
//! 2. Skip fingerprints already in the seen log
//! 3. Skip anything that is not a `Create` for our action
//! 4. Build and run the job's stages, announcing each artifact
//! 5. Record the fingerprint, whether the job succeeded or failed

mod announce;
mod dedup;
mod filter;
mod mailbox;
mod orchestrator;
mod sender;
pub mod state_machine;

pub use announce::{Announcer, JobAnnouncer};
pub use dedup::DedupStore;
pub use filter::CapabilityFilter;
pub use mailbox::{HttpMailbox, Mailbox, MemoryMailbox};
pub use orchestrator::{CycleReport, MessageOutcome, MessageReport, Orchestrator};
pub use sender::{create_activity, parse_param, send_job};
pub use state_machine::{transition, MessageEvent, MessageState};
