//! Secret synchronization: filtering policy, per-entry workers, and the
//! periodic engine driving them.

pub mod engine;
pub mod filter;
pub mod worker;

pub use engine::{NamespaceOutcome, SyncEngine};
pub use filter::{filter_entries, EntryMode};
pub use worker::{EntryJob, SyncCounters};
