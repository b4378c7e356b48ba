//! # Sync engine
//!
//! Reconciles adapter snapshots against the downstream knowledge-base
//! service: a durable basename-keyed file index remembers what was uploaded
//! where, the manager decides upload/attach/skip/migrate per file and
//! removes orphans, and the scheduler drives cycles on a fixed interval.

pub mod error;
pub mod index;
pub mod manager;
pub mod scheduler;

pub use error::{SyncError, SyncResult};
pub use index::{FileIndex, IndexEntry, DOWNSTREAM_SOURCE};
pub use manager::{CycleReport, SyncManager};
pub use scheduler::Scheduler;
