//! Reconciliation core shared by every entity type.
//!
//! Each run is a full-scan comparison of the source against the replica:
//! both sides are read into keyed sets, diffed by natural key, and the
//! resulting deletions and upserts are applied in bulk.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `EntityKind`, `NaturalKey`, `SyncReport`, constants
//! - [`extract`] - Full scans into keyed sets
//! - [`diff`] - Key-set differ producing a `ChangeSet`
//! - [`writer`] - Bulk delete and volume-sized upsert batches
//! - [`job`] - `EntitySync` capability and the generic `ReconcileJob`
//! - [`scheduler`] - Interval loop with overlap guard and dependency chaining
//! - [`rebuild`] - Operator-invoked drop-and-rebuild of one collection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docsync::sync::{Scheduler, DEFAULT_RUN_TIMEOUT, DEFAULT_SYNC_INTERVAL};
//!
//! let mut scheduler = Scheduler::new(DEFAULT_SYNC_INTERVAL, DEFAULT_RUN_TIMEOUT);
//! for job in docsync::jobs::all(db, replica) {
//!     scheduler.register(job);
//! }
//! scheduler.run(shutdown).await;
//! ```

pub mod diff;
pub mod extract;
pub mod job;
pub mod rebuild;
pub mod scheduler;
pub mod writer;

mod errors;
mod types;

// Re-export types
pub use types::{EntityKind, KeyedSet, NaturalKey, Phase, SyncReport, UnknownEntityKind};

// Re-export constants
pub use types::{DEFAULT_RUN_TIMEOUT, DEFAULT_SYNC_INTERVAL, SHUTDOWN_DRAIN_TIMEOUT};

// Re-export errors
pub use errors::{JobError, Result, SyncError};

pub use diff::{ChangeSet, diff};
pub use extract::{Extracted, extract, extract_documents};
pub use job::{EntitySync, ReconcileJob, SourceBatch, SyncJob};
pub use rebuild::{REBUILD_BATCH_SIZE, rebuild};
pub use scheduler::{RunOutcome, Scheduler, SchedulerStats};
pub use writer::{ApplyError, Target, WriteSummary, apply, batch_size_for};
