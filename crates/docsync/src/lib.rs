//! docsync - keeps a MongoDB replica reconciled with a relational system of
//! record.
//!
//! Every entity type is synchronized by a periodic full-scan comparison:
//! the source table and the replica collection are read into keyed sets,
//! stale replica documents are deleted in bulk, and new or changed records
//! are upserted in volume-sized batches. Runs are driven by
//! [`sync::Scheduler`], which never lets two runs of the same entity type
//! overlap and starts dependent entity types after their prerequisites.
//!
//! # Features
//!
//! - `mysql` (default) - MySQL source driver
//! - `sqlite` - SQLite source driver, used by the integration tests
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docsync::{db, jobs, replica::MongoReplica, sync::Scheduler};
//!
//! let source = Arc::new(db::connect("mysql://app@localhost/app", Default::default()).await?);
//! let replica = Arc::new(MongoReplica::connect("mongodb://localhost", "release").await?);
//!
//! let mut scheduler = Scheduler::default();
//! for job in jobs::all(&[], &source, replica) {
//!     scheduler.register(job);
//! }
//! scheduler.run(tokio::signal::ctrl_c().map(|_| ())).await;
//! ```

pub mod db;
pub mod entity;
pub mod jobs;
pub mod replica;
pub mod sync;

pub use db::{PoolOptions, connect};
pub use replica::{MemoryReplica, MongoReplica, ReplicaError, ReplicaStore};
pub use sync::{EntityKind, JobError, Scheduler, SyncError, SyncReport};
