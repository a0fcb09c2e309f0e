//! Replica store abstraction.
//!
//! The reconciliation core only issues four generic operations against the
//! replica: full collection scan, bulk delete by key set, bulk upsert by key,
//! and (for the rebuild mode) collection replacement. [`MongoReplica`] is the
//! production store; [`MemoryReplica`] keeps collections in process.

mod errors;
mod memory;
mod mongo;
mod reference;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

pub use errors::{ReplicaError, Result};
pub use memory::{MemoryReplica, WriteCall};
pub use mongo::MongoReplica;
pub use reference::ReferenceTable;

/// A single "find by natural key, set fields, insert if absent" operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    /// Natural key value matched against the key field.
    pub key: Bson,
    /// Fields to `$set`; fields not listed are left untouched.
    pub fields: Document,
}

/// Counts reported by a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Existing documents matched by key.
    pub matched: u64,
    /// Matched documents whose content changed.
    pub modified: u64,
    /// Documents created because no match existed.
    pub upserted: u64,
}

impl UpsertOutcome {
    pub fn merge(&mut self, other: UpsertOutcome) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
    }
}

/// Operations the sync core needs from the document store.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Read every document in a collection.
    async fn scan(&self, collection: &str) -> Result<Vec<Document>>;

    /// Delete every document whose `key_field` is in `keys`.
    ///
    /// Returns the number of documents removed.
    async fn delete_many(&self, collection: &str, key_field: &str, keys: Vec<Bson>)
    -> Result<u64>;

    /// Upsert a batch of documents by `key_field`.
    async fn upsert_many(
        &self,
        collection: &str,
        key_field: &str,
        batch: Vec<Upsert>,
    ) -> Result<UpsertOutcome>;

    /// Remove every document from a collection.
    async fn clear(&self, collection: &str) -> Result<u64>;

    /// Replace `target` with the contents of `staging`, removing `staging`.
    async fn replace_collection(&self, staging: &str, target: &str) -> Result<()>;
}
