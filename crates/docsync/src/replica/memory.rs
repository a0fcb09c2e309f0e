//! In-process replica store.
//!
//! Mirrors the MongoDB semantics the sync core relies on (`$set` upserts keyed
//! by a field, `$in` deletes, generated `_id`s) and records every write call
//! so callers can assert on batching and ordering.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};

use super::errors::{ReplicaError, Result};
use super::{ReplicaStore, Upsert, UpsertOutcome};

/// A write call recorded by [`MemoryReplica`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Delete { collection: String, keys: usize },
    Upsert { collection: String, size: usize },
    Clear { collection: String },
    Replace { staging: String, target: String },
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    calls: Vec<WriteCall>,
    upserts_accepted: usize,
    fail_upserts_after: Option<usize>,
    fail_scans: bool,
}

/// Replica store holding collections in memory.
#[derive(Debug, Default)]
pub struct MemoryReplica {
    state: Mutex<State>,
}

impl MemoryReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of a collection.
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        let mut state = self.lock();
        let documents = documents
            .into_iter()
            .map(|mut doc| {
                if !doc.contains_key("_id") {
                    doc.insert("_id", ObjectId::new());
                }
                doc
            })
            .collect();
        state.collections.insert(collection.to_string(), documents);
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Find a document by key field value.
    pub fn find(&self, collection: &str, key_field: &str, key: &Bson) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)?
            .iter()
            .find(|doc| doc.get(key_field).is_some_and(|v| same_key(v, key)))
            .cloned()
    }

    /// Write calls issued so far, in order.
    pub fn calls(&self) -> Vec<WriteCall> {
        self.lock().calls.clone()
    }

    /// Forget the recorded write calls.
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Reject every upsert call after `accepted` successful ones.
    pub fn fail_upserts_after(&self, accepted: usize) {
        let mut state = self.lock();
        state.upserts_accepted = 0;
        state.fail_upserts_after = Some(accepted);
    }

    /// Make every scan fail, as if the server were unreachable.
    pub fn fail_scans(&self, fail: bool) {
        self.lock().fail_scans = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ReplicaStore for MemoryReplica {
    async fn scan(&self, collection: &str) -> Result<Vec<Document>> {
        let state = self.lock();
        if state.fail_scans {
            return Err(ReplicaError::rejected(collection, "replica unreachable"));
        }
        Ok(state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_many(
        &self,
        collection: &str,
        key_field: &str,
        keys: Vec<Bson>,
    ) -> Result<u64> {
        let mut state = self.lock();
        state.calls.push(WriteCall::Delete {
            collection: collection.to_string(),
            keys: keys.len(),
        });

        let Some(documents) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|doc| match doc.get(key_field) {
            Some(value) => !keys.iter().any(|key| same_key(value, key)),
            None => true,
        });
        Ok((before - documents.len()) as u64)
    }

    async fn upsert_many(
        &self,
        collection: &str,
        key_field: &str,
        batch: Vec<Upsert>,
    ) -> Result<UpsertOutcome> {
        let mut state = self.lock();
        if let Some(limit) = state.fail_upserts_after
            && state.upserts_accepted >= limit
        {
            return Err(ReplicaError::rejected(collection, "bulk write rejected"));
        }
        state.upserts_accepted += 1;
        state.calls.push(WriteCall::Upsert {
            collection: collection.to_string(),
            size: batch.len(),
        });

        let documents = state.collections.entry(collection.to_string()).or_default();
        let mut outcome = UpsertOutcome::default();

        for Upsert { key, fields } in batch {
            match documents
                .iter()
                .position(|doc| doc.get(key_field).is_some_and(|v| same_key(v, &key)))
            {
                Some(index) => {
                    let existing = &mut documents[index];
                    outcome.matched += 1;
                    let mut modified = false;
                    for (name, value) in fields {
                        if existing.get(&name) != Some(&value) {
                            existing.insert(name, value);
                            modified = true;
                        }
                    }
                    if modified {
                        outcome.modified += 1;
                    }
                }
                None => {
                    let mut doc = Document::new();
                    doc.insert("_id", ObjectId::new());
                    doc.insert(key_field, key);
                    for (name, value) in fields {
                        doc.insert(name, value);
                    }
                    documents.push(doc);
                    outcome.upserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let mut state = self.lock();
        state.calls.push(WriteCall::Clear {
            collection: collection.to_string(),
        });
        let removed = state
            .collections
            .get_mut(collection)
            .map(|documents| std::mem::take(documents).len())
            .unwrap_or(0);
        Ok(removed as u64)
    }

    async fn replace_collection(&self, staging: &str, target: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(WriteCall::Replace {
            staging: staging.to_string(),
            target: target.to_string(),
        });
        let documents = state
            .collections
            .remove(staging)
            .ok_or_else(|| ReplicaError::rejected(staging, "source namespace does not exist"))?;
        state.collections.insert(target.to_string(), documents);
        Ok(())
    }
}

/// Key equality as a MongoDB filter sees it: integer widths compare by value.
fn same_key(stored: &Bson, key: &Bson) -> bool {
    match (stored, key) {
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => i64::from(*a) == *b,
        _ => stored == key,
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;

    use super::*;

    fn upsert(key: i64, name: &str) -> Upsert {
        Upsert {
            key: Bson::Int64(key),
            fields: doc! { "name": name },
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_sets_fields() {
        let replica = MemoryReplica::new();

        let first = replica
            .upsert_many("users", "old_id", vec![upsert(1, "Ana")])
            .await
            .expect("upsert should succeed");
        assert_eq!(first.upserted, 1);

        let second = replica
            .upsert_many("users", "old_id", vec![upsert(1, "Ana Maria")])
            .await
            .expect("upsert should succeed");
        assert_eq!(second.matched, 1);
        assert_eq!(second.modified, 1);

        let stored = replica
            .find("users", "old_id", &Bson::Int64(1))
            .expect("document should exist");
        assert_eq!(stored.get_str("name").unwrap(), "Ana Maria");
        assert!(stored.get_object_id("_id").is_ok());
        assert_eq!(replica.documents("users").len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_fields_it_does_not_own() {
        let replica = MemoryReplica::new();
        replica.seed(
            "users",
            vec![doc! { "old_id": 1_i64, "name": "Ana", "avatar": "a.png" }],
        );

        replica
            .upsert_many("users", "old_id", vec![upsert(1, "Bia")])
            .await
            .unwrap();

        let stored = replica.find("users", "old_id", &Bson::Int64(1)).unwrap();
        assert_eq!(stored.get_str("avatar").unwrap(), "a.png");
        assert_eq!(stored.get_str("name").unwrap(), "Bia");
    }

    #[tokio::test]
    async fn test_delete_many_removes_only_listed_keys() {
        let replica = MemoryReplica::new();
        replica.seed(
            "users",
            vec![
                doc! { "old_id": 1_i64 },
                doc! { "old_id": 2_i64 },
                doc! { "other": true },
            ],
        );

        let removed = replica
            .delete_many("users", "old_id", vec![Bson::Int64(2), Bson::Int64(9)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(replica.documents("users").len(), 2);
    }

    #[tokio::test]
    async fn test_fail_upserts_after_rejects_later_batches() {
        let replica = MemoryReplica::new();
        replica.fail_upserts_after(1);

        assert!(
            replica
                .upsert_many("users", "old_id", vec![upsert(1, "a")])
                .await
                .is_ok()
        );
        assert!(
            replica
                .upsert_many("users", "old_id", vec![upsert(2, "b")])
                .await
                .is_err()
        );
        assert_eq!(replica.documents("users").len(), 1);
    }

    #[tokio::test]
    async fn test_replace_collection_moves_staging_over_target() {
        let replica = MemoryReplica::new();
        replica.seed("users", vec![doc! { "old_id": 1_i64 }]);
        replica.seed("users_temp", vec![doc! { "old_id": 2_i64 }, doc! { "old_id": 3_i64 }]);

        replica
            .replace_collection("users_temp", "users")
            .await
            .unwrap();

        assert_eq!(replica.documents("users").len(), 2);
        assert!(replica.documents("users_temp").is_empty());
        assert!(
            replica
                .replace_collection("users_temp", "users")
                .await
                .is_err()
        );
    }

    #[test]
    fn test_keys_match_across_integer_widths() {
        assert!(same_key(&Bson::Int32(4), &Bson::Int64(4)));
        assert!(same_key(&Bson::Int64(4), &Bson::Int32(4)));
        assert!(!same_key(&Bson::Int32(4), &Bson::String("4".to_string())));
    }

    #[tokio::test]
    async fn test_scan_failure_is_reported() {
        let replica = MemoryReplica::new();
        replica.fail_scans(true);
        let err = replica.scan("users").await.expect_err("scan should fail");
        assert!(err.to_string().contains("unreachable"));
    }
}
