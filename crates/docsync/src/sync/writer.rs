//! Batch upsert writer.
//!
//! Applies a [`ChangeSet`] to the replica: one bulk delete of every stale key,
//! then the new and changed records in volume-sized upsert batches.

use mongodb::bson::{Bson, Document};

use crate::replica::{ReplicaStore, Upsert, UpsertOutcome};

use super::diff::ChangeSet;
use super::errors::{Result, SyncError};
use super::types::{KeyedSet, NaturalKey};

/// Batch size for runs with at most [`MEDIUM_VOLUME_THRESHOLD`] pending writes.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Batch size once pending writes exceed [`MEDIUM_VOLUME_THRESHOLD`].
pub const MEDIUM_BATCH_SIZE: usize = 200;

/// Batch size once pending writes exceed [`HIGH_VOLUME_THRESHOLD`].
pub const LARGE_BATCH_SIZE: usize = 500;

pub const MEDIUM_VOLUME_THRESHOLD: usize = 1_000;
pub const HIGH_VOLUME_THRESHOLD: usize = 5_000;

/// Pick the upsert batch size for `pending` writes.
pub fn batch_size_for(pending: usize) -> usize {
    if pending > HIGH_VOLUME_THRESHOLD {
        LARGE_BATCH_SIZE
    } else if pending > MEDIUM_VOLUME_THRESHOLD {
        MEDIUM_BATCH_SIZE
    } else {
        DEFAULT_BATCH_SIZE
    }
}

/// Collection and key field a change set is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub collection: &'a str,
    pub key_field: &'a str,
}

/// What [`apply`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub deleted: u64,
    pub batches: usize,
    pub batch_size: usize,
    pub outcome: UpsertOutcome,
}

/// Where a failed [`apply`] stopped.
#[derive(Debug)]
pub enum ApplyError {
    /// The bulk delete failed; nothing was written.
    Delete(SyncError),
    /// An upsert batch failed after the delete (and possibly earlier batches)
    /// committed.
    Upsert(SyncError),
}

impl ApplyError {
    pub fn into_inner(self) -> SyncError {
        match self {
            ApplyError::Delete(e) | ApplyError::Upsert(e) => e,
        }
    }
}

/// Apply `changes` to the replica.
///
/// `render` turns a source record into the fields the replica owns. Batches
/// follow `changes.to_upsert` order and the trailing partial batch is always
/// flushed. A failed batch stops the run; committed batches are not rolled
/// back.
pub async fn apply<K, S, F>(
    replica: &dyn ReplicaStore,
    target: Target<'_>,
    changes: &ChangeSet<K>,
    records: &KeyedSet<K, S>,
    render: F,
) -> std::result::Result<WriteSummary, ApplyError>
where
    K: NaturalKey,
    F: Fn(&S) -> Result<Document>,
{
    let mut summary = WriteSummary::default();

    if !changes.to_delete.is_empty() {
        let keys: Vec<Bson> = changes.to_delete.iter().map(|k| k.to_bson()).collect();
        summary.deleted = replica
            .delete_many(target.collection, target.key_field, keys)
            .await
            .map_err(|e| ApplyError::Delete(e.into()))?;
        tracing::debug!(
            collection = target.collection,
            requested = changes.to_delete.len(),
            deleted = summary.deleted,
            "Deleted stale documents"
        );
    }

    if changes.to_upsert.is_empty() {
        return Ok(summary);
    }

    let batch_size = batch_size_for(changes.to_upsert.len());
    let total = changes.to_upsert.len().div_ceil(batch_size);
    summary.batch_size = batch_size;

    for (index, keys) in changes.to_upsert.chunks(batch_size).enumerate() {
        let batch = render_batch(keys, records, &render).map_err(ApplyError::Upsert)?;
        let is_final = index + 1 == total;

        let flush_start = std::time::Instant::now();
        match replica
            .upsert_many(target.collection, target.key_field, batch)
            .await
        {
            Ok(outcome) => {
                tracing::debug!(
                    collection = target.collection,
                    batch = index + 1,
                    total,
                    size = keys.len(),
                    final_batch = is_final,
                    elapsed_ms = flush_start.elapsed().as_millis(),
                    "Persisted batch"
                );
                summary.outcome.merge(outcome);
                summary.batches += 1;
            }
            Err(e) => {
                tracing::warn!(
                    collection = target.collection,
                    batch = index + 1,
                    total,
                    committed = summary.batches,
                    error = %e,
                    "Failed to persist batch"
                );
                return Err(ApplyError::Upsert(SyncError::Write {
                    batch: index + 1,
                    total,
                    committed: summary.batches,
                    source: e,
                }));
            }
        }
    }

    Ok(summary)
}

pub(super) fn render_batch<K, S, F>(keys: &[K], records: &KeyedSet<K, S>, render: &F) -> Result<Vec<Upsert>>
where
    K: NaturalKey,
    F: Fn(&S) -> Result<Document>,
{
    keys.iter()
        .map(|key| {
            let record = records
                .get(key)
                .ok_or_else(|| SyncError::render(key, "key has no source record"))?;
            Ok(Upsert {
                key: key.to_bson(),
                fields: render(record)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use mongodb::bson::doc;

    use super::*;
    use crate::replica::{MemoryReplica, WriteCall};
    use crate::sync::diff::diff;

    const TARGET: Target<'static> = Target {
        collection: "users",
        key_field: "old_id",
    };

    fn render_name(name: &String) -> Result<Document> {
        Ok(doc! { "name": name.as_str() })
    }

    fn records(count: i64) -> KeyedSet<i64, String> {
        (1..=count).map(|k| (k, format!("user-{k}"))).collect()
    }

    fn insert_all(keys: impl IntoIterator<Item = i64>) -> ChangeSet<i64> {
        let to_upsert: Vec<i64> = keys.into_iter().collect();
        ChangeSet {
            inserted: to_upsert.len(),
            to_upsert,
            ..ChangeSet::default()
        }
    }

    fn upsert_sizes(replica: &MemoryReplica) -> Vec<usize> {
        replica
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                WriteCall::Upsert { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_batch_size_boundaries() {
        assert_eq!(batch_size_for(0), 50);
        assert_eq!(batch_size_for(1_000), 50);
        assert_eq!(batch_size_for(1_001), 200);
        assert_eq!(batch_size_for(5_000), 200);
        assert_eq!(batch_size_for(5_001), 500);
        assert_eq!(batch_size_for(100_000), 500);
    }

    #[tokio::test]
    async fn test_apply_flushes_trailing_partial_batch() {
        let replica = MemoryReplica::new();
        let records = records(120);
        let changes = insert_all(1..=120);

        let summary = apply(&replica, TARGET, &changes, &records, render_name)
            .await
            .expect("apply should succeed");

        assert_eq!(summary.batch_size, 50);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.outcome.upserted, 120);
        assert_eq!(upsert_sizes(&replica), vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn test_apply_uses_medium_batches_above_one_thousand() {
        let replica = MemoryReplica::new();
        let records = records(1_001);
        let changes = insert_all(1..=1_001);

        let summary = apply(&replica, TARGET, &changes, &records, render_name)
            .await
            .unwrap();

        assert_eq!(summary.batch_size, 200);
        assert_eq!(upsert_sizes(&replica), vec![200, 200, 200, 200, 200, 1]);
    }

    #[tokio::test]
    async fn test_apply_deletes_before_any_upsert() {
        let replica = MemoryReplica::new();
        replica.seed(
            "users",
            vec![doc! { "old_id": 2_i64, "name": "old" }, doc! { "old_id": 4_i64 }],
        );
        let source = records(3);
        let existing: KeyedSet<i64, String> =
            [(2, "old".to_string()), (4, String::new())].into_iter().collect();
        let changes = diff(&source, &existing, |s, r| s != r);

        let summary = apply(&replica, TARGET, &changes, &source, render_name)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 1);
        let calls = replica.calls();
        assert!(matches!(calls.first(), Some(WriteCall::Delete { keys: 1, .. })));
        assert!(calls[1..].iter().all(|c| matches!(c, WriteCall::Upsert { .. })));

        let keys: BTreeSet<i64> = replica
            .documents("users")
            .iter()
            .filter_map(|d| d.get_i64("old_id").ok())
            .collect();
        assert_eq!(keys, BTreeSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_apply_stops_at_failed_batch_and_keeps_committed_ones() {
        let replica = MemoryReplica::new();
        replica.fail_upserts_after(2);
        let records = records(150);
        let changes = insert_all(1..=150);

        let err = apply(&replica, TARGET, &changes, &records, render_name)
            .await
            .expect_err("third batch should fail");

        match err.into_inner() {
            SyncError::Write {
                batch,
                total,
                committed,
                ..
            } => {
                assert_eq!(batch, 3);
                assert_eq!(total, 3);
                assert_eq!(committed, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(replica.documents("users").len(), 100);
    }

    #[tokio::test]
    async fn test_apply_with_empty_change_set_writes_nothing() {
        let replica = MemoryReplica::new();
        let summary = apply(&replica, TARGET, &ChangeSet::default(), &records(3), render_name)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary::default());
        assert!(replica.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_surfaces_render_errors() {
        let replica = MemoryReplica::new();
        let changes = insert_all([1, 2]);
        let err = apply(&replica, TARGET, &changes, &records(2), |_: &String| {
            Err(SyncError::render(1, "bad field"))
        })
        .await
        .expect_err("render failure should abort");
        assert!(matches!(err, ApplyError::Upsert(SyncError::Render { .. })));
        assert!(replica.calls().is_empty());
    }
}
