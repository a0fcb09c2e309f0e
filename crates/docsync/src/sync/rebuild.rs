//! Drop-and-rebuild of a whole collection.
//!
//! Writes every valid source record into `<collection>_temp` and then swaps
//! it over the live collection. Every document gets a fresh `_id`, so
//! references held by other collections are re-resolved on their next run.
//! Operator-invoked only; the scheduler always uses the incremental path.

use std::time::Instant;

use crate::replica::ReplicaStore;

use super::errors::{JobError, SyncError};
use super::extract::extract;
use super::job::EntitySync;
use super::types::{Phase, SyncReport};
use super::writer::render_batch;

/// Fixed batch size for rebuild writes.
pub const REBUILD_BATCH_SIZE: usize = 500;

/// Name of the staging collection used while rebuilding `collection`.
pub fn staging_collection(collection: &str) -> String {
    format!("{collection}_temp")
}

/// Rebuild the replica collection of `entity` from scratch.
///
/// An empty source leaves the live collection untouched and reports
/// `deletion_suppressed`.
pub async fn rebuild<E: EntitySync>(
    entity: &E,
    replica: &dyn ReplicaStore,
) -> Result<SyncReport, JobError> {
    let kind = entity.kind();
    let collection = kind.collection();
    let key_field = kind.key_field();
    let staging = staging_collection(collection);
    let fail = |phase: Phase| move |error: SyncError| JobError::new(kind, phase, error);
    let start = Instant::now();

    let source = entity
        .read_source(replica)
        .await
        .map_err(fail(Phase::Extract))?;
    let unresolved_references = source.unresolved_references;
    let source = extract(source.records, E::record_key);

    let mut report = SyncReport {
        source_records: source.len(),
        skipped_source: source.skipped,
        unresolved_references,
        ..SyncReport::default()
    };

    if source.is_empty() {
        report.deletion_suppressed = true;
        tracing::warn!(
            entity = %kind,
            phase = %Phase::Rebuild,
            "Source returned no records; refusing to rebuild"
        );
        return Ok(report);
    }

    replica
        .clear(&staging)
        .await
        .map_err(|e| JobError::new(kind, Phase::Rebuild, e))?;

    let keys: Vec<E::Key> = source.set.keys().cloned().collect();
    let total = keys.len().div_ceil(REBUILD_BATCH_SIZE);
    report.batch_size = REBUILD_BATCH_SIZE;

    for (index, chunk) in keys.chunks(REBUILD_BATCH_SIZE).enumerate() {
        let batch = render_batch(chunk, &source.set, &E::render).map_err(fail(Phase::Rebuild))?;
        let outcome = replica
            .upsert_many(&staging, key_field, batch)
            .await
            .map_err(|e| {
                JobError::new(
                    kind,
                    Phase::Rebuild,
                    SyncError::Write {
                        batch: index + 1,
                        total,
                        committed: report.batches,
                        source: e,
                    },
                )
            })?;
        report.inserted += usize::try_from(outcome.upserted).unwrap_or(usize::MAX);
        report.batches += 1;
        tracing::debug!(
            collection = %staging,
            batch = index + 1,
            total,
            size = chunk.len(),
            "Persisted rebuild batch"
        );
    }

    replica
        .replace_collection(&staging, collection)
        .await
        .map_err(|e| JobError::new(kind, Phase::Rebuild, e))?;

    tracing::info!(
        entity = %kind,
        documents = report.inserted,
        batches = report.batches,
        elapsed_ms = start.elapsed().as_millis(),
        "Rebuilt collection"
    );
    Ok(report)
}
