//! Reconciliation jobs.
//!
//! [`EntitySync`] is the capability an entity type injects into the core:
//! how to read its source records, how to key both sides, how to detect a
//! change and how to render the replica fields it owns. [`ReconcileJob`]
//! turns any `EntitySync` into a [`SyncJob`] the scheduler can run.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mongodb::bson::Document;
use serde::de::DeserializeOwned;

use crate::replica::ReplicaStore;

use super::diff::diff;
use super::errors::{JobError, Result, SyncError};
use super::extract::{extract, extract_documents};
use super::types::{EntityKind, NaturalKey, Phase, SyncReport};
use super::writer::{ApplyError, Target, apply};

/// Source records for one run plus the references that failed to resolve
/// while reading them.
#[derive(Debug)]
pub struct SourceBatch<R> {
    pub records: Vec<R>,
    pub unresolved_references: usize,
}

impl<R> SourceBatch<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records,
            unresolved_references: 0,
        }
    }
}

/// Entity-specific half of a reconciliation job.
#[async_trait]
pub trait EntitySync: Send + Sync + 'static {
    type Key: NaturalKey;
    /// A source record, already expressed in replica terms (references resolved).
    type Record: Send + Sync;
    /// The replica fields needed for keying and change detection.
    type Document: DeserializeOwned + Send + Sync;

    fn kind(&self) -> EntityKind;

    /// Read every record of this entity type from the source.
    ///
    /// Implementations that embed references build their
    /// [`ReferenceTable`](crate::replica::ReferenceTable)s here.
    async fn read_source(&self, replica: &dyn ReplicaStore) -> Result<SourceBatch<Self::Record>>;

    fn record_key(record: &Self::Record) -> Option<Self::Key>;

    fn document_key(document: &Self::Document) -> Option<Self::Key>;

    /// Whether `record` differs from what the replica holds.
    fn is_changed(record: &Self::Record, document: &Self::Document) -> bool;

    /// Fields to `$set` for `record`, including the key field.
    fn render(record: &Self::Record) -> Result<Document>;
}

/// A schedulable unit of work for one entity type.
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    fn kind(&self) -> EntityKind;

    async fn run(&self) -> std::result::Result<SyncReport, JobError>;
}

/// Full-scan reconciliation of one entity type against the replica.
pub struct ReconcileJob<E: EntitySync> {
    entity: E,
    replica: Arc<dyn ReplicaStore>,
}

impl<E: EntitySync> ReconcileJob<E> {
    pub fn new(entity: E, replica: Arc<dyn ReplicaStore>) -> Self {
        Self { entity, replica }
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }
}

#[async_trait]
impl<E: EntitySync> SyncJob for ReconcileJob<E> {
    fn kind(&self) -> EntityKind {
        self.entity.kind()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.entity.kind()))]
    async fn run(&self) -> std::result::Result<SyncReport, JobError> {
        let kind = self.entity.kind();
        let fail = |phase: Phase| move |error: SyncError| JobError::new(kind, phase, error);
        let collection = kind.collection();
        let start = Instant::now();

        // Source and replica are read concurrently and not synchronized with
        // each other; a record modified mid-scan is corrected next run.
        let (source, documents) = tokio::try_join!(
            self.entity.read_source(self.replica.as_ref()),
            async {
                self.replica
                    .scan(collection)
                    .await
                    .map_err(SyncError::from)
            },
        )
        .map_err(fail(Phase::Extract))?;

        let unresolved_references = source.unresolved_references;
        let source = extract(source.records, E::record_key);
        let replica = extract_documents(collection, documents, E::document_key)
            .map_err(fail(Phase::Extract))?;

        let mut report = SyncReport {
            source_records: source.len(),
            replica_records: replica.len(),
            skipped_source: source.skipped,
            skipped_replica: replica.skipped,
            unresolved_references,
            ..SyncReport::default()
        };

        let changes = diff(&source.set, &replica.set, E::is_changed);
        report.inserted = changes.inserted;
        report.updated = changes.updated;
        report.unchanged = changes.unchanged;
        report.deletion_suppressed = changes.deletion_suppressed;

        if changes.deletion_suppressed {
            tracing::warn!(
                entity = %kind,
                phase = %Phase::Diff,
                replica_records = report.replica_records,
                "Source returned no records; skipping deletions"
            );
        }

        if changes.is_empty() {
            tracing::debug!(
                entity = %kind,
                unchanged = report.unchanged,
                elapsed_ms = start.elapsed().as_millis(),
                "Replica already up to date"
            );
            return Ok(report);
        }

        let target = Target {
            collection,
            key_field: kind.key_field(),
        };
        let summary = apply(self.replica.as_ref(), target, &changes, &source.set, E::render)
            .await
            .map_err(|e| match e {
                ApplyError::Delete(error) => JobError::new(kind, Phase::Delete, error),
                ApplyError::Upsert(error) => JobError::new(kind, Phase::Upsert, error),
            })?;

        report.deleted = summary.deleted;
        report.batches = summary.batches;
        report.batch_size = summary.batch_size;

        tracing::debug!(
            entity = %kind,
            deleted = report.deleted,
            inserted = report.inserted,
            updated = report.updated,
            batches = report.batches,
            elapsed_ms = start.elapsed().as_millis(),
            "Reconciliation applied"
        );

        Ok(report)
    }
}
