//! Per-entity sync jobs.
//!
//! Each module maps one source table onto its replica collection by
//! implementing [`EntitySync`]. [`all`] builds the full job set for the
//! scheduler and [`rebuild`] dispatches the operator rebuild command.

pub mod accounts;
pub mod budgets;
pub mod leads;
pub mod orders;

use std::sync::Arc;

use chrono::NaiveDateTime;
use mongodb::bson;
use sea_orm::DatabaseConnection;

use crate::replica::ReplicaStore;
use crate::sync::{EntityKind, EntitySync, JobError, ReconcileJob, SyncJob, SyncReport};

pub use accounts::Accounts;
pub use budgets::Budgets;
pub use leads::Leads;
pub use orders::Orders;

/// Build the reconciliation job for `kind`.
pub fn job(
    kind: EntityKind,
    db: &Arc<DatabaseConnection>,
    replica: Arc<dyn ReplicaStore>,
) -> Arc<dyn SyncJob> {
    fn boxed<E: EntitySync>(entity: E, replica: Arc<dyn ReplicaStore>) -> Arc<dyn SyncJob> {
        Arc::new(ReconcileJob::new(entity, replica))
    }

    match kind {
        EntityKind::Accounts => boxed(Accounts::new(Arc::clone(db)), replica),
        EntityKind::Leads => boxed(Leads::new(Arc::clone(db)), replica),
        EntityKind::Budgets => boxed(Budgets::new(Arc::clone(db)), replica),
        EntityKind::Orders => boxed(Orders::new(Arc::clone(db)), replica),
    }
}

/// Build jobs for `kinds`, or for every entity type when `kinds` is empty.
pub fn all(
    kinds: &[EntityKind],
    db: &Arc<DatabaseConnection>,
    replica: Arc<dyn ReplicaStore>,
) -> Vec<Arc<dyn SyncJob>> {
    let kinds = if kinds.is_empty() {
        &EntityKind::ALL[..]
    } else {
        kinds
    };
    kinds
        .iter()
        .map(|&kind| job(kind, db, replica.clone()))
        .collect()
}

/// Drop and rebuild the replica collection of `kind`.
pub async fn rebuild(
    kind: EntityKind,
    db: &Arc<DatabaseConnection>,
    replica: &dyn ReplicaStore,
) -> Result<SyncReport, JobError> {
    let db = Arc::clone(db);
    match kind {
        EntityKind::Accounts => crate::sync::rebuild(&Accounts::new(db), replica).await,
        EntityKind::Leads => crate::sync::rebuild(&Leads::new(db), replica).await,
        EntityKind::Budgets => crate::sync::rebuild(&Budgets::new(db), replica).await,
        EntityKind::Orders => crate::sync::rebuild(&Orders::new(db), replica).await,
    }
}

/// Convert a source `DATETIME` (stored as UTC) to a BSON date.
///
/// BSON dates carry milliseconds, so sub-millisecond precision is dropped
/// before comparison with the replica.
pub(crate) fn bson_date(value: Option<NaiveDateTime>) -> Option<bson::DateTime> {
    value.map(|dt| bson::DateTime::from_millis(dt.and_utc().timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;
    use crate::replica::MemoryReplica;

    #[test]
    fn test_bson_date_truncates_to_milliseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 15, 123_456)
            .unwrap();
        let converted = bson_date(Some(dt)).unwrap();
        assert_eq!(
            converted.timestamp_millis(),
            dt.and_utc().timestamp_millis()
        );
        assert_eq!(converted.timestamp_millis() % 1_000, 123);
        assert_eq!(bson_date(None), None);
    }

    #[test]
    fn test_all_builds_every_entity_by_default() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::MySql).into_connection());
        let replica: Arc<dyn ReplicaStore> = Arc::new(MemoryReplica::new());

        let kinds: Vec<EntityKind> = all(&[], &db, replica.clone())
            .iter()
            .map(|job| job.kind())
            .collect();
        assert_eq!(kinds, EntityKind::ALL.to_vec());

        let only = all(&[EntityKind::Orders], &db, replica);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].kind(), EntityKind::Orders);
    }

    #[test]
    fn test_jobs_share_one_source_pool() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::MySql).into_connection());
        let replica: Arc<dyn ReplicaStore> = Arc::new(MemoryReplica::new());

        let jobs = all(&[], &db, replica);
        assert_eq!(Arc::strong_count(&db), 1 + jobs.len());

        drop(jobs);
        assert_eq!(Arc::strong_count(&db), 1);
    }
}
