use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::replica::ReplicaError;

use super::types::{EntityKind, Phase};

/// Errors that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source database error (connectivity, query or row decoding).
    #[error("Source error: {0}")]
    Source(#[from] DbErr),

    /// Replica store error.
    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// A replica document had a field of the wrong type.
    #[error("Decode error in {collection}: {message}")]
    Decode { collection: String, message: String },

    /// A source record could not be rendered as a replica document.
    #[error("Render error for key {key}: {message}")]
    Render { key: String, message: String },

    /// An upsert batch failed; earlier batches remain committed.
    #[error("Batch {batch} of {total} failed ({committed} committed): {source}")]
    Write {
        batch: usize,
        total: usize,
        committed: usize,
        #[source]
        source: ReplicaError,
    },

    /// The run exceeded its deadline.
    #[error("Run exceeded deadline of {}s", .0.as_secs())]
    Timeout(Duration),

    /// The task running the job panicked or was cancelled.
    #[error("Job task failed: {0}")]
    Panicked(String),
}

impl SyncError {
    /// Create a Decode error for a collection.
    pub fn decode(collection: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            collection: collection.into(),
            message: message.to_string(),
        }
    }

    /// Create a Render error for a record key.
    pub fn render(key: impl ToString, message: impl Into<String>) -> Self {
        Self::Render {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Whether the failure came from reaching one of the stores.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            SyncError::Source(DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
                | SyncError::Replica(ReplicaError::Mongo(_))
        )
    }
}

/// A failed job run with the entity and phase it failed in.
#[derive(Debug, Error)]
#[error("{entity} sync failed during {phase}: {error}")]
pub struct JobError {
    pub entity: EntityKind,
    pub phase: Phase,
    #[source]
    pub error: SyncError,
}

impl JobError {
    pub fn new(entity: EntityKind, phase: Phase, error: impl Into<SyncError>) -> Self {
        Self {
            entity,
            phase,
            error: error.into(),
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_carries_entity_and_phase() {
        let err = JobError::new(
            EntityKind::Leads,
            Phase::Upsert,
            SyncError::Timeout(Duration::from_secs(20)),
        );
        let msg = err.to_string();
        assert!(msg.contains("leads"));
        assert!(msg.contains("upsert"));
        assert!(msg.contains("20s"));
    }

    #[test]
    fn test_write_error_reports_committed_batches() {
        let err = SyncError::Write {
            batch: 3,
            total: 5,
            committed: 2,
            source: ReplicaError::rejected("leads", "boom"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Batch 3 of 5"));
        assert!(msg.contains("2 committed"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_connectivity_classification() {
        let conn = SyncError::Source(DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "refused".to_string(),
        )));
        assert!(conn.is_connectivity());

        let decode = SyncError::decode("users", "expected i64");
        assert!(!decode.is_connectivity());
        assert!(decode.to_string().contains("users"));
    }
}
