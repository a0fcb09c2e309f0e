use std::sync::Arc;

use console::{Term, style};
use docsync::sync::RunOutcome;
use docsync::{MongoReplica, SyncReport};
use sea_orm::DatabaseConnection;

use crate::config::Settings;

/// Connect to the source database and the replica.
///
/// The source pool connects lazily, so an unreachable source only surfaces
/// when the first job reads from it.
pub(crate) async fn connect_stores(
    settings: &Settings,
) -> Result<(Arc<DatabaseConnection>, Arc<MongoReplica>), Box<dyn std::error::Error>> {
    let db = docsync::connect(&settings.source_url, settings.pool).await?;
    let replica = MongoReplica::connect(&settings.replica_url, &settings.database).await?;
    tracing::info!(database = %settings.database, "Connected to stores");
    Ok((Arc::new(db), Arc::new(replica)))
}

/// Close the source pool once every job holding it has been dropped.
pub(crate) async fn close_source(db: Arc<DatabaseConnection>) -> Result<(), sea_orm::DbErr> {
    match Arc::try_unwrap(db) {
        Ok(db) => db.close().await,
        Err(_) => {
            tracing::debug!("Source pool still shared; leaving it to close on drop");
            Ok(())
        }
    }
}

/// One-line summary of a report's counters.
pub(crate) fn describe(report: &SyncReport) -> String {
    let mut line = format!(
        "{} inserted, {} updated, {} deleted, {} unchanged",
        report.inserted, report.updated, report.deleted, report.unchanged
    );
    if report.unresolved_references > 0 {
        line.push_str(&format!(
            ", {} unresolved references",
            report.unresolved_references
        ));
    }
    if report.deletion_suppressed {
        line.push_str(" (deletions skipped: source was empty)");
    }
    line
}

/// Print one outcome for an interactive terminal. Non-TTY runs rely on the
/// scheduler's log lines instead.
pub(crate) fn print_outcome(outcome: &RunOutcome) {
    if !Term::stdout().is_term() {
        return;
    }
    match &outcome.result {
        Ok(report) => println!(
            "{} {:<8} {} in {:.1?}",
            style("✓").green(),
            outcome.entity.as_str(),
            describe(report),
            outcome.elapsed
        ),
        Err(e) => println!(
            "{} {:<8} {}",
            style("✗").red(),
            outcome.entity.as_str(),
            e.error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_plain_report() {
        let report = SyncReport {
            inserted: 2,
            updated: 1,
            deleted: 3,
            unchanged: 7,
            ..Default::default()
        };
        assert_eq!(
            describe(&report),
            "2 inserted, 1 updated, 3 deleted, 7 unchanged"
        );
    }

    #[test]
    fn test_describe_flags_suppression_and_references() {
        let report = SyncReport {
            unresolved_references: 4,
            deletion_suppressed: true,
            ..Default::default()
        };
        let line = describe(&report);
        assert!(line.contains("4 unresolved references"));
        assert!(line.ends_with("(deletions skipped: source was empty)"));
    }
}
