use std::sync::Arc;

use docsync::sync::Scheduler;
use docsync::{ReplicaStore, jobs};

use crate::commands::shared::{close_source, connect_stores};
use crate::config::Settings;
use crate::shutdown;

/// Run the scheduler until Ctrl+C, then wait for in-flight runs.
pub(crate) async fn handle_run(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = shutdown::install();
    let (db, replica) = connect_stores(settings).await?;
    let store: Arc<dyn ReplicaStore> = replica;

    let mut scheduler = Scheduler::new(settings.interval, settings.run_timeout);
    for job in jobs::all(&settings.entities, &db, store) {
        scheduler.register(job);
    }

    let stats = scheduler.run(shutdown).await;
    if stats.aborted > 0 {
        tracing::warn!(aborted = stats.aborted, "Runs aborted at shutdown");
    }

    drop(scheduler);
    close_source(db).await?;
    Ok(())
}
