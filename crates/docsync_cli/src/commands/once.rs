use std::sync::Arc;

use docsync::sync::Scheduler;
use docsync::{EntityKind, ReplicaStore, jobs};

use crate::commands::shared::{close_source, connect_stores, print_outcome};
use crate::config::Settings;

/// Pick the entity set for a single pass: command-line selection first,
/// then the configured set, then everything.
fn selection<'a>(requested: &'a [EntityKind], settings: &'a Settings) -> Option<&'a [EntityKind]> {
    if !requested.is_empty() {
        Some(requested)
    } else if !settings.entities.is_empty() {
        Some(&settings.entities)
    } else {
        None
    }
}

/// Run one dependency-ordered pass and exit.
///
/// # Errors
/// Fails if the stores cannot be reached or any entity run failed.
pub(crate) async fn handle_once(
    settings: &Settings,
    requested: &[EntityKind],
) -> Result<(), Box<dyn std::error::Error>> {
    let (db, replica) = connect_stores(settings).await?;
    let store: Arc<dyn ReplicaStore> = replica;

    let mut scheduler = Scheduler::new(settings.interval, settings.run_timeout);
    for job in jobs::all(&[], &db, store) {
        scheduler.register(job);
    }

    let outcomes = scheduler.run_once(selection(requested, settings)).await;
    outcomes.iter().for_each(print_outcome);
    drop(scheduler);
    close_source(db).await?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.entity.as_str())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!("Sync failed for: {}", failed.join(", ")).into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use docsync::PoolOptions;

    use super::*;

    fn settings(entities: Vec<EntityKind>) -> Settings {
        Settings {
            source_url: "mysql://localhost/app".to_string(),
            pool: PoolOptions::default(),
            replica_url: "mongodb://localhost".to_string(),
            database: "development".to_string(),
            interval: Duration::from_secs(300),
            run_timeout: Duration::from_secs(20),
            entities,
        }
    }

    #[test]
    fn test_selection_prefers_command_line() {
        let configured = settings(vec![EntityKind::Leads]);
        assert_eq!(
            selection(&[EntityKind::Orders], &configured),
            Some(&[EntityKind::Orders][..])
        );
        assert_eq!(selection(&[], &configured), Some(&[EntityKind::Leads][..]));
        assert_eq!(selection(&[], &settings(Vec::new())), None);
    }
}
