use console::style;
use docsync::{EntityKind, jobs};

use crate::commands::shared::{close_source, connect_stores, describe};
use crate::config::Settings;

/// Replace one collection with a full copy of its source table.
///
/// # Errors
/// Fails without touching anything unless `confirmed` is set.
pub(crate) async fn handle_rebuild(
    settings: &Settings,
    entity: EntityKind,
    confirmed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err(format!(
            "Rebuilding replaces the `{}` collection in `{}` and assigns new document ids; \
             re-run with --yes to confirm",
            entity.collection(),
            settings.database
        )
        .into());
    }

    let (db, replica) = connect_stores(settings).await?;
    println!(
        "Rebuilding {} into {}.{}...",
        entity,
        settings.database,
        entity.collection()
    );

    let result = jobs::rebuild(entity, &db, &*replica).await;
    close_source(db).await?;
    let report = result?;

    if report.deletion_suppressed {
        println!(
            "{} Source returned no records; {} left unchanged.",
            style("⚠").yellow(),
            entity.collection()
        );
    } else {
        println!("{} Rebuild complete: {}", style("✓").green(), describe(&report));
    }
    if entity != EntityKind::Orders {
        tracing::info!(
            "Collections referencing {} will pick up new ids on their next run",
            entity.collection()
        );
    }
    Ok(())
}
