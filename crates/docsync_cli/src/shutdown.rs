use std::future::Future;
use std::sync::Arc;

use console::Term;
use tokio::sync::Notify;

/// Install the Ctrl+C handler and return a future that resolves on the first
/// interrupt.
///
/// A second Ctrl+C exits immediately with status 130.
pub(crate) fn install() -> impl Future<Output = ()> {
    let requested = Arc::new(Notify::new());
    let trigger = requested.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, waiting for running syncs to finish...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, waiting for running syncs to finish");
        }

        // Stores a permit if the scheduler is not polling yet.
        trigger.notify_one();

        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });

    async move { requested.notified().await }
}
