//! docsync CLI - keeps the MongoDB replica in step with the relational source.

mod commands;
mod config;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use docsync::EntityKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docsync")]
#[command(version)]
#[command(about = "Replicate relational tables into MongoDB collections")]
#[command(
    long_about = "docsync reconciles the accounts, leads, budgets and orders tables of the \
relational source database into MongoDB collections. Each run diffs both sides and \
applies only the deletions, inserts and updates needed to make them match."
)]
#[command(after_long_help = r#"EXAMPLES
    Run the scheduler until interrupted:
        $ docsync run

    Sync budgets once, followed by the orders that reference them:
        $ docsync once -e budgets -e orders

    Replace the leads collection from a full source read:
        $ docsync rebuild leads --yes

    Generate shell completions:
        $ docsync completions bash > ~/.local/share/bash-completion/completions/docsync

CONFIGURATION
    docsync reads configuration from:
      1. ~/.config/docsync/config.toml (or $XDG_CONFIG_HOME/docsync/config.toml)
      2. ./docsync.toml
      3. Environment variables (DOCSYNC_* prefix, `__` between sections)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    MYSQL_URI                       Source database connection string
    MONGODB_URI                     MongoDB connection string
    ENV                             Replica database: release, homolog or development
    DOCSYNC_SCHEDULE__INTERVAL_SECS Seconds between scheduler ticks (default: 300)
    DOCSYNC_SCHEDULE__ENTITIES      Comma-separated entity types (default: all)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduled syncs until Ctrl+C
    Run,
    /// Run a single sync pass and exit
    Once {
        /// Entity type to sync - can be repeated (default: configured set)
        #[arg(short, long = "entity")]
        entities: Vec<EntityKind>,
    },
    /// Rebuild one collection from scratch
    ///
    /// Writes every source record into a staging collection, then swaps it in
    /// for the live one. Documents get new ids, so referencing collections are
    /// updated on their next run.
    Rebuild {
        /// Entity type to rebuild
        entity: EntityKind,

        /// Confirm replacing the live collection
        #[arg(long)]
        yes: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("docsync=info,docsync_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(Term::stdout().is_term())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle commands that don't need any connection first
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(());
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(());
        }
        _ => {}
    }

    // Load configuration (config file -> env vars -> defaults)
    let settings = config::Config::load().resolve()?;

    match cli.command {
        Commands::Run => commands::run::handle_run(&settings).await?,
        Commands::Once { entities } => commands::once::handle_once(&settings, &entities).await?,
        Commands::Rebuild { entity, yes } => {
            commands::rebuild::handle_rebuild(&settings, entity, yes).await?
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
