//! # Lorebase CLI (`lore`)
//!
//! The `lore` binary drives the knowledge-base engine: database setup,
//! indexing cycles, and question answering.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore cycle` | Run one indexing cycle (scan, diff, chunk, embed, commit) |
//! | `lore watch` | Run indexing cycles on a schedule until interrupted |
//! | `lore ask "<question>"` | Answer a question from the knowledge base |
//! | `lore advise "<task text>"` | Suggest placement for a new task |
//! | `lore status` | Show index counts and watermarks |
//!
//! ## Examples
//!
//! ```bash
//! lore init --config ./lore.toml
//! lore cycle --config ./lore.toml
//! lore ask "how does retry backoff work" --config ./lore.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lorebase::answer::{self, HttpChatClient, SynthesisProfile};
use lorebase::embedder::HttpEmbeddingClient;
use lorebase::indexer::{Coordinator, CycleStatus};
use lorebase::{config, db, migrate, store};

/// Lorebase — an incremental knowledge base over a project's docs, code,
/// and live records.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "Lorebase — incremental knowledge-base indexing and question answering for a project",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./lore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Run one indexing cycle.
    Cycle {
        /// Scan and diff only; report what would be reindexed without
        /// writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run indexing cycles on a schedule until interrupted.
    Watch,

    /// Answer a question from the knowledge base.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Suggest where a new task belongs among existing work items.
    Advise {
        /// Free-text description of the task.
        task: String,
    },

    /// Show index counts and sync watermarks.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg.db.path).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Cycle { dry_run } => {
            migrate::run_migrations(&pool).await?;
            let coordinator = Coordinator::new(pool, cfg)?;
            if dry_run {
                let preview = coordinator.preview().await?;
                println!(
                    "Scanned {} units; {} would be reindexed:",
                    preview.scanned,
                    preview.changed.len()
                );
                for (source_type, source_ref) in preview.changed {
                    println!("  [{source_type}] {source_ref}");
                }
            } else {
                let report = coordinator.run_cycle().await?;
                match report.status {
                    CycleStatus::Idle => {
                        println!("No changes ({} units scanned).", report.scanned)
                    }
                    CycleStatus::Committed => println!(
                        "Committed {} sources ({} chunks, {} embedded, {} missing, {} failed).",
                        report.committed_sources,
                        report.chunks,
                        report.embedded,
                        report.missing,
                        report.failed_sources
                    ),
                    CycleStatus::SkippedGuard => println!(
                        "Commit skipped: {} of {} embeddings missing.",
                        report.missing, report.chunks
                    ),
                    CycleStatus::Impaired => {
                        println!("Indexing impaired: no embedding provider configured.")
                    }
                }
            }
        }
        Commands::Watch => {
            migrate::run_migrations(&pool).await?;
            let interval = cfg.indexer.interval_secs;
            let coordinator = Coordinator::new(pool, cfg)?;
            println!("Watching for changes every {interval}s. Ctrl-C to stop.");
            coordinator.run_loop().await?;
        }
        Commands::Ask { question } => {
            let chat = HttpChatClient::new(&cfg.chat)?;
            let embed = optional_embedder(&cfg)?;
            let profile = SynthesisProfile::ask(&cfg.chat);
            let text = answer::synthesize(
                &pool,
                &cfg,
                embed.as_ref().map(|c| c as &dyn lorebase::embedder::EmbeddingClient),
                &chat,
                &profile,
                &question,
            )
            .await;
            println!("{text}");
        }
        Commands::Advise { task } => {
            let chat = HttpChatClient::new(&cfg.chat)?;
            let embed = optional_embedder(&cfg)?;
            let profile = SynthesisProfile::advise(&cfg.chat);
            let text = answer::synthesize(
                &pool,
                &cfg,
                embed.as_ref().map(|c| c as &dyn lorebase::embedder::EmbeddingClient),
                &chat,
                &profile,
                &task,
            )
            .await;
            println!("{text}");
        }
        Commands::Status => {
            println!("Chunks:");
            for (source_type, count) in store::chunk_counts(&pool).await? {
                println!("  {source_type}: {count}");
            }
            println!("Vectors: {}", store::vector_count(&pool).await?);
            println!("Watermarks:");
            for (source_type, marker) in store::all_watermarks(&pool).await? {
                println!("  {source_type}: {marker}");
            }
        }
    }

    Ok(())
}

fn optional_embedder(cfg: &config::Config) -> anyhow::Result<Option<HttpEmbeddingClient>> {
    if cfg.embedding.is_enabled() {
        Ok(Some(HttpEmbeddingClient::new(&cfg.embedding)?))
    } else {
        Ok(None)
    }
}
