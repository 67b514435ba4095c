//! Lamad Engine maintenance tool
//!
//! Operates on the SQLite record store used by the engine.
//!
//! ## Usage
//!
//! ```bash
//! # Create the store and a default config
//! lamad-engine init
//!
//! # Record counts per kind
//! lamad-engine --storage-dir /data/lamad stats
//!
//! # Re-derive one learner's completion for a course
//! lamad-engine recompute --learner u1 --course <course-id>
//!
//! # Repair upvote counters of a discussion and its replies
//! lamad-engine reconcile-votes --discussion <discussion-id>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lamad_engine::db::models::VoteTarget;
use lamad_engine::services::events::spawn_logging_listener;
use lamad_engine::{EngineConfig, Services, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lamad-engine")]
#[command(about = "Progress and discussion engine maintenance")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "LAMAD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the record store and write a default config
    Init,
    /// Print record counts per kind
    Stats,
    /// Recompute a learner's enrollment for a course
    Recompute {
        #[arg(long)]
        learner: String,
        #[arg(long)]
        course: String,
    },
    /// Recount upvotes of a discussion and all of its replies
    ReconcileVotes {
        #[arg(long)]
        discussion: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lamad_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    let store = Arc::new(SqliteStore::open(&config.database_path())?);

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            info!(db = %config.database_path().display(), "Record store ready");
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Recompute { learner, course } => {
            let services = Services::new(store, config);
            let listener = spawn_logging_listener(services.events.clone());

            let enrollment = services.enrollments.recompute_progress(&learner, &course)?;
            println!("{}", serde_json::to_string_pretty(&enrollment)?);

            listener.abort();
        }
        Command::ReconcileVotes { discussion } => {
            let services = Services::new(store, config);

            let count = services
                .votes
                .reconcile_count(VoteTarget::Discussion, &discussion)?;
            println!("discussion {}: {}", discussion, count);

            for reply in services.threads.replies(&discussion)? {
                let count = services.votes.reconcile_count(VoteTarget::Reply, &reply.id)?;
                println!("reply {}: {}", reply.id, count);
            }
        }
    }

    Ok(())
}
