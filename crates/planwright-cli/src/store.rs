//! Checkpoint store selection shared by the session commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use sqlx::PgPool;

use planwright_core::agent::AgentPool;
use planwright_core::checkpoint::{CheckpointStore, FileCheckpointStore, PgCheckpointStore};
use planwright_core::Orchestrator;
use planwright_db::pool;

use crate::config::PlanwrightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// PostgreSQL (run `planwright db-init` first)
    Postgres,
    /// JSON files under the state directory
    File,
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Where sessions are checkpointed
    #[arg(long, value_enum, default_value_t = StoreKind::Postgres)]
    pub store: StoreKind,
    /// State directory for the file store (overrides engine.state_dir)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

/// An opened store plus the pool behind it, if any, for clean shutdown.
pub struct OpenStore {
    pub store: Arc<dyn CheckpointStore>,
    pool: Option<PgPool>,
}

impl OpenStore {
    pub async fn open(args: &StoreArgs, config: &PlanwrightConfig) -> Result<Self> {
        match args.store {
            StoreKind::Postgres => {
                let db_pool = pool::create_pool(&config.db_config).await?;
                Ok(Self {
                    store: Arc::new(PgCheckpointStore::new(db_pool.clone())),
                    pool: Some(db_pool),
                })
            }
            StoreKind::File => {
                let root = args.state_dir.clone().unwrap_or_else(|| config.state_dir.clone());
                tracing::debug!(root = %root.display(), "using file checkpoint store");
                Ok(Self {
                    store: Arc::new(FileCheckpointStore::new(root)),
                    pool: None,
                })
            }
        }
    }

    /// An orchestrator over this store with the built-in agent roster.
    pub fn orchestrator(&self, config: &PlanwrightConfig) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.store),
            AgentPool::standard(),
            config.orchestrator.clone(),
        )
    }

    pub async fn close(self) {
        if let Some(p) = self.pool {
            p.close().await;
        }
    }
}
