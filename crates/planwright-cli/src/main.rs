mod config;
mod generate_cmd;
mod schedule_cmd;
mod serve_cmd;
mod status_cmd;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use planwright_core::model::TimelineRange;
use planwright_db::pool;

use config::PlanwrightConfig;
use store::{OpenStore, StoreArgs};
#[cfg(test)]
use store::StoreKind;

#[derive(Parser)]
#[command(name = "planwright", about = "Multi-agent program synthesis with critical-path scheduling")]
struct Cli {
    /// Database URL (overrides PLANWRIGHT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Per-agent timeout in seconds (overrides PLANWRIGHT_AGENT_TIMEOUT_SECS)
    #[arg(long, global = true)]
    agent_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a planwright config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/planwright")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the planwright database
    DbInit,
    /// Generate a program from a business context file
    Generate {
        /// Context file (.json or .toml) with `context` and optional `insights`
        context: PathBuf,
        /// User the session belongs to
        #[arg(long, default_value = "local")]
        user: String,
        /// Caller-supplied id; an unfinished session with the same id is continued
        #[arg(long)]
        correlation_id: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
        /// Write the program JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the program as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Continue an interrupted session from its last checkpoint
    Resume {
        /// Session ID to resume
        session_id: String,
        #[command(flatten)]
        store: StoreArgs,
        /// Write the program JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the program as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show session status (omit session_id to list sessions)
    Status {
        /// Session ID to show status for
        session_id: Option<String>,
        /// Only list sessions of this user
        #[arg(long)]
        user: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Schedule a workstream file with the critical-path scheduler
    Schedule {
        /// Workstream file (.json or .toml) with `workstreams` and optional `insights`
        file: PathBuf,
        /// Minimum timeline in months
        #[arg(long, requires = "max")]
        min: Option<u32>,
        /// Maximum timeline in months
        #[arg(long, requires = "min")]
        max: Option<u32>,
        /// Print the timeline as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the JSON job API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Execute the `planwright init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
            max_connections: None,
        },
        engine: config::EngineSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `planwright db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `planwright db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &PlanwrightConfig) -> anyhow::Result<()> {
    println!("Initializing planwright database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("planwright db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolve = || PlanwrightConfig::resolve(cli.database_url.as_deref(), cli.agent_timeout);

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(&resolve()?).await?;
        }
        Commands::Generate {
            context,
            user,
            correlation_id,
            store,
            output,
            json,
        } => {
            let resolved = resolve()?;
            let opened = OpenStore::open(&store, &resolved).await?;
            let orchestrator = Arc::new(opened.orchestrator(&resolved));
            let options = generate_cmd::GenerateOptions {
                context_path: &context,
                user_id: &user,
                correlation_id,
                output: output.as_deref(),
                json,
            };
            let result = generate_cmd::run_generate(orchestrator, options).await;
            opened.close().await;
            result?;
        }
        Commands::Resume {
            session_id,
            store,
            output,
            json,
        } => {
            let resolved = resolve()?;
            let opened = OpenStore::open(&store, &resolved).await?;
            let orchestrator = Arc::new(opened.orchestrator(&resolved));
            let result =
                generate_cmd::run_resume(orchestrator, &session_id, output.as_deref(), json).await;
            opened.close().await;
            result?;
        }
        Commands::Status {
            session_id,
            user,
            store,
        } => {
            let resolved = resolve()?;
            let opened = OpenStore::open(&store, &resolved).await?;
            let orchestrator = opened.orchestrator(&resolved);
            let result =
                status_cmd::run_status(&orchestrator, session_id.as_deref(), user.as_deref()).await;
            opened.close().await;
            result?;
        }
        Commands::Schedule {
            file,
            min,
            max,
            json,
        } => {
            let range = min.zip(max).map(|(min, max)| TimelineRange { min, max });
            schedule_cmd::run_schedule(&file, range, json)?;
        }
        Commands::Serve { bind, port, store } => {
            let resolved = resolve()?;
            let opened = OpenStore::open(&store, &resolved).await?;
            let orchestrator = Arc::new(opened.orchestrator(&resolved));
            let result = serve_cmd::run_serve(orchestrator, &bind, port).await;
            opened.close().await;
            result?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "planwright", &mut std::io::stdout());
        }
    }

    Ok(())
}
