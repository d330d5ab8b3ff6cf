//! Connection pool setup, database bootstrap and migrations.

use anyhow::{Context, Result, bail};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/planwright-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables created by the migrations, in dependency order.
pub const TABLES: [&str; 3] = ["sessions", "checkpoints", "agent_outputs"];

/// SQLSTATE `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

fn connect_options(url: &str) -> Result<PgConnectOptions> {
    let options: PgConnectOptions = url
        .parse()
        .with_context(|| format!("invalid database URL {url}"))?;
    Ok(options.application_name(DbConfig::APPLICATION_NAME))
}

/// Open a pool sized by `config`. Connections are opened lazily beyond the
/// first, so an idle CLI command holds a single connection.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(0)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options(&config.database_url)?)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    debug!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

/// Apply pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!(known = MIGRATOR.iter().count(), "migrations applied");
    Ok(())
}

/// Reject names that cannot be used as a quoted identifier as-is.
fn check_database_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        bail!("database name {name:?} must be 1-63 ASCII letters, digits, '_' or '-'");
    }
    Ok(())
}

/// Create the target database when it is absent.
///
/// Connects to the `postgres` maintenance database on the same server. A
/// concurrent `planwright db-init` creating the same database is not an
/// error.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;
    check_database_name(db_name)?;

    let maintenance = connect_options(&config.database_url)?.database("postgres");
    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(maintenance)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {}", config.maintenance_url()))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if exists {
        info!(db = db_name, "database already exists");
    } else {
        // CREATE DATABASE takes no bind parameters; the name was checked above.
        let created = maint_pool
            .execute(format!("CREATE DATABASE \"{db_name}\"").as_str())
            .await;
        match created {
            Ok(_) => info!(db = db_name, "database created"),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                info!(db = db_name, "database created concurrently");
            }
            Err(e) => {
                maint_pool.close().await;
                return Err(e).with_context(|| format!("failed to create database {db_name}"));
            }
        }
    }

    maint_pool.close().await;
    Ok(())
}

/// Row count of each planwright table, for the `db-init` summary.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table.to_string(), count));
    }
    Ok(counts)
}
