//! Throwaway PostgreSQL databases for planwright integration tests.
//!
//! Each test gets a fresh, migrated database on a server shared by the
//! whole test binary. The server is `PLANWRIGHT_TEST_PG_URL` when set (a CI
//! service container), otherwise a testcontainers Postgres started on first
//! use.

use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use planwright_db::config::DbConfig;
use planwright_db::pool;

/// Env var naming an existing server (URL without a database name).
pub const PG_URL_ENV: &str = "PLANWRIGHT_TEST_PG_URL";

/// Prefix of every database created here, so leftovers are easy to spot.
pub const DB_PREFIX: &str = "planwright_test_";

/// Connections per test database; tests drive one or two sessions at once.
const TEST_POOL_SIZE: u32 = 4;

struct Server {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<Server> = OnceCell::const_new();

async fn start_server() -> Server {
    if let Ok(url) = std::env::var(PG_URL_ENV) {
        return Server {
            base_url: url.trim_end_matches('/').to_string(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");

    Server {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Base URL (no database name) of the shared server.
pub async fn pg_url() -> &'static str {
    &SERVER.get_or_init(start_server).await.base_url
}

fn test_db_config(base_url: &str, db_name: &str) -> DbConfig {
    DbConfig::new(format!("{base_url}/{db_name}")).with_max_connections(TEST_POOL_SIZE)
}

/// Create and migrate a database for one test.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] at the end
/// of the test.
pub async fn create_test_db() -> (PgPool, String) {
    let base_url = pg_url().await;
    let db_name = format!("{DB_PREFIX}{}", Uuid::new_v4().simple());
    let config = test_db_config(base_url, &db_name);

    pool::ensure_database_exists(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to create {db_name}: {e:#}"));
    let db_pool = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {db_name}: {e:#}"));
    pool::run_migrations(&db_pool)
        .await
        .unwrap_or_else(|e| panic!("failed to migrate {db_name}: {e:#}"));

    (db_pool, db_name)
}

/// Drop a test database, disconnecting anything still attached.
pub async fn drop_test_db(db_name: &str) {
    assert!(db_name.starts_with(DB_PREFIX), "refusing to drop {db_name}");
    let base_url = pg_url().await;
    let maintenance = test_db_config(base_url, "postgres").with_max_connections(1);
    let Ok(maint_pool) = pool::create_pool(&maintenance).await else {
        return;
    };
    // Cleanup is best effort; a leftover database does not fail the test.
    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)").as_str())
        .await;
    maint_pool.close().await;
}
