//! Configuration file management for planwright.
//!
//! Provides a TOML config file at `~/.config/planwright/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use planwright_core::OrchestratorConfig;
use planwright_db::config::DbConfig;

/// Env var overriding the per-agent timeout, in seconds.
pub const AGENT_TIMEOUT_ENV: &str = "PLANWRIGHT_AGENT_TIMEOUT_SECS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    /// Pool size; raise it for `planwright serve` with many concurrent jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_agents: Option<usize>,
    /// Root directory for the file checkpoint store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the planwright config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/planwright` or
/// `~/.config/planwright`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("planwright");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("planwright")
}

/// Return the path to the planwright config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default root of the file checkpoint store.
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("planwright"))
        .unwrap_or_else(|| PathBuf::from(".planwright"))
        .join("sessions")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PlanwrightConfig {
    pub db_config: DbConfig,
    pub orchestrator: OrchestratorConfig,
    pub state_dir: PathBuf,
}

impl PlanwrightConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `PLANWRIGHT_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Agent timeout: `cli_agent_timeout` > `PLANWRIGHT_AGENT_TIMEOUT_SECS` > `engine.agent_timeout_secs` > 120s
    pub fn resolve(cli_db_url: Option<&str>, cli_agent_timeout: Option<u64>) -> Result<Self> {
        Self::resolve_with(load_config().ok(), cli_db_url, cli_agent_timeout)
    }

    fn resolve_with(
        file_config: Option<ConfigFile>,
        cli_db_url: Option<&str>,
        cli_agent_timeout: Option<u64>,
    ) -> Result<Self> {
        // DB URL resolution.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let max_connections = file_config.as_ref().and_then(|cfg| cfg.database.max_connections);
        let engine = file_config.map(|cfg| cfg.engine).unwrap_or_default();
        let mut orchestrator = OrchestratorConfig::default();

        // Agent timeout resolution.
        let timeout_secs = if let Some(secs) = cli_agent_timeout {
            Some(secs)
        } else if let Ok(raw) = std::env::var(AGENT_TIMEOUT_ENV) {
            Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{AGENT_TIMEOUT_ENV} is not a number of seconds: {raw:?}"))?,
            )
        } else {
            engine.agent_timeout_secs
        };
        if let Some(secs) = timeout_secs {
            if secs == 0 {
                bail!("agent timeout must be at least one second");
            }
            orchestrator.agent_timeout = Duration::from_secs(secs);
        }

        if let Some(max) = engine.max_concurrent_agents {
            if max == 0 {
                bail!("engine.max_concurrent_agents must be at least 1");
            }
            orchestrator.max_concurrent_agents = max;
        }

        let mut db_config = DbConfig::new(db_url);
        if let Some(max) = max_connections {
            db_config = db_config.with_max_connections(max);
        }

        Ok(Self {
            db_config,
            orchestrator,
            state_dir: engine.state_dir.unwrap_or_else(default_state_dir),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
        unsafe { std::env::remove_var(AGENT_TIMEOUT_ENV) };
    }

    fn file(url: &str, engine: EngineSection) -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: url.to_string(),
                max_connections: None,
            },
            engine,
        }
    }

    #[test]
    fn config_file_roundtrips_through_toml() {
        let original = file(
            "postgresql://testhost:5432/testdb",
            EngineSection {
                agent_timeout_secs: Some(30),
                max_concurrent_agents: None,
                state_dir: Some(PathBuf::from("/var/lib/planwright")),
            },
        );
        let contents = toml::to_string_pretty(&original).unwrap();
        assert!(!contents.contains("max_concurrent_agents"));

        let loaded: ConfigFile = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.engine.agent_timeout_secs, Some(30));
        assert_eq!(loaded.engine.state_dir, original.engine.state_dir);
    }

    #[test]
    fn engine_section_is_optional() {
        let loaded: ConfigFile = toml::from_str("[database]\nurl = \"postgresql://h/db\"\n").unwrap();
        assert!(loaded.engine.agent_timeout_secs.is_none());
    }

    #[test]
    fn cli_flags_override_everything() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(AGENT_TIMEOUT_ENV, "45") };

        let config = PlanwrightConfig::resolve_with(
            Some(file("postgresql://file:5432/filedb", EngineSection::default())),
            Some("postgresql://cli:5432/clidb"),
            Some(5),
        )
        .unwrap();
        clear_env();

        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        assert_eq!(config.orchestrator.agent_timeout, Duration::from_secs(5));
    }

    #[test]
    fn env_overrides_config_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(AGENT_TIMEOUT_ENV, "45") };

        let config = PlanwrightConfig::resolve_with(
            Some(file(
                "postgresql://file:5432/filedb",
                EngineSection {
                    agent_timeout_secs: Some(10),
                    ..Default::default()
                },
            )),
            None,
            None,
        )
        .unwrap();
        clear_env();

        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.orchestrator.agent_timeout, Duration::from_secs(45));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let _lock = lock_env();
        clear_env();

        let config = PlanwrightConfig::resolve_with(
            Some(file(
                "postgresql://file:5432/filedb",
                EngineSection {
                    agent_timeout_secs: Some(10),
                    max_concurrent_agents: Some(2),
                    state_dir: Some(PathBuf::from("/tmp/pw")),
                },
            )),
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.db_config.database_url, "postgresql://file:5432/filedb");
        assert_eq!(config.orchestrator.agent_timeout, Duration::from_secs(10));
        assert_eq!(config.orchestrator.max_concurrent_agents, 2);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/pw"));
        assert_eq!(config.db_config.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn pool_size_comes_from_the_database_section() {
        let _lock = lock_env();
        clear_env();

        let mut cfg = file("postgresql://file:5432/filedb", EngineSection::default());
        cfg.database.max_connections = Some(32);
        let config = PlanwrightConfig::resolve_with(Some(cfg), Some("postgresql://cli:5432/clidb"), None)
            .unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        assert_eq!(config.db_config.max_connections, 32);
    }

    #[test]
    fn defaults_apply_when_nothing_set() {
        let _lock = lock_env();
        clear_env();

        let config = PlanwrightConfig::resolve_with(None, None, None).unwrap();
        let defaults = OrchestratorConfig::default();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.orchestrator.agent_timeout, defaults.agent_timeout);
        assert_eq!(config.orchestrator.max_concurrent_agents, defaults.max_concurrent_agents);
        assert_eq!(config.state_dir, default_state_dir());
    }

    #[test]
    fn malformed_timeout_env_is_an_error() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(AGENT_TIMEOUT_ENV, "soon") };

        let result = PlanwrightConfig::resolve_with(None, None, None);
        clear_env();

        let msg = result.unwrap_err().to_string();
        assert!(msg.contains(AGENT_TIMEOUT_ENV), "unexpected error: {msg}");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let _lock = lock_env();
        clear_env();
        assert!(PlanwrightConfig::resolve_with(None, None, Some(0)).is_err());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("planwright/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
