use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaieError, Result};

pub const ENV_DSN: &str = "PAYROLL_DSN";
pub const ENV_STATEMENT_TIMEOUT: &str = "PG_STATEMENT_TIMEOUT_MS";
pub const ENV_LOCK_TIMEOUT: &str = "PG_LOCK_TIMEOUT_MS";
pub const ENV_IDLE_TIMEOUT: &str = "PG_IDLE_IN_TX_TIMEOUT_MS";
pub const ENV_POOL_SIZE: &str = "PAYROLL_POOL_SIZE";
pub const ENV_ALLOW_REIMPORT: &str = "PAYROLL_ALLOW_REIMPORT";
pub const ENV_APP_ENV: &str = "APP_ENV";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: String,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_in_tx_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub allow_reimport: bool,
    #[serde(default = "default_app_env")]
    pub app_env: String,
}

fn default_statement_timeout() -> u64 {
    8000
}

fn default_lock_timeout() -> u64 {
    2000
}

fn default_idle_timeout() -> u64 {
    5000
}

fn default_pool_size() -> usize {
    4
}

fn default_app_env() -> String {
    "development".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database().to_string_lossy().to_string(),
            statement_timeout_ms: default_statement_timeout(),
            lock_timeout_ms: default_lock_timeout(),
            idle_in_tx_timeout_ms: default_idle_timeout(),
            pool_size: default_pool_size(),
            allow_reimport: false,
            app_env: default_app_env(),
        }
    }
}

/// Session limits applied to every pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub statement: Duration,
    pub lock: Duration,
    pub idle_in_tx: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Settings::default().timeouts()
    }
}

impl Settings {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            statement: Duration::from_millis(self.statement_timeout_ms),
            lock: Duration::from_millis(self.lock_timeout_ms),
            idle_in_tx: Duration::from_millis(self.idle_in_tx_timeout_ms),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.trim().eq_ignore_ascii_case("production")
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database)
    }

    /// Overlay environment values. `get` is `std::env::var` in the binary and a
    /// map lookup in tests.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dsn) = get(ENV_DSN).filter(|v| !v.trim().is_empty()) {
            let dsn = dsn.trim();
            let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
            self.database = expand_home(path);
        }
        if let Some(v) = get(ENV_STATEMENT_TIMEOUT) {
            self.statement_timeout_ms = parse_env_number(ENV_STATEMENT_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_LOCK_TIMEOUT) {
            self.lock_timeout_ms = parse_env_number(ENV_LOCK_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_IDLE_TIMEOUT) {
            self.idle_in_tx_timeout_ms = parse_env_number(ENV_IDLE_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_POOL_SIZE) {
            let size: u64 = parse_env_number(ENV_POOL_SIZE, &v)?;
            if size == 0 {
                return Err(PaieError::Config(format!("{ENV_POOL_SIZE} must be at least 1")));
            }
            self.pool_size = size as usize;
        }
        if let Some(v) = get(ENV_ALLOW_REIMPORT) {
            self.allow_reimport = parse_env_bool(ENV_ALLOW_REIMPORT, &v)?;
        }
        if let Some(v) = get(ENV_APP_ENV).filter(|v| !v.trim().is_empty()) {
            self.app_env = v.trim().to_lowercase();
        }
        Ok(())
    }
}

fn parse_env_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| PaieError::Config(format!("{name} is not a whole number: {raw:?}")))
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(PaieError::Config(format!("{name} is not a boolean: {raw:?}"))),
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("paie")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_database() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("paie")
        .join("paie.db")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

/// Reads a settings file; a missing or malformed file yields the defaults.
pub fn load_settings_from(path: &Path) -> Settings {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Settings::default();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "settings file ignored");
        Settings::default()
    })
}

/// Settings file, then environment, then the `--db` flag.
pub fn resolve(db_flag: Option<&str>) -> Result<Settings> {
    let mut settings = load_settings();
    settings.apply_env(|name| std::env::var(name).ok())?;
    if let Some(db) = db_flag {
        settings.database = expand_home(db);
    }
    Ok(settings)
}

pub fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
