use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENCY: usize = 1; // sequential, one job at a time
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 300;

/// Top-level config (dynacron.toml + DYNACRON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynacronConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Driver loop and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between reconcile + run cycles in `dynacron run`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on jobs dispatched at the same time within one batch.
    /// Values below 1 are treated as 1.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-dispatch time limit. `0` disables the limit.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn dispatch_timeout(&self) -> Option<std::time::Duration> {
        (self.dispatch_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.dispatch_timeout_secs))
    }

    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_dispatch_timeout() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dynacron/dynacron.db", home)
}

impl DynacronConfig {
    /// Load config from a TOML file with DYNACRON_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `DYNACRON_SCHEDULER__MAX_CONCURRENCY=4`. A missing file is not an
    /// error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        let config: DynacronConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DYNACRON_").split("__"))
            .extract()
            .map_err(|e| crate::error::DynacronError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dynacron/dynacron.toml", home)
}
