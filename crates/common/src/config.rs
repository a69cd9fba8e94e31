use std::time::Duration;

/// Which store backend the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// SQL store over sqlx. Instructions take effect through the external
    /// execution bridge.
    Sql,
    /// In-memory store with immediate instruction effects. Dry runs only.
    Memory,
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreMode::Sql => write!(f, "sql"),
            StoreMode::Memory => write!(f, "memory"),
        }
    }
}

/// All process-level configuration loaded from environment variables at
/// startup. Missing required variables cause an immediate panic with a clear
/// message. Per-strategy parameters come from the store at registration, not
/// from here.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_mode: StoreMode,
    /// Required in sql mode, ignored in memory mode.
    pub database_url: Option<String>,

    // Connection pool
    pub pool_size: usize,
    pub pool_max_overflow: usize,

    // Loop timing. Explicit constants, not literals buried in the loop.
    /// Tick between termination checks.
    pub poll_interval: Duration,
    /// Interval between full decision cycles (signal + reconciliation).
    pub decision_interval: Duration,
    /// Interval between heartbeat tracker writes.
    pub heartbeat_interval: Duration,
    /// TTL of the shared termination-request cache.
    pub termination_cache_ttl: Duration,

    /// Force a close+reopen even when the signal matches the open position's
    /// direction. Variant behavior, off by default.
    pub reflatten_on_match: bool,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let store_mode = match optional_env("STORE_MODE")
            .unwrap_or_else(|| "sql".to_string())
            .to_lowercase()
            .as_str()
        {
            "sql" => StoreMode::Sql,
            "memory" => StoreMode::Memory,
            other => panic!("ERROR: STORE_MODE must be 'sql' or 'memory', got: '{other}'"),
        };

        let database_url = match store_mode {
            StoreMode::Sql => Some(required_env("DATABASE_URL")),
            StoreMode::Memory => optional_env("DATABASE_URL"),
        };

        Config {
            store_mode,
            database_url,
            pool_size: parsed_env("POOL_SIZE", 20),
            pool_max_overflow: parsed_env("POOL_MAX_OVERFLOW", 10),
            poll_interval: Duration::from_millis(parsed_env("POLL_INTERVAL_MS", 100)),
            decision_interval: Duration::from_secs(parsed_env("DECISION_INTERVAL_SECS", 30)),
            heartbeat_interval: Duration::from_secs(parsed_env("HEARTBEAT_INTERVAL_SECS", 60)),
            termination_cache_ttl: Duration::from_millis(parsed_env(
                "TERMINATION_CACHE_TTL_MS",
                100,
            )),
            reflatten_on_match: optional_env("REFLATTEN_ON_MATCH")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
