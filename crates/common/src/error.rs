use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Connection pool exhausted (idle: {idle}, active: {active}, total: {total}, limit: {limit})"
    )]
    PoolExhausted {
        idle: usize,
        active: usize,
        total: usize,
        limit: usize,
    },

    #[error("Strategy configuration {0} not found")]
    ConfigNotFound(i64),

    #[error("Strategy registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Invalid configuration id: {0}")]
    InvalidConfigId(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
