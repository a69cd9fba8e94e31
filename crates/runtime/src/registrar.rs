use std::sync::Arc;

use tracing::info;

use common::{Error, Result, StrategyConfig};
use pool::ConnectionPool;

/// Resolves a strategy's static parameters through the one registration
/// call, made exactly once per process before the execution loop starts.
pub struct Registrar {
    pool: Arc<ConnectionPool>,
}

impl Registrar {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Register the instance and return its configuration snapshot.
    /// `ConfigNotFound` when the store has no matching configuration,
    /// `RegistrationFailed` on any other remote error. Both are fatal to the
    /// caller.
    pub async fn register(&self, config_id: i64) -> Result<StrategyConfig> {
        if config_id <= 0 {
            return Err(Error::InvalidConfigId(config_id));
        }

        let mut conn = self.pool.acquire(false).await?;
        let result = conn.register_strategy(config_id).await;
        self.pool.release(conn).await;

        match result {
            Ok(cfg) => {
                info!(
                    config_id,
                    ticker = %cfg.ticker,
                    volume = cfg.open_volume,
                    instance = %cfg.instance_token,
                    "Strategy registered"
                );
                Ok(cfg)
            }
            Err(e @ Error::ConfigNotFound(_)) => Err(e),
            Err(e) => Err(Error::RegistrationFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::MemoryBackend;

    #[tokio::test]
    async fn register_returns_snapshot_once_seeded() {
        let backend = MemoryBackend::new();
        backend.seed_default(7).await;
        let pool = Arc::new(ConnectionPool::new(backend.factory(), 2, 0));

        let cfg = Registrar::new(pool).register(7).await.unwrap();
        assert_eq!(cfg.config_id, 7);
        assert_eq!(cfg.ticker, "XAUUSD");
    }

    #[tokio::test]
    async fn missing_configuration_is_fatal_not_registration_failed() {
        let backend = MemoryBackend::new();
        let pool = Arc::new(ConnectionPool::new(backend.factory(), 2, 0));

        assert!(matches!(
            Registrar::new(pool).register(7).await,
            Err(Error::ConfigNotFound(7))
        ));
    }

    #[tokio::test]
    async fn non_positive_id_rejected_without_remote_call() {
        let backend = MemoryBackend::new();
        let pool = Arc::new(ConnectionPool::new(backend.factory(), 2, 0));
        let registrar = Registrar::new(pool.clone());

        assert!(matches!(
            registrar.register(0).await,
            Err(Error::InvalidConfigId(0))
        ));
        assert_eq!(pool.stats().await.total, 0);
    }
}
