use std::sync::Arc;

use async_trait::async_trait;

use common::{Direction, Result, StrategyConfig};
use pool::ConnectionPool;

/// The injection seam for strategy variants: a concrete strategy supplies
/// only its signal, never the reconciliation or termination logic.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Fresh recommendation for this cycle, or `None`. No caching between
    /// cycles; errors are the caller's cue to hold, never to trade.
    async fn current_signal(&self) -> Result<Option<Direction>>;
}

/// Signal provider backed by the store's aggregated signal query over the
/// (signal, confirmation, trend) timeframe triple.
pub struct StoreSignalSource {
    pool: Arc<ConnectionPool>,
    ticker_jid: i64,
    signal_tf: i64,
    confirmation_tf: i64,
    trend_tf: i64,
}

impl StoreSignalSource {
    pub fn new(pool: Arc<ConnectionPool>, cfg: &StrategyConfig) -> Self {
        Self {
            pool,
            ticker_jid: cfg.ticker_jid,
            signal_tf: cfg.timeframe_signal_id,
            confirmation_tf: cfg.timeframe_confirmation_id,
            trend_tf: cfg.timeframe_trend_id,
        }
    }
}

#[async_trait]
impl SignalProvider for StoreSignalSource {
    async fn current_signal(&self) -> Result<Option<Direction>> {
        let mut conn = self.pool.acquire(false).await?;
        let result = conn
            .current_signal(
                self.ticker_jid,
                self.signal_tf,
                self.confirmation_tf,
                self.trend_tf,
            )
            .await;
        self.pool.release(conn).await;
        result
    }
}
