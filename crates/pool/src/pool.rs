use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{ConnectionFactory, Error, Result, StoreConnection};

/// Snapshot of the pool counters, reported on exhaustion and by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub total: usize,
    pub limit: usize,
}

struct PoolInner {
    idle: Vec<Box<dyn StoreConnection>>,
    active: usize,
    total_created: usize,
}

/// Bounded pool of store connections with overflow capacity.
///
/// `base_size` connections persist in the idle set; up to `overflow` more may
/// exist transiently and are destroyed on release. `acquire` and `release`
/// are the sole mutators of the counters; the internal mutex makes them safe
/// to call from any number of strategy tasks sharing one process. The pool
/// never blocks waiting for a free slot; exhaustion is the caller's problem.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    base_size: usize,
    overflow: usize,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, base_size: usize, overflow: usize) -> Self {
        info!(
            base_size,
            limit = base_size + overflow,
            "Connection pool initialized"
        );
        Self {
            factory,
            base_size,
            overflow,
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                active: 0,
                total_created: 0,
            }),
        }
    }

    fn limit(&self) -> usize {
        self.base_size + self.overflow
    }

    /// Check a connection out: idle first, then fresh creation while under
    /// the limit, otherwise `Error::PoolExhausted` with the current counters
    /// (which are left untouched).
    pub async fn acquire(&self, autocommit: bool) -> Result<Box<dyn StoreConnection>> {
        // Reserve the slot under the lock; create outside it so a slow
        // connect doesn't stall other callers.
        let reused = {
            let mut inner = self.inner.lock().await;
            if let Some(conn) = inner.idle.pop() {
                inner.active += 1;
                Some(conn)
            } else if inner.total_created < self.limit() {
                inner.total_created += 1;
                inner.active += 1;
                None
            } else {
                return Err(Error::PoolExhausted {
                    idle: inner.idle.len(),
                    active: inner.active,
                    total: inner.total_created,
                    limit: self.limit(),
                });
            }
        };

        let mut conn = match reused {
            Some(conn) => conn,
            None => match self.factory.connect().await {
                Ok(conn) => {
                    debug!("Pool created new store connection");
                    conn
                }
                Err(e) => {
                    let mut inner = self.inner.lock().await;
                    inner.total_created -= 1;
                    inner.active -= 1;
                    return Err(e);
                }
            },
        };

        if let Err(e) = conn.set_autocommit(autocommit).await {
            // The connection state is suspect; destroy it and give the
            // reserved slot back so the failure leaves the counters intact.
            if let Err(close_err) = conn.close().await {
                debug!(error = %close_err, "Failed to close connection after autocommit error");
            }
            let mut inner = self.inner.lock().await;
            inner.active -= 1;
            inner.total_created -= 1;
            return Err(e);
        }
        Ok(conn)
    }

    /// Return a connection. Rolls back any uncommitted work first, then
    /// parks it in the idle set if below `base_size`, otherwise destroys the
    /// overflow connection.
    pub async fn release(&self, mut conn: Box<dyn StoreConnection>) {
        if let Err(e) = conn.rollback().await {
            debug!(error = %e, "Rollback on release failed (connection state reset skipped)");
        }

        let overflow = {
            let mut inner = self.inner.lock().await;
            inner.active = inner.active.saturating_sub(1);
            if inner.idle.len() < self.base_size {
                inner.idle.push(conn);
                None
            } else {
                inner.total_created -= 1;
                Some(conn)
            }
        };

        if let Some(mut conn) = overflow {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close overflow connection");
            }
        }
    }

    /// Destroy everything the pool holds and reset the counters. Checked-out
    /// connections are abandoned to their holders. Process shutdown only.
    pub async fn drain(&self) {
        let idle = {
            let mut inner = self.inner.lock().await;
            inner.active = 0;
            inner.total_created = 0;
            std::mem::take(&mut inner.idle)
        };
        for mut conn in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close connection during drain");
            }
        }
        info!("Connection pool drained");
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            idle: inner.idle.len(),
            active: inner.active,
            total: inner.total_created,
            limit: self.limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        Direction, Position, StrategyConfig, TerminationRequest, TradeAction, TradeInstruction,
        TrackerState,
    };

    /// Connection stub that only counts lifecycle calls.
    struct StubConnection {
        fail_autocommit: bool,
    }

    #[async_trait]
    impl StoreConnection for StubConnection {
        async fn set_autocommit(&mut self, _on: bool) -> Result<()> {
            if self.fail_autocommit {
                return Err(Error::Store("autocommit not supported".into()));
            }
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        async fn register_strategy(&mut self, config_id: i64) -> Result<StrategyConfig> {
            Err(Error::ConfigNotFound(config_id))
        }
        async fn current_signal(
            &mut self,
            _ticker_jid: i64,
            _signal_tf: i64,
            _confirmation_tf: i64,
            _trend_tf: i64,
        ) -> Result<Option<Direction>> {
            Ok(None)
        }
        async fn open_positions(&mut self, _config_id: i64) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
        async fn create_trade_signal(&mut self, _instruction: &TradeInstruction) -> Result<()> {
            Ok(())
        }
        async fn log_execution(
            &mut self,
            _config_id: i64,
            _action: TradeAction,
            _volume: f64,
            _price: Option<f64>,
            _correlation_token: Option<&str>,
        ) -> Result<i64> {
            Ok(0)
        }
        async fn attach_execution_token(&mut self, _record_id: i64, _token: &str) -> Result<()> {
            Ok(())
        }
        async fn update_strategy_state(
            &mut self,
            _config_id: i64,
            _state: TrackerState,
        ) -> Result<()> {
            Ok(())
        }
        async fn pending_terminations(&mut self) -> Result<Vec<TerminationRequest>> {
            Ok(Vec::new())
        }
        async fn mark_termination_completed(&mut self, _termination_id: i64) -> Result<()> {
            Ok(())
        }
    }

    struct StubFactory {
        fail_autocommit: bool,
    }

    #[async_trait]
    impl ConnectionFactory for StubFactory {
        async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
            Ok(Box::new(StubConnection {
                fail_autocommit: self.fail_autocommit,
            }))
        }
    }

    fn pool(base: usize, overflow: usize) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(StubFactory {
                fail_autocommit: false,
            }),
            base,
            overflow,
        )
    }

    #[tokio::test]
    async fn acquire_release_keeps_counters_consistent() {
        let pool = pool(2, 1);
        let a = pool.acquire(false).await.unwrap();
        let b = pool.acquire(false).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.active, 2);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.total, 2);

        pool.release(a).await;
        pool.release(b).await;
        let stats = pool.stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active + stats.idle, stats.total);
    }

    #[tokio::test]
    async fn acquire_reuses_idle_before_creating() {
        let pool = pool(2, 0);
        let a = pool.acquire(false).await.unwrap();
        pool.release(a).await;
        let _b = pool.acquire(false).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.total, 1, "idle connection should be reused");
    }

    #[tokio::test]
    async fn exhaustion_fails_and_leaves_counters_unchanged() {
        let pool = pool(1, 1);
        let _a = pool.acquire(false).await.unwrap();
        let _b = pool.acquire(false).await.unwrap();
        let before = pool.stats().await;

        match pool.acquire(false).await {
            Err(Error::PoolExhausted {
                idle,
                active,
                total,
                limit,
            }) => {
                assert_eq!(idle, 0);
                assert_eq!(active, 2);
                assert_eq!(total, 2);
                assert_eq!(limit, 2);
            }
            Err(other) => panic!("expected PoolExhausted, got {other}"),
            Ok(_) => panic!("expected PoolExhausted, got a connection"),
        }
        assert_eq!(pool.stats().await, before);
    }

    #[tokio::test]
    async fn autocommit_failure_releases_the_reserved_slot() {
        let pool = ConnectionPool::new(
            Arc::new(StubFactory {
                fail_autocommit: true,
            }),
            1,
            0,
        );

        for _ in 0..3 {
            match pool.acquire(true).await {
                Err(Error::Store(_)) => {}
                Err(other) => panic!("expected Store error, got {other}"),
                Ok(_) => panic!("expected autocommit failure"),
            }
            // The slot must come back; otherwise the pool is exhausted forever.
            assert_eq!(
                pool.stats().await,
                PoolStats {
                    idle: 0,
                    active: 0,
                    total: 0,
                    limit: 1
                }
            );
        }
    }

    #[tokio::test]
    async fn overflow_connection_destroyed_on_release() {
        let pool = pool(1, 2);
        let a = pool.acquire(false).await.unwrap();
        let b = pool.acquire(false).await.unwrap();
        pool.release(a).await;
        // Idle set already holds base_size connections; b must be destroyed.
        pool.release(b).await;
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn drain_resets_everything() {
        let pool = pool(2, 0);
        let a = pool.acquire(false).await.unwrap();
        pool.release(a).await;
        pool.drain().await;
        let stats = pool.stats().await;
        assert_eq!(
            stats,
            PoolStats {
                idle: 0,
                active: 0,
                total: 0,
                limit: 2
            }
        );
    }
}
