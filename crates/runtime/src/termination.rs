use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use common::{Error, Result, TerminationRequest};
use pool::ConnectionPool;

struct CacheInner {
    snapshot: HashMap<i64, TerminationRequest>,
    fetched_at: Option<Instant>,
}

/// Process-wide cache of pending termination requests.
///
/// Constructed once per process and shared by reference across every
/// strategy task; the snapshot and its timestamp live behind one lock. The
/// short TTL amortizes the remote enumeration across many instances polling
/// at sub-second intervals, while `mark_completed` invalidates the cache
/// outright so a resolved request is never observed (and acted on) twice.
pub struct TerminationCache {
    pool: Arc<ConnectionPool>,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl TerminationCache {
    pub fn new(pool: Arc<ConnectionPool>, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            inner: Mutex::new(CacheInner {
                snapshot: HashMap::new(),
                fetched_at: None,
            }),
        }
    }

    /// Current pending requests keyed by config id, earliest request per
    /// config. Served from cache within the TTL; a failed refresh keeps the
    /// previous view and is retried on the next call.
    pub async fn get_terminations(&self) -> HashMap<i64, TerminationRequest> {
        let mut inner = self.inner.lock().await;
        if let Some(at) = inner.fetched_at {
            if at.elapsed() < self.ttl {
                return inner.snapshot.clone();
            }
        }

        match self.fetch().await {
            Ok(snapshot) => {
                inner.snapshot = snapshot;
                inner.fetched_at = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, "Termination queue fetch failed; serving previous view");
            }
        }
        inner.snapshot.clone()
    }

    /// Lookup for one strategy. Non-positive ids are a usage error and never
    /// reach the store.
    pub async fn check_mine(&self, config_id: i64) -> Result<Option<TerminationRequest>> {
        if config_id <= 0 {
            return Err(Error::InvalidConfigId(config_id));
        }
        let request = self.get_terminations().await.get(&config_id).cloned();
        if let Some(req) = &request {
            info!(
                config_id,
                termination_id = req.termination_id,
                requested_at = %req.requested_at,
                "Termination request found"
            );
        }
        Ok(request)
    }

    /// Mark a request resolved, then invalidate the cache unconditionally
    /// (not a TTL expiry) so no instance sees the stale pending state.
    pub async fn mark_completed(&self, termination_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire(false).await?;
        let result = conn.mark_termination_completed(termination_id).await;
        self.pool.release(conn).await;
        result?;

        self.clear_cache().await;
        info!(termination_id, "Termination marked completed, cache cleared");
        Ok(())
    }

    /// Explicit invalidation, also called after a shutdown completes.
    pub async fn clear_cache(&self) {
        let mut inner = self.inner.lock().await;
        inner.snapshot.clear();
        inner.fetched_at = None;
    }

    async fn fetch(&self) -> Result<HashMap<i64, TerminationRequest>> {
        let mut conn = self.pool.acquire(false).await?;
        let result = conn.pending_terminations().await;
        self.pool.release(conn).await;

        let mut snapshot = HashMap::new();
        // Rows arrive oldest first; keep the earliest request per config.
        for request in result? {
            snapshot.entry(request.config_id).or_insert(request);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::MemoryBackend;

    fn cache(backend: &MemoryBackend, ttl: Duration) -> TerminationCache {
        let pool = Arc::new(ConnectionPool::new(backend.factory(), 2, 0));
        TerminationCache::new(pool, ttl)
    }

    #[tokio::test]
    async fn check_mine_tracks_request_lifecycle() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, Duration::from_millis(0));

        assert!(cache.check_mine(7).await.unwrap().is_none());

        let id = backend.request_termination(7).await;
        let found = cache.check_mine(7).await.unwrap().unwrap();
        assert_eq!(found.termination_id, id);
        assert_eq!(found.config_id, 7);

        cache.mark_completed(id).await.unwrap();
        assert!(backend.termination_completed(id).await);
        assert!(cache.check_mine(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_amortizes_remote_queries() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, Duration::from_secs(60));

        for _ in 0..5 {
            let _ = cache.get_terminations().await;
        }
        assert_eq!(backend.termination_fetches().await, 1);

        // Completion bypasses the TTL entirely.
        let id = backend.request_termination(7).await;
        cache.mark_completed(id).await.unwrap();
        let _ = cache.get_terminations().await;
        assert_eq!(backend.termination_fetches().await, 2);
    }

    #[tokio::test]
    async fn non_positive_ids_are_usage_errors() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, Duration::from_millis(100));

        assert!(matches!(
            cache.check_mine(0).await,
            Err(Error::InvalidConfigId(0))
        ));
        assert!(matches!(
            cache.check_mine(-3).await,
            Err(Error::InvalidConfigId(-3))
        ));
        assert_eq!(backend.termination_fetches().await, 0);
    }

    #[tokio::test]
    async fn earliest_request_per_config_wins() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, Duration::from_millis(0));

        let first = backend.request_termination(7).await;
        let _second = backend.request_termination(7).await;

        let found = cache.check_mine(7).await.unwrap().unwrap();
        assert_eq!(found.termination_id, first);
    }
}
