use proptest::prelude::*;

use common::Error;
use memstore::MemoryBackend;
use pool::ConnectionPool;

proptest! {
    /// For any interleaving of acquire/release calls the counters satisfy
    /// active + idle == total and total never exceeds base + overflow.
    #[test]
    fn counters_hold_under_arbitrary_sequences(
        base in 1usize..6,
        overflow in 0usize..4,
        ops in proptest::collection::vec(any::<bool>(), 1..64),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let backend = MemoryBackend::new();
            let pool = ConnectionPool::new(backend.factory(), base, overflow);
            let limit = base + overflow;
            let mut held = Vec::new();

            for acquire in ops {
                if acquire {
                    match pool.acquire(false).await {
                        Ok(conn) => held.push(conn),
                        Err(Error::PoolExhausted { idle, active, total, .. }) => {
                            // Exhaustion must report a genuinely full pool.
                            prop_assert_eq!(total, limit);
                            prop_assert_eq!(active + idle, total);
                        }
                        Err(e) => {
                            return Err(TestCaseError::fail(format!("unexpected error: {e}")));
                        }
                    }
                } else if let Some(conn) = held.pop() {
                    pool.release(conn).await;
                }

                let stats = pool.stats().await;
                prop_assert_eq!(stats.active + stats.idle, stats.total);
                prop_assert!(stats.total <= limit);
                prop_assert_eq!(stats.active, held.len());
                prop_assert!(stats.idle <= base);
            }

            // Returning everything leaves a fully idle pool.
            for conn in held.drain(..) {
                pool.release(conn).await;
            }
            let stats = pool.stats().await;
            prop_assert_eq!(stats.active, 0);
            prop_assert_eq!(stats.idle, stats.total);
            Ok(())
        })?;
    }
}
