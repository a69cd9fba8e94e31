pub mod pool;

pub use pool::{ConnectionPool, PoolStats};
