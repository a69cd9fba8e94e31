pub mod sqlite;

pub use sqlite::{SqlStoreConnection, SqlStoreFactory};

/// Workspace schema, applied by the binary at startup and by tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
