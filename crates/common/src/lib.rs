pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{Config, StoreMode};
pub use error::{Error, Result};
pub use store::{ConnectionFactory, StoreConnection, TradeInstruction};
pub use types::*;
