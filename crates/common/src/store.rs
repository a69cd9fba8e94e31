use async_trait::async_trait;

use crate::{
    Direction, Position, Result, StrategyConfig, TerminationRequest, TradeAction, TradeType,
    TrackerState,
};

/// One instruction for the execution bridge. Opening, reversing (drop plus a
/// new buy/sell) and force-closing all go through this single surface.
#[derive(Debug, Clone)]
pub struct TradeInstruction {
    pub ticker: String,
    pub action: TradeAction,
    pub volume: f64,
    /// `None` = market order.
    pub order_price: Option<f64>,
    pub broker_id: i64,
    pub platform_id: i64,
    /// Existing trade a drop instruction targets.
    pub target_trade_id: Option<i64>,
    pub trade_type: Option<TradeType>,
    pub config_id: Option<i64>,
}

impl TradeInstruction {
    /// Market open in the given direction at the configured volume.
    pub fn open(cfg: &StrategyConfig, direction: Direction) -> Self {
        Self {
            ticker: cfg.ticker.clone(),
            action: direction.into(),
            volume: cfg.open_volume,
            order_price: None,
            broker_id: cfg.broker_id,
            platform_id: cfg.platform_id,
            target_trade_id: None,
            trade_type: None,
            config_id: Some(cfg.config_id),
        }
    }

    /// Drop targeting a specific open position.
    pub fn close(cfg: &StrategyConfig, position: &Position) -> Self {
        Self {
            ticker: cfg.ticker.clone(),
            action: TradeAction::Drop,
            volume: position.volume,
            order_price: None,
            broker_id: cfg.broker_id,
            platform_id: cfg.platform_id,
            target_trade_id: Some(position.id),
            trade_type: Some(TradeType::Position),
            config_id: Some(cfg.config_id),
        }
    }
}

/// One connection to the persistent store, exposing the named remote
/// procedures the runtime consumes. Owned exclusively by the pool while idle
/// and by a single caller while checked out; never shared concurrently.
///
/// `store::SqlStoreConnection` implements this over the SQL store.
/// `memstore::MemoryConnection` implements this for dry runs and tests.
#[async_trait]
pub trait StoreConnection: Send {
    /// Forward the acquire-time autocommit hint. Backends where every
    /// statement already commits individually may treat this as a no-op.
    async fn set_autocommit(&mut self, on: bool) -> Result<()>;

    /// Best-effort rollback of any uncommitted work; called on every release
    /// back to the pool.
    async fn rollback(&mut self) -> Result<()>;

    /// Tear the connection down. The handle is unusable afterwards.
    async fn close(&mut self) -> Result<()>;

    /// Register the instance and return its configuration snapshot. Also
    /// writes a `start` tracker record as a side effect.
    async fn register_strategy(&mut self, config_id: i64) -> Result<StrategyConfig>;

    /// Aggregated recommendation for the instrument's timeframe triple.
    async fn current_signal(
        &mut self,
        ticker_jid: i64,
        signal_tf: i64,
        confirmation_tf: i64,
        trend_tf: i64,
    ) -> Result<Option<Direction>>;

    /// Open positions currently associated with the strategy. Empty is fine.
    async fn open_positions(&mut self, config_id: i64) -> Result<Vec<Position>>;

    /// Enqueue one instruction for the execution bridge. Does not wait for
    /// the position change; callers poll `open_positions` to confirm.
    async fn create_trade_signal(&mut self, instruction: &TradeInstruction) -> Result<()>;

    /// Append an audit record; returns the record id.
    async fn log_execution(
        &mut self,
        config_id: i64,
        action: TradeAction,
        volume: f64,
        price: Option<f64>,
        correlation_token: Option<&str>,
    ) -> Result<i64>;

    /// Attach a correlation token discovered after the fact. The only
    /// permitted update to an execution-log record.
    async fn attach_execution_token(&mut self, record_id: i64, token: &str) -> Result<()>;

    async fn update_strategy_state(&mut self, config_id: i64, state: TrackerState) -> Result<()>;

    /// All termination requests not yet marked completed.
    async fn pending_terminations(&mut self) -> Result<Vec<TerminationRequest>>;

    async fn mark_termination_completed(&mut self, termination_id: i64) -> Result<()>;
}

/// Produces store connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;
}
