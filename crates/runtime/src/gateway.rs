use std::sync::Arc;

use tracing::{error, info, warn};

use common::{
    Direction, Position, Result, StrategyConfig, TradeAction, TradeInstruction, TrackerState,
};
use pool::ConnectionPool;

/// Issues position instructions and audit records through pooled store
/// connections. Every open or close instruction is followed by exactly one
/// execution-log call on the same connection; the log call is best-effort
/// and never blocks the trade that triggered it.
pub struct PositionGateway {
    pool: Arc<ConnectionPool>,
    cfg: Arc<StrategyConfig>,
}

impl PositionGateway {
    pub fn new(pool: Arc<ConnectionPool>, cfg: Arc<StrategyConfig>) -> Self {
        Self { pool, cfg }
    }

    /// Positions currently open for this strategy. Empty is a normal state.
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let mut conn = self.pool.acquire(false).await?;
        let result = conn.open_positions(self.cfg.config_id).await;
        self.pool.release(conn).await;
        result
    }

    /// Issue a market open at the configured volume and log it. Returns the
    /// log record id so the caller can attach the correlation token once the
    /// position is confirmed; `None` when only the logging failed.
    pub async fn open(&self, direction: Direction) -> Result<Option<i64>> {
        let instruction = TradeInstruction::open(&self.cfg, direction);
        let mut conn = self.pool.acquire(false).await?;
        let issued = conn.create_trade_signal(&instruction).await;

        let log_record = match &issued {
            Ok(()) => {
                info!(
                    config_id = self.cfg.config_id,
                    ticker = %self.cfg.ticker,
                    %direction,
                    volume = self.cfg.open_volume,
                    "Open instruction sent"
                );
                self.log_on(
                    &mut conn,
                    direction.into(),
                    self.cfg.open_volume,
                    None,
                )
                .await
            }
            Err(_) => None,
        };

        self.pool.release(conn).await;
        issued.map(|_| log_record)
    }

    /// Issue a drop for a specific position and log it with the position's
    /// correlation token.
    pub async fn close(&self, position: &Position) -> Result<Option<i64>> {
        let instruction = TradeInstruction::close(&self.cfg, position);
        let mut conn = self.pool.acquire(false).await?;
        let issued = conn.create_trade_signal(&instruction).await;

        let log_record = match &issued {
            Ok(()) => {
                info!(
                    config_id = self.cfg.config_id,
                    position_id = position.id,
                    ticker = %self.cfg.ticker,
                    volume = position.volume,
                    "Close instruction sent"
                );
                self.log_on(
                    &mut conn,
                    TradeAction::Drop,
                    position.volume,
                    position.correlation_token.as_deref(),
                )
                .await
            }
            Err(_) => None,
        };

        self.pool.release(conn).await;
        issued.map(|_| log_record)
    }

    /// At most one open position is a runtime invariant, not a trading
    /// signal. Keep the most recent (highest id) and close the rest.
    pub async fn ensure_single(&self) -> Result<Vec<Position>> {
        let positions = self.open_positions().await?;
        if positions.len() <= 1 {
            return Ok(positions);
        }

        warn!(
            config_id = self.cfg.config_id,
            count = positions.len(),
            "Multiple open positions found; closing duplicates"
        );

        // Positions arrive ordered by id; the last one is the keeper.
        let mut positions = positions;
        let keeper = positions
            .iter()
            .map(|p| p.id)
            .max()
            .unwrap_or_default();
        for position in positions.iter().filter(|p| p.id != keeper) {
            warn!(position_id = position.id, "Closing duplicate position");
            if let Err(e) = self.close(position).await {
                error!(
                    position_id = position.id,
                    error = %e,
                    "Failed to close duplicate position"
                );
            }
        }
        positions.retain(|p| p.id == keeper);
        Ok(positions)
    }

    /// Attach a confirmed correlation token to an earlier log record.
    /// Best-effort; the audit row simply stays tokenless on failure.
    pub async fn attach_token(&self, record_id: i64, token: &str) {
        match self.pool.acquire(false).await {
            Ok(mut conn) => {
                if let Err(e) = conn.attach_execution_token(record_id, token).await {
                    warn!(record_id, error = %e, "Failed to attach correlation token");
                }
                self.pool.release(conn).await;
            }
            Err(e) => warn!(record_id, error = %e, "No connection to attach token"),
        }
    }

    /// Best-effort tracker write (heartbeat and lifecycle states).
    pub async fn update_state(&self, state: TrackerState) {
        match self.pool.acquire(false).await {
            Ok(mut conn) => {
                if let Err(e) = conn
                    .update_strategy_state(self.cfg.config_id, state)
                    .await
                {
                    warn!(
                        config_id = self.cfg.config_id,
                        %state,
                        error = %e,
                        "Failed to update tracker state"
                    );
                }
                self.pool.release(conn).await;
            }
            Err(e) => warn!(
                config_id = self.cfg.config_id,
                %state,
                error = %e,
                "No connection for tracker update"
            ),
        }
    }

    async fn log_on(
        &self,
        conn: &mut Box<dyn common::StoreConnection>,
        action: TradeAction,
        volume: f64,
        token: Option<&str>,
    ) -> Option<i64> {
        match conn
            .log_execution(self.cfg.config_id, action, volume, None, token)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    config_id = self.cfg.config_id,
                    %action,
                    error = %e,
                    "Failed to log execution"
                );
                None
            }
        }
    }
}
