use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{Connection, Row, SqliteConnection};
use tracing::debug;

use common::{
    ConnectionFactory, Direction, Error, Position, Result, StoreConnection, StrategyConfig,
    TerminationRequest, TradeAction, TradeInstruction, TrackerState,
};

/// Produces SQL store connections for the pool.
pub struct SqlStoreFactory {
    database_url: String,
}

impl SqlStoreFactory {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for SqlStoreFactory {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let conn = SqliteConnection::connect(&self.database_url).await?;
        Ok(Box::new(SqlStoreConnection::new(conn)))
    }
}

/// One SQL connection speaking the runtime's remote-procedure surface.
///
/// Instructions are recorded in `trade_signals`; their effects appear in
/// `trades` through the external execution bridge, which is why callers
/// confirm by polling `open_positions`.
pub struct SqlStoreConnection {
    conn: Option<SqliteConnection>,
}

impl SqlStoreConnection {
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Store("connection already closed".into()))
    }
}

fn parse_window_time(value: Option<String>) -> Result<Option<NaiveTime>> {
    match value {
        None => Ok(None),
        Some(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
            .map(Some)
            .map_err(|e| Error::Store(format!("bad trading window time '{s}': {e}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp '{s}': {e}")))
}

#[async_trait]
impl StoreConnection for SqlStoreConnection {
    async fn set_autocommit(&mut self, _on: bool) -> Result<()> {
        // sqlite commits every statement unless a transaction is open, so
        // the hint needs no action here.
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn = self.conn()?;
        // Errors when no transaction is active; that is the common case.
        let _ = sqlx::query("ROLLBACK").execute(conn).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }

    async fn register_strategy(&mut self, config_id: i64) -> Result<StrategyConfig> {
        let conn = self.conn()?;
        let row = sqlx::query(
            r#"
            SELECT config_id, ticker, ticker_jid, timeframe_signal_id,
                   timeframe_confirmation_id, timeframe_trend_id, open_volume,
                   trading_start_utc, trading_close_utc, broker_id, platform_id,
                   max_position_checks, check_interval_seconds
            FROM strategy_configurations
            WHERE config_id = ?1
            "#,
        )
        .bind(config_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::ConfigNotFound(config_id))?;

        let cfg = StrategyConfig {
            config_id: row.try_get("config_id")?,
            ticker: row.try_get("ticker")?,
            ticker_jid: row.try_get("ticker_jid")?,
            timeframe_signal_id: row.try_get("timeframe_signal_id")?,
            timeframe_confirmation_id: row.try_get("timeframe_confirmation_id")?,
            timeframe_trend_id: row.try_get("timeframe_trend_id")?,
            open_volume: row.try_get("open_volume")?,
            trading_start_utc: parse_window_time(row.try_get("trading_start_utc")?)?,
            trading_close_utc: parse_window_time(row.try_get("trading_close_utc")?)?,
            broker_id: row.try_get("broker_id")?,
            platform_id: row.try_get("platform_id")?,
            max_position_checks: row.try_get::<i64, _>("max_position_checks")? as u32,
            check_interval_seconds: row.try_get("check_interval_seconds")?,
            instance_token: uuid::Uuid::new_v4().to_string(),
        };

        // Registration side effect: the tracker records the start.
        sqlx::query(
            r#"
            INSERT INTO strategy_tracker (config_id, current_state, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(config_id) DO UPDATE
                SET current_state = excluded.current_state,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(config_id)
        .bind(TrackerState::Start.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await?;

        debug!(config_id, instance = %cfg.instance_token, "Strategy registered");
        Ok(cfg)
    }

    async fn current_signal(
        &mut self,
        ticker_jid: i64,
        signal_tf: i64,
        confirmation_tf: i64,
        trend_tf: i64,
    ) -> Result<Option<Direction>> {
        let conn = self.conn()?;
        let row = sqlx::query(
            r#"
            SELECT trading_signal
            FROM signal_snapshots
            WHERE ticker_jid = ?1
              AND timeframe_signal_id = ?2
              AND timeframe_confirmation_id = ?3
              AND timeframe_trend_id = ?4
            ORDER BY computed_at DESC
            LIMIT 1
            "#,
        )
        .bind(ticker_jid)
        .bind(signal_tf)
        .bind(confirmation_tf)
        .bind(trend_tf)
        .fetch_optional(conn)
        .await?;

        Ok(row
            .and_then(|r| r.try_get::<Option<String>, _>("trading_signal").ok().flatten())
            .and_then(|s| Direction::parse(&s)))
    }

    async fn open_positions(&mut self, config_id: i64) -> Result<Vec<Position>> {
        let conn = self.conn()?;
        let rows = sqlx::query(
            r#"
            SELECT id, direction, volume, order_uuid, ticker
            FROM trades
            WHERE config_id = ?1 AND trade_type = 'POSITION' AND status = 'OPEN'
            ORDER BY id
            "#,
        )
        .bind(config_id)
        .fetch_all(conn)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("direction")?;
            let direction = Direction::parse(&raw)
                .ok_or_else(|| Error::Store(format!("unknown position direction '{raw}'")))?;
            positions.push(Position {
                id: row.try_get("id")?,
                direction,
                volume: row.try_get("volume")?,
                correlation_token: row.try_get("order_uuid")?,
                ticker: row.try_get("ticker")?,
            });
        }
        Ok(positions)
    }

    async fn create_trade_signal(&mut self, instruction: &TradeInstruction) -> Result<()> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO trade_signals
                (ticker, direction, volume, order_price, broker_id, platform_id,
                 target_trade_id, trade_type, config_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&instruction.ticker)
        .bind(instruction.action.to_string())
        .bind(instruction.volume)
        .bind(instruction.order_price)
        .bind(instruction.broker_id)
        .bind(instruction.platform_id)
        .bind(instruction.target_trade_id)
        .bind(instruction.trade_type.map(|t| t.to_string()))
        .bind(instruction.config_id)
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn log_execution(
        &mut self,
        config_id: i64,
        action: TradeAction,
        volume: f64,
        price: Option<f64>,
        correlation_token: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let result = sqlx::query(
            r#"
            INSERT INTO execution_log
                (config_id, action, volume, price, correlation_token, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(config_id)
        .bind(action.to_string())
        .bind(volume)
        .bind(price)
        .bind(correlation_token)
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn attach_execution_token(&mut self, record_id: i64, token: &str) -> Result<()> {
        let conn = self.conn()?;
        let result = sqlx::query("UPDATE execution_log SET correlation_token = ?1 WHERE id = ?2")
            .bind(token)
            .bind(record_id)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::Store(format!(
                "execution record {record_id} not found"
            )));
        }
        Ok(())
    }

    async fn update_strategy_state(&mut self, config_id: i64, state: TrackerState) -> Result<()> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO strategy_tracker (config_id, current_state, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(config_id) DO UPDATE
                SET current_state = excluded.current_state,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(config_id)
        .bind(state.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn pending_terminations(&mut self) -> Result<Vec<TerminationRequest>> {
        let conn = self.conn()?;
        let rows = sqlx::query(
            r#"
            SELECT id, config_id, requested_at
            FROM termination_requests
            WHERE completed_at IS NULL
            ORDER BY requested_at, id
            "#,
        )
        .fetch_all(conn)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let requested: String = row.try_get("requested_at")?;
            pending.push(TerminationRequest {
                termination_id: row.try_get("id")?,
                config_id: row.try_get("config_id")?,
                requested_at: parse_timestamp(&requested)?,
            });
        }
        Ok(pending)
    }

    async fn mark_termination_completed(&mut self, termination_id: i64) -> Result<()> {
        let conn = self.conn()?;
        sqlx::query(
            "UPDATE termination_requests SET completed_at = ?1 WHERE id = ?2 AND completed_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(termination_id)
        .execute(conn)
        .await?;
        Ok(())
    }
}
