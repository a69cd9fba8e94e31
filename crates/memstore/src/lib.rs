use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    ConnectionFactory, Direction, Error, Position, Result, StoreConnection, StrategyConfig,
    TerminationRequest, TradeAction, TradeInstruction, TrackerState,
};

/// An open trade row as the bridge would materialize it.
#[derive(Debug, Clone)]
struct TradeRow {
    id: i64,
    config_id: i64,
    ticker: String,
    direction: Direction,
    volume: f64,
    /// Missing until the bridge assigns one (always present here unless
    /// token stripping is enabled).
    order_uuid: Option<String>,
    open: bool,
}

#[derive(Debug, Clone)]
pub struct LoggedExecution {
    pub id: i64,
    pub config_id: i64,
    pub action: TradeAction,
    pub volume: f64,
    pub price: Option<f64>,
    pub correlation_token: Option<String>,
}

#[derive(Debug, Clone)]
struct TerminationRow {
    id: i64,
    config_id: i64,
    requested_at: chrono::DateTime<Utc>,
    completed: bool,
}

#[derive(Default)]
struct MemState {
    configs: HashMap<i64, StrategyConfig>,
    trades: Vec<TradeRow>,
    instructions: Vec<TradeInstruction>,
    executions: Vec<LoggedExecution>,
    tracker: HashMap<i64, Vec<TrackerState>>,
    terminations: Vec<TerminationRow>,
    /// Scripted signal responses, popped one per query; falls back to
    /// `default_signal` when empty.
    scripted_signals: VecDeque<Option<Direction>>,
    default_signal: Option<Direction>,
    /// When set, the next signal query fails with a store error.
    fail_next_signal: bool,
    /// Countdown of position lookups that fail with a store error.
    fail_position_lookups: u32,
    /// When set, materialized trades carry no correlation token.
    strip_tokens: bool,
    next_trade_id: i64,
    next_execution_id: i64,
    next_termination_id: i64,
    fetch_count: u64,
    position_fetch_count: u64,
}

/// In-memory store backend.
///
/// Buy/sell instructions materialize a position immediately and drop
/// instructions close their target, so confirmation polling succeeds on the
/// first check. No real store is ever touched. Used for dry runs and as the
/// test double for everything above the pool.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemState>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        info!("MemoryBackend initialized");
        Self {
            state: Arc::new(RwLock::new(MemState {
                next_trade_id: 1,
                next_execution_id: 1,
                next_termination_id: 1,
                ..MemState::default()
            })),
        }
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MemoryFactory {
            state: self.state.clone(),
        })
    }

    pub async fn seed_config(&self, cfg: StrategyConfig) {
        self.state.write().await.configs.insert(cfg.config_id, cfg);
    }

    /// Seed a 24/7 demo configuration for dry-run mode.
    pub async fn seed_default(&self, config_id: i64) -> StrategyConfig {
        let cfg = StrategyConfig {
            config_id,
            ticker: "XAUUSD".into(),
            ticker_jid: 13,
            timeframe_signal_id: 3,
            timeframe_confirmation_id: 3,
            timeframe_trend_id: 5,
            open_volume: 0.01,
            trading_start_utc: None,
            trading_close_utc: None,
            broker_id: 2,
            platform_id: 1,
            max_position_checks: 10,
            check_interval_seconds: 0.01,
            instance_token: uuid::Uuid::new_v4().to_string(),
        };
        self.seed_config(cfg.clone()).await;
        cfg
    }

    /// Queue signal responses consumed one per query.
    pub async fn push_signals<I: IntoIterator<Item = Option<Direction>>>(&self, signals: I) {
        self.state
            .write()
            .await
            .scripted_signals
            .extend(signals);
    }

    /// Sticky signal served once the scripted queue is empty.
    pub async fn set_signal(&self, signal: Option<Direction>) {
        self.state.write().await.default_signal = signal;
    }

    pub async fn fail_next_signal(&self) {
        self.state.write().await.fail_next_signal = true;
    }

    /// Fail the next `count` position lookups with a store error.
    pub async fn fail_next_position_lookups(&self, count: u32) {
        self.state.write().await.fail_position_lookups = count;
    }

    /// Materialize future trades without a correlation token, as a bridge
    /// that fills tokens in late would.
    pub async fn strip_tokens(&self) {
        self.state.write().await.strip_tokens = true;
    }

    /// Insert an open position directly, bypassing the instruction path.
    pub async fn seed_position(&self, config_id: i64, direction: Direction, volume: f64) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_trade_id;
        state.next_trade_id += 1;
        let ticker = state
            .configs
            .get(&config_id)
            .map(|c| c.ticker.clone())
            .unwrap_or_else(|| "XAUUSD".into());
        state.trades.push(TradeRow {
            id,
            config_id,
            ticker,
            direction,
            volume,
            order_uuid: Some(uuid::Uuid::new_v4().to_string()),
            open: true,
        });
        id
    }

    pub async fn request_termination(&self, config_id: i64) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_termination_id;
        state.next_termination_id += 1;
        state.terminations.push(TerminationRow {
            id,
            config_id,
            requested_at: Utc::now(),
            completed: false,
        });
        id
    }

    pub async fn termination_completed(&self, termination_id: i64) -> bool {
        self.state
            .read()
            .await
            .terminations
            .iter()
            .any(|t| t.id == termination_id && t.completed)
    }

    pub async fn open_trades(&self, config_id: i64) -> Vec<Position> {
        self.state
            .read()
            .await
            .trades
            .iter()
            .filter(|t| t.open && t.config_id == config_id)
            .map(position_from_row)
            .collect()
    }

    pub async fn executions(&self, config_id: i64) -> Vec<LoggedExecution> {
        self.state
            .read()
            .await
            .executions
            .iter()
            .filter(|e| e.config_id == config_id)
            .cloned()
            .collect()
    }

    pub async fn instructions(&self) -> Vec<TradeInstruction> {
        self.state.read().await.instructions.clone()
    }

    pub async fn tracker_states(&self, config_id: i64) -> Vec<TrackerState> {
        self.state
            .read()
            .await
            .tracker
            .get(&config_id)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times the store was queried for terminations. Lets tests
    /// observe the cache TTL doing its job.
    pub async fn termination_fetches(&self) -> u64 {
        self.state.read().await.fetch_count
    }

    /// How many times open positions were queried, failures included.
    pub async fn position_lookups(&self) -> u64 {
        self.state.read().await.position_fetch_count
    }
}

fn position_from_row(row: &TradeRow) -> Position {
    Position {
        id: row.id,
        direction: row.direction,
        volume: row.volume,
        correlation_token: row.order_uuid.clone(),
        ticker: row.ticker.clone(),
    }
}

struct MemoryFactory {
    state: Arc<RwLock<MemState>>,
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
        }))
    }
}

/// One checked-out handle onto the shared in-memory state.
pub struct MemoryConnection {
    state: Arc<RwLock<MemState>>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn set_autocommit(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn register_strategy(&mut self, config_id: i64) -> Result<StrategyConfig> {
        let mut state = self.state.write().await;
        let mut cfg = state
            .configs
            .get(&config_id)
            .cloned()
            .ok_or(Error::ConfigNotFound(config_id))?;
        cfg.instance_token = uuid::Uuid::new_v4().to_string();
        state.configs.insert(config_id, cfg.clone());
        state
            .tracker
            .entry(config_id)
            .or_default()
            .push(TrackerState::Start);
        Ok(cfg)
    }

    async fn current_signal(
        &mut self,
        _ticker_jid: i64,
        _signal_tf: i64,
        _confirmation_tf: i64,
        _trend_tf: i64,
    ) -> Result<Option<Direction>> {
        let mut state = self.state.write().await;
        if state.fail_next_signal {
            state.fail_next_signal = false;
            return Err(Error::Store("scripted signal failure".into()));
        }
        if let Some(next) = state.scripted_signals.pop_front() {
            return Ok(next);
        }
        Ok(state.default_signal)
    }

    async fn open_positions(&mut self, config_id: i64) -> Result<Vec<Position>> {
        let mut state = self.state.write().await;
        state.position_fetch_count += 1;
        if state.fail_position_lookups > 0 {
            state.fail_position_lookups -= 1;
            return Err(Error::Store("scripted position lookup failure".into()));
        }
        Ok(state
            .trades
            .iter()
            .filter(|t| t.open && t.config_id == config_id)
            .map(position_from_row)
            .collect())
    }

    async fn create_trade_signal(&mut self, instruction: &TradeInstruction) -> Result<()> {
        let mut state = self.state.write().await;
        state.instructions.push(instruction.clone());

        // Immediate bridge: the instruction's effect is visible to the very
        // next open_positions call.
        match instruction.action {
            TradeAction::Buy | TradeAction::Sell => {
                let id = state.next_trade_id;
                state.next_trade_id += 1;
                let direction = match instruction.action {
                    TradeAction::Buy => Direction::Buy,
                    _ => Direction::Sell,
                };
                let order_uuid = if state.strip_tokens {
                    None
                } else {
                    Some(uuid::Uuid::new_v4().to_string())
                };
                state.trades.push(TradeRow {
                    id,
                    config_id: instruction.config_id.unwrap_or(0),
                    ticker: instruction.ticker.clone(),
                    direction,
                    volume: instruction.volume,
                    order_uuid,
                    open: true,
                });
                debug!(trade_id = id, ticker = %instruction.ticker, "Memory trade opened");
            }
            TradeAction::Drop => {
                if let Some(target) = instruction.target_trade_id {
                    if let Some(row) = state.trades.iter_mut().find(|t| t.id == target) {
                        row.open = false;
                        debug!(trade_id = target, "Memory trade closed");
                    }
                }
            }
        }
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
        let mut state = self.state.write().await;
        let id = state.next_execution_id;
        state.next_execution_id += 1;
        state.executions.push(LoggedExecution {
            id,
            config_id,
            action,
            volume,
            price,
            correlation_token: correlation_token.map(str::to_string),
        });
        Ok(id)
    }

    async fn attach_execution_token(&mut self, record_id: i64, token: &str) -> Result<()> {
        let mut state = self.state.write().await;
        match state.executions.iter_mut().find(|e| e.id == record_id) {
            Some(record) => {
                record.correlation_token = Some(token.to_string());
                Ok(())
            }
            None => Err(Error::Store(format!(
                "execution record {record_id} not found"
            ))),
        }
    }

    async fn update_strategy_state(&mut self, config_id: i64, state_kind: TrackerState) -> Result<()> {
        self.state
            .write()
            .await
            .tracker
            .entry(config_id)
            .or_default()
            .push(state_kind);
        Ok(())
    }

    async fn pending_terminations(&mut self) -> Result<Vec<TerminationRequest>> {
        let mut state = self.state.write().await;
        state.fetch_count += 1;
        Ok(state
            .terminations
            .iter()
            .filter(|t| !t.completed)
            .map(|t| TerminationRequest {
                termination_id: t.id,
                config_id: t.config_id,
                requested_at: t.requested_at,
            })
            .collect())
    }

    async fn mark_termination_completed(&mut self, termination_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        match state
            .terminations
            .iter_mut()
            .find(|t| t.id == termination_id)
        {
            Some(row) => {
                row.completed = true;
                Ok(())
            }
            None => Err(Error::Store(format!(
                "termination request {termination_id} not found"
            ))),
        }
    }
}
