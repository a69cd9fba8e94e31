use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a trading signal or an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// Parse the store's spelling ('Buy'/'Sell', possibly padded).
    pub fn parse(s: &str) -> Option<Direction> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Direction::Buy),
            "sell" => Some(Direction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

/// Action kind recorded in the execution log and carried by trade
/// instructions. `Drop` closes an existing trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Drop,
}

impl From<Direction> for TradeAction {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Buy => TradeAction::Buy,
            Direction::Sell => TradeAction::Sell,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "buy"),
            TradeAction::Sell => write!(f, "sell"),
            TradeAction::Drop => write!(f, "drop"),
        }
    }
}

/// Kind of trade a drop instruction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Position,
    PendingOrder,
}

impl std::fmt::Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeType::Position => write!(f, "POSITION"),
            TradeType::PendingOrder => write!(f, "PENDING ORDER"),
        }
    }
}

/// Immutable per-instance configuration snapshot returned by registration.
/// Never mutated after registration, only replaced by re-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub config_id: i64,
    pub ticker: String,
    pub ticker_jid: i64,
    pub timeframe_signal_id: i64,
    pub timeframe_confirmation_id: i64,
    pub timeframe_trend_id: i64,
    /// Volume for every open instruction, in lots.
    pub open_volume: f64,
    /// Trading window, UTC time-of-day. `None` (or midnight on the close
    /// side) means 24/7 trading with no forced close.
    pub trading_start_utc: Option<NaiveTime>,
    pub trading_close_utc: Option<NaiveTime>,
    pub broker_id: i64,
    pub platform_id: i64,
    /// How many times to re-check for a position after an open instruction.
    pub max_position_checks: u32,
    /// Delay between confirmation checks, in seconds.
    pub check_interval_seconds: f64,
    /// Opaque token identifying this registration of the instance.
    pub instance_token: String,
}

impl StrategyConfig {
    /// Whether the forced-close boundary is active. A missing close time or
    /// the midnight sentinel both disable it.
    pub fn force_close_enabled(&self) -> bool {
        matches!(self.trading_close_utc, Some(t) if t != NaiveTime::MIN)
    }
}

/// An open position as observed through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub direction: Direction,
    pub volume: f64,
    /// Correlation token linking the position to the instruction that
    /// produced it. Missing until the bridge fills it in.
    pub correlation_token: Option<String>,
    pub ticker: String,
}

/// One append-only execution-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub config_id: i64,
    pub action: TradeAction,
    pub volume: f64,
    pub price: Option<f64>,
    pub correlation_token: Option<String>,
}

/// State written to the strategy tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    Start,
    Heartbeat,
    Terminating,
    Terminated,
    Stop,
    Completed,
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerState::Start => write!(f, "start"),
            TrackerState::Heartbeat => write!(f, "heartbeat"),
            TrackerState::Terminating => write!(f, "terminating"),
            TrackerState::Terminated => write!(f, "terminated"),
            TrackerState::Stop => write!(f, "stop"),
            TrackerState::Completed => write!(f, "completed"),
        }
    }
}

/// A pending request for one strategy instance to shut down gracefully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationRequest {
    pub termination_id: i64,
    pub config_id: i64,
    pub requested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parse_accepts_store_spelling() {
        assert_eq!(Direction::parse("Buy "), Some(Direction::Buy));
        assert_eq!(Direction::parse("SELL"), Some(Direction::Sell));
        assert_eq!(Direction::parse("drop"), None);
    }

    #[test]
    fn midnight_close_time_disables_forced_close() {
        let mut cfg = StrategyConfig {
            config_id: 1,
            ticker: "XAUUSD".into(),
            ticker_jid: 13,
            timeframe_signal_id: 3,
            timeframe_confirmation_id: 3,
            timeframe_trend_id: 5,
            open_volume: 0.01,
            trading_start_utc: None,
            trading_close_utc: Some(NaiveTime::MIN),
            broker_id: 2,
            platform_id: 1,
            max_position_checks: 30,
            check_interval_seconds: 0.1,
            instance_token: "t".into(),
        };
        assert!(!cfg.force_close_enabled());
        cfg.trading_close_utc = NaiveTime::from_hms_opt(21, 45, 0);
        assert!(cfg.force_close_enabled());
        cfg.trading_close_utc = None;
        assert!(!cfg.force_close_enabled());
    }
}
