use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use common::{Config, Direction, Result, StrategyConfig, TrackerState};

use crate::gateway::PositionGateway;
use crate::reconcile::{decide, Decision};
use crate::signal::SignalProvider;
use crate::termination::TerminationCache;

/// Lifecycle of one strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

/// Why the run loop ended. All three are graceful exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Wall clock passed the configured trading window close.
    WindowClosed,
    /// A termination request for this instance was found and honored.
    TerminationRequested,
    /// Process-level interrupt (ctrl-c).
    Interrupted,
}

/// Result of one loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Exit(ExitReason),
}

/// Loop cadence, pulled out of the process config so tests can shrink it.
#[derive(Debug, Clone, Copy)]
pub struct EngineTimings {
    /// Tick between termination checks.
    pub poll_interval: Duration,
    /// Interval between full decision cycles.
    pub decision_interval: Duration,
    /// Interval between heartbeat tracker writes.
    pub heartbeat_interval: Duration,
}

impl EngineTimings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            decision_interval: cfg.decision_interval,
            heartbeat_interval: cfg.heartbeat_interval,
        }
    }
}

/// An open instruction whose position has not been observed yet. Carried
/// across cycles so the audit record still gets its correlation token when
/// the fill shows up late.
struct PendingOpen {
    direction: Direction,
    log_record: Option<i64>,
    /// Position ids that existed before the instruction was issued.
    known_ids: Vec<i64>,
}

/// The per-instance run loop: termination checks every tick, a signal and
/// reconciliation pass on the decision interval, heartbeats in between.
/// Ordering within a tick is fixed: interrupt, then termination, then the
/// decision cycle (which itself puts the forced window close before
/// everything else).
pub struct StrategyEngine {
    cfg: Arc<StrategyConfig>,
    timings: EngineTimings,
    reflatten_on_match: bool,
    gateway: PositionGateway,
    signals: Box<dyn SignalProvider>,
    terminations: Arc<TerminationCache>,
    shutdown: watch::Receiver<bool>,
    state: EngineState,
    pending: Option<PendingOpen>,
    last_decision: Option<Instant>,
    last_heartbeat: Option<Instant>,
}

impl StrategyEngine {
    pub fn new(
        cfg: Arc<StrategyConfig>,
        timings: EngineTimings,
        reflatten_on_match: bool,
        gateway: PositionGateway,
        signals: Box<dyn SignalProvider>,
        terminations: Arc<TerminationCache>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            timings,
            reflatten_on_match,
            gateway,
            signals,
            terminations,
            shutdown,
            state: EngineState::Starting,
            pending: None,
            last_decision: None,
            last_heartbeat: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Reduce any inherited book to at most one position, then go Running.
    /// No position is opened here; the first decision cycle does that.
    pub async fn start(&mut self) -> Result<()> {
        let kept = self.gateway.ensure_single().await?;
        info!(
            config_id = self.cfg.config_id,
            ticker = %self.cfg.ticker,
            open_positions = kept.len(),
            "Strategy started"
        );
        self.state = EngineState::Running;
        Ok(())
    }

    /// Drive the loop until a graceful exit.
    pub async fn run(&mut self) -> Result<ExitReason> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(self.interrupt_shutdown().await);
            }

            if let CycleOutcome::Exit(reason) = self.check_termination().await {
                return Ok(reason);
            }

            let decision_due = self
                .last_decision
                .map_or(true, |at| at.elapsed() >= self.timings.decision_interval);
            if decision_due {
                self.last_decision = Some(Instant::now());
                if let CycleOutcome::Exit(reason) = self.decision_cycle().await {
                    return Ok(reason);
                }
            }

            self.heartbeat_if_due().await;
            sleep(self.timings.poll_interval).await;
        }
    }

    /// One termination tick. A lookup failure is logged and skipped; the
    /// next tick retries. On a hit the book is flattened and the request
    /// marked completed, stale cache and all.
    pub async fn check_termination(&mut self) -> CycleOutcome {
        let request = match self.terminations.check_mine(self.cfg.config_id).await {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    config_id = self.cfg.config_id,
                    error = %e,
                    "Termination check failed; will retry"
                );
                return CycleOutcome::Continue;
            }
        };
        let Some(request) = request else {
            return CycleOutcome::Continue;
        };

        info!(
            config_id = self.cfg.config_id,
            termination_id = request.termination_id,
            "Terminating on request"
        );
        self.state = EngineState::Terminating;
        self.gateway.update_state(TrackerState::Terminating).await;

        let remaining = self.close_all_with_retry().await;
        if remaining > 0 {
            error!(
                config_id = self.cfg.config_id,
                remaining, "Positions still open after termination close attempts"
            );
        }

        self.state = EngineState::Terminated;
        self.gateway.update_state(TrackerState::Terminated).await;

        if let Err(e) = self
            .terminations
            .mark_completed(request.termination_id)
            .await
        {
            error!(
                termination_id = request.termination_id,
                error = %e,
                "Failed to mark termination completed"
            );
        }
        self.terminations.clear_cache().await;

        CycleOutcome::Exit(ExitReason::TerminationRequested)
    }

    /// One full decision pass. The forced window close is evaluated before
    /// anything else, then the single-position invariant, then the fresh
    /// signal against the held position.
    pub async fn decision_cycle(&mut self) -> CycleOutcome {
        if self.window_closed() {
            info!(
                config_id = self.cfg.config_id,
                close_at = %self.cfg.trading_close_utc.unwrap_or_default(),
                "Trading window closed; flattening"
            );
            let remaining = self.close_all_with_retry().await;
            if remaining > 0 {
                error!(
                    config_id = self.cfg.config_id,
                    remaining, "Positions still open after window close"
                );
            }
            self.state = EngineState::Terminated;
            self.gateway.update_state(TrackerState::Terminated).await;
            return CycleOutcome::Exit(ExitReason::WindowClosed);
        }

        let positions = match self.gateway.ensure_single().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(
                    config_id = self.cfg.config_id,
                    error = %e,
                    "Position lookup failed; holding this cycle"
                );
                return CycleOutcome::Continue;
            }
        };
        self.resolve_pending(&positions).await;

        let signal = match self.signals.current_signal().await {
            Ok(signal) => signal,
            Err(e) => {
                warn!(
                    config_id = self.cfg.config_id,
                    error = %e,
                    "Signal fetch failed; holding this cycle"
                );
                return CycleOutcome::Continue;
            }
        };
        let Some(signal) = signal else {
            return CycleOutcome::Continue;
        };

        match decide(signal, positions.first(), self.reflatten_on_match) {
            Decision::Hold => {}
            Decision::Open(direction) => {
                self.open_with_confirmation(direction, &positions).await;
            }
            Decision::Reverse(direction) => {
                // A failed close skips the open; reversing on top of a live
                // position would double the exposure.
                let held = &positions[0];
                match self.gateway.close(held).await {
                    Ok(_) => {
                        self.open_with_confirmation(direction, &positions).await;
                    }
                    Err(e) => error!(
                        config_id = self.cfg.config_id,
                        position_id = held.id,
                        error = %e,
                        "Close failed; skipping reversal open"
                    ),
                }
            }
        }

        CycleOutcome::Continue
    }

    fn window_closed(&self) -> bool {
        match self.cfg.trading_close_utc {
            Some(close) if self.cfg.force_close_enabled() => Utc::now().time() >= close,
            _ => false,
        }
    }

    /// Issue the open, then poll for the new position within the configured
    /// check budget. Unconfirmed opens stay pending and are resolved on a
    /// later cycle.
    async fn open_with_confirmation(&mut self, direction: Direction, before: &[common::Position]) {
        let log_record = match self.gateway.open(direction).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    config_id = self.cfg.config_id,
                    %direction,
                    error = %e,
                    "Open instruction failed"
                );
                return;
            }
        };

        self.pending = Some(PendingOpen {
            direction,
            log_record,
            known_ids: before.iter().map(|p| p.id).collect(),
        });

        let wait = Duration::from_secs_f64(self.cfg.check_interval_seconds);
        for _ in 0..self.cfg.max_position_checks {
            match self.gateway.open_positions().await {
                Ok(positions) => {
                    if self.try_confirm(&positions).await {
                        return;
                    }
                }
                Err(e) => warn!(
                    config_id = self.cfg.config_id,
                    error = %e,
                    "Position poll failed during confirmation"
                ),
            }
            sleep(wait).await;
        }
        warn!(
            config_id = self.cfg.config_id,
            %direction,
            "Open not confirmed within check budget; will re-check next cycle"
        );
    }

    /// A late fill from a previous cycle still gets its token attached.
    async fn resolve_pending(&mut self, positions: &[common::Position]) {
        if self.pending.is_some() && !self.try_confirm(positions).await {
            let pending = self.pending.take();
            if let Some(pending) = pending {
                warn!(
                    config_id = self.cfg.config_id,
                    direction = %pending.direction,
                    "Pending open never confirmed; abandoning"
                );
            }
        }
    }

    async fn try_confirm(&mut self, positions: &[common::Position]) -> bool {
        let Some(pending) = &self.pending else {
            return true;
        };
        // A new position in the right direction is the confirmation; the
        // bridge may fill the correlation token later, so it is optional.
        let confirmed = positions
            .iter()
            .find(|p| p.direction == pending.direction && !pending.known_ids.contains(&p.id));
        let Some(position) = confirmed else {
            return false;
        };

        info!(
            config_id = self.cfg.config_id,
            position_id = position.id,
            direction = %position.direction,
            "Position confirmed"
        );
        if let (Some(record), Some(token)) =
            (pending.log_record, position.correlation_token.as_deref())
        {
            self.gateway.attach_token(record, token).await;
        }
        self.pending = None;
        true
    }

    /// Flatten the book, give the bridge one interval to act, then report
    /// how many positions are still open.
    async fn close_all_with_retry(&self) -> usize {
        let wait = Duration::from_secs_f64(self.cfg.check_interval_seconds);
        let mut last_seen = 0;
        for _ in 0..2 {
            let positions = match self.gateway.open_positions().await {
                Ok(positions) => positions,
                Err(e) => {
                    warn!(
                        config_id = self.cfg.config_id,
                        error = %e,
                        "Position lookup failed during close-all"
                    );
                    sleep(wait).await;
                    continue;
                }
            };
            last_seen = positions.len();
            if positions.is_empty() {
                return 0;
            }
            for position in &positions {
                if let Err(e) = self.gateway.close(position).await {
                    error!(
                        config_id = self.cfg.config_id,
                        position_id = position.id,
                        error = %e,
                        "Close failed during close-all"
                    );
                }
            }
            sleep(wait).await;
        }
        match self.gateway.open_positions().await {
            Ok(positions) => positions.len(),
            Err(e) => {
                // Book state unknown; report the last count actually seen
                // rather than claiming the close succeeded.
                error!(
                    config_id = self.cfg.config_id,
                    error = %e,
                    last_seen,
                    "Position lookup failed after close-all; book state unknown"
                );
                last_seen
            }
        }
    }

    async fn heartbeat_if_due(&mut self) {
        let due = self
            .last_heartbeat
            .map_or(true, |at| at.elapsed() >= self.timings.heartbeat_interval);
        if due && self.state == EngineState::Running {
            self.gateway.update_state(TrackerState::Heartbeat).await;
            self.last_heartbeat = Some(Instant::now());
        }
    }

    /// Ctrl-c path: flatten, record `stop`, exit.
    async fn interrupt_shutdown(&mut self) -> ExitReason {
        info!(config_id = self.cfg.config_id, "Interrupt received; shutting down");
        let remaining = self.close_all_with_retry().await;
        if remaining > 0 {
            error!(
                config_id = self.cfg.config_id,
                remaining, "Positions still open after interrupt close attempts"
            );
        }
        self.gateway.update_state(TrackerState::Stop).await;
        self.state = EngineState::Terminated;
        ExitReason::Interrupted
    }
}
