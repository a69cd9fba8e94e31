pub mod engine;
pub mod gateway;
pub mod reconcile;
pub mod registrar;
pub mod signal;
pub mod termination;

pub use engine::{CycleOutcome, EngineState, EngineTimings, ExitReason, StrategyEngine};
pub use gateway::PositionGateway;
pub use reconcile::{decide, Decision};
pub use registrar::Registrar;
pub use signal::{SignalProvider, StoreSignalSource};
pub use termination::TerminationCache;
