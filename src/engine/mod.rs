//! Core engine: the checkpointed three-phase acquisition run.

pub mod control;
pub mod executor;
pub mod runner;
pub mod sink;

pub use control::{ControlHandle, ControlSignal};
pub use executor::{SimulatedExecutor, TradeExecutor, TradeReceipt};
pub use runner::{EngineHandles, PhaseEngine, PhasePlan};
