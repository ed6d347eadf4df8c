//! Shared types for the SCOVILLE engine.
//!
//! These types form the data model used across all modules: the persisted
//! checkpoint, the progress events published to observers, the outcome of
//! a run, and the domain error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Execution phase. Persisted as its numeric code (1–4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    Anchor = 1,
    GapFill = 2,
    Liquidity = 3,
    Done = 4,
}

impl Phase {
    /// The phase that follows this one once its steps are exhausted.
    /// `Done` maps to itself.
    pub fn next(self, liquidity_enabled: bool) -> Phase {
        match self {
            Phase::Anchor => Phase::GapFill,
            Phase::GapFill if liquidity_enabled => Phase::Liquidity,
            Phase::GapFill => Phase::Done,
            Phase::Liquidity | Phase::Done => Phase::Done,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Done
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Anchor => write!(f, "ANCHOR"),
            Phase::GapFill => write!(f, "GAP_FILL"),
            Phase::Liquidity => write!(f, "LIQUIDITY"),
            Phase::Done => write!(f, "DONE"),
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Phase::Anchor),
            2 => Ok(Phase::GapFill),
            3 => Ok(Phase::Liquidity),
            4 => Ok(Phase::Done),
            other => Err(format!("invalid phase code {other}, expected 1-4")),
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        phase.code()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// The sole persisted record: where the run is and how much it has spent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: Phase,
    /// Anchor steps completed.
    pub anchor_index: u32,
    /// Gap-fill steps completed.
    pub gap_fill_index: u32,
    /// Cumulative committed amount across every completed step.
    pub total_spent: f64,
    pub paused: bool,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            phase: Phase::Anchor,
            anchor_index: 0,
            gap_fill_index: 0,
            total_spent: 0.0,
            paused: false,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | anchors={} | gap_fills={} | spent=${:.2}{}",
            self.phase,
            self.anchor_index,
            self.gap_fill_index,
            self.total_spent,
            if self.paused { " | PAUSED" } else { "" },
        )
    }
}

impl Checkpoint {
    /// True for the checkpoint a brand-new run starts from.
    pub fn is_fresh(&self) -> bool {
        *self == Checkpoint::default()
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Human-readable lines describing where a run will pick up.
    pub fn resume_summary(&self) -> Vec<String> {
        if self.is_fresh() {
            return vec!["Starting a fresh mission.".to_string()];
        }

        let mut lines = vec!["Resuming previous session from saved progress...".to_string()];

        if self.is_done() {
            lines.push("Mission was already complete.".to_string());
            lines.push(format!("Total spent: ${:.2}", self.total_spent));
            return lines;
        }

        lines.push(format!("Current phase: {} ({})", self.phase.code(), self.phase));
        lines.push(format!("Anchor buys completed: {}", self.anchor_index));
        lines.push(format!("Gap-fill buys completed: {}", self.gap_fill_index));
        lines.push(format!("Total spent so far: ${:.2}", self.total_spent));

        if self.paused {
            lines.push("Engine is currently PAUSED. Press 'p' to resume.".to_string());
        }

        lines
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Informational line only (phase entry, completion).
    Log,
    /// A unit of work was completed and persisted.
    Step,
    Paused,
    Resumed,
    Stopped,
    /// Persistence or execution failure; the run is ending.
    Error,
}

/// One message on the progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub log_line: Option<String>,
    /// Full checkpoint snapshot at the time of the event.
    pub checkpoint: Checkpoint,
    /// Amount committed by this step, for `Step` events of buying phases.
    pub amount: Option<f64>,
    /// Step number within the current phase (1-based), 0 when not a step.
    pub phase_current: u32,
    /// Total steps in the current phase, 0 when not a step.
    pub phase_total: u32,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(kind: EventKind, log_line: impl Into<String>, checkpoint: &Checkpoint) -> Self {
        Self {
            kind,
            log_line: Some(log_line.into()),
            checkpoint: checkpoint.clone(),
            amount: None,
            phase_current: 0,
            phase_total: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn log(line: impl Into<String>, checkpoint: &Checkpoint) -> Self {
        Self::new(EventKind::Log, line, checkpoint)
    }

    pub fn step(
        line: impl Into<String>,
        checkpoint: &Checkpoint,
        amount: Option<f64>,
        phase_current: u32,
        phase_total: u32,
    ) -> Self {
        Self {
            amount,
            phase_current,
            phase_total,
            ..Self::new(EventKind::Step, line, checkpoint)
        }
    }

    pub fn control(kind: EventKind, line: impl Into<String>, checkpoint: &Checkpoint) -> Self {
        Self::new(kind, line, checkpoint)
    }

    pub fn error(line: impl Into<String>, checkpoint: &Checkpoint) -> Self {
        Self::new(EventKind::Error, line, checkpoint)
    }

    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }

    /// The pause state the engine has acknowledged, if this event is an
    /// acknowledgement. Step and log events say nothing about a pending
    /// pause request.
    pub fn acknowledged_pause(&self) -> Option<bool> {
        match self.kind {
            EventKind::Paused => Some(true),
            EventKind::Resumed => Some(false),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// How a call to `PhaseEngine::run` ended.
///
/// Every variant carries the last checkpoint that was durably persisted.
#[derive(Debug)]
pub enum RunOutcome {
    /// Reached `Phase::Done`.
    Completed(Checkpoint),
    /// A stop signal was honoured at a step boundary.
    Stopped(Checkpoint),
    /// Persistence or trade execution failed.
    Failed {
        checkpoint: Checkpoint,
        error: ScovilleError,
    },
}

impl RunOutcome {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            RunOutcome::Completed(cp) | RunOutcome::Stopped(cp) => cp,
            RunOutcome::Failed { checkpoint, .. } => checkpoint,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, RunOutcome::Stopped(_))
    }

    pub fn error(&self) -> Option<&ScovilleError> {
        match self {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed(cp) => write!(f, "COMPLETED ({cp})"),
            RunOutcome::Stopped(cp) => write!(f, "STOPPED ({cp})"),
            RunOutcome::Failed { checkpoint, error } => {
                write!(f, "FAILED: {error} ({checkpoint})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SCOVILLE.
#[derive(Debug, thiserror::Error)]
pub enum ScovilleError {
    /// Stored progress exists but cannot be trusted. Never replaced by a
    /// default silently; the caller picks the recovery policy.
    #[error("Corrupt checkpoint at {path}: {message}")]
    CorruptState { path: String, message: String },

    #[error("Failed to persist checkpoint to {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Trade execution failed ({label}): {message}")]
    TradeExecution { label: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
