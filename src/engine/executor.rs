//! Trade execution collaborator.
//!
//! The engine hands each unit of work to a `TradeExecutor`. Real venue
//! integration lives outside this crate; `SimulatedExecutor` only logs and
//! returns a receipt, in both paper and live mode.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Acknowledgement of one executed action.
#[derive(Debug, Clone)]
pub struct TradeReceipt {
    pub order_id: String,
    pub label: String,
    pub amount: f64,
    pub simulated: bool,
    pub timestamp: DateTime<Utc>,
}

impl TradeReceipt {
    /// Create a receipt for an action that touched no venue.
    pub fn simulated(label: &str, amount: f64) -> Self {
        Self {
            order_id: format!("sim-{}", uuid::Uuid::new_v4()),
            label: label.to_string(),
            amount,
            simulated: true,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over whatever actually moves funds.
///
/// May be slow and may fail. Retry policy belongs to the implementor; the
/// engine surfaces the first error it sees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Commit `amount` for the step identified by `label`.
    async fn execute(&self, label: &str, amount: f64) -> Result<TradeReceipt>;

    /// Perform the fixed liquidity injection action.
    async fn inject_liquidity(&self, label: &str) -> Result<TradeReceipt>;

    /// Executor name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Simulated executor
// ---------------------------------------------------------------------------

pub struct SimulatedExecutor {
    paper_mode: bool,
}

impl SimulatedExecutor {
    pub fn new(paper_mode: bool) -> Self {
        if !paper_mode {
            warn!("Live mode requested but no venue is wired in; trades are simulated");
        }
        Self { paper_mode }
    }
}

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    async fn execute(&self, label: &str, amount: f64) -> Result<TradeReceipt> {
        info!(
            label,
            amount = format!("${amount:.2}"),
            paper = self.paper_mode,
            "[SIMULATED] Buy"
        );
        Ok(TradeReceipt::simulated(label, amount))
    }

    async fn inject_liquidity(&self, label: &str) -> Result<TradeReceipt> {
        info!(label, paper = self.paper_mode, "[SIMULATED] Liquidity injection");
        Ok(TradeReceipt::simulated(label, 0.0))
    }

    fn name(&self) -> &str {
        if self.paper_mode {
            "paper"
        } else {
            "simulated-live"
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
