//! Phase engine for the resumable anchor → gap-fill → liquidity sequence.
//!
//! Every completed step is persisted through the `ProgressStore` before its
//! progress event is published, and the event is published before the next
//! step starts. Pause and stop are only looked at between steps.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::engine::control::{self, ControlHandle, ControlReceiver, ControlSignal, Poll};
use crate::engine::executor::TradeExecutor;
use crate::engine::sink::{self, ProgressSink};
use crate::storage::ProgressStore;
use crate::types::{Checkpoint, EventKind, Phase, ProgressEvent, RunOutcome, ScovilleError};

/// Anchor buys per mission.
pub const ANCHOR_STEPS: u32 = 3;
/// Gap-fill buys when the liquidity phase runs.
pub const GAP_FILL_BASE_STEPS: u32 = 15;
/// Extra gap-fill buys that take over the liquidity phase's share when it is disabled.
pub const GAP_FILL_REALLOCATED_STEPS: u32 = 5;

const LIQUIDITY_LABEL: &str = "Liquidity";

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Step counts for one mission, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub anchor_steps: u32,
    pub gap_fill_steps: u32,
    pub liquidity_enabled: bool,
}

impl PhasePlan {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let liquidity_enabled = cfg.mission.enable_liquidity_phase;
        let mut gap_fill_steps = GAP_FILL_BASE_STEPS;
        if !liquidity_enabled {
            gap_fill_steps += GAP_FILL_REALLOCATED_STEPS;
        }
        Self {
            anchor_steps: ANCHOR_STEPS,
            gap_fill_steps,
            liquidity_enabled,
        }
    }

    /// Number of steps in `phase`.
    pub fn steps_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Anchor => self.anchor_steps,
            Phase::GapFill => self.gap_fill_steps,
            Phase::Liquidity if self.liquidity_enabled => 1,
            Phase::Liquidity | Phase::Done => 0,
        }
    }

    /// Spend if every draw landed at the top of its range.
    pub fn worst_case_spend(&self, cfg: &AppConfig) -> f64 {
        f64::from(self.anchor_steps) * cfg.anchor.buy_max
            + f64::from(self.gap_fill_steps) * cfg.gap_fill.buy_max
    }
}

/// Parameters of one buying phase.
#[derive(Debug, Clone, Copy)]
struct BuyPhase {
    phase: Phase,
    label: &'static str,
    banner: &'static str,
    min: f64,
    max: f64,
    steps: u32,
    delay: Duration,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Controller-side ends of the engine's channels.
pub struct EngineHandles {
    pub control: ControlHandle,
    pub events: mpsc::Receiver<ProgressEvent>,
}

/// Why the step loop stopped early.
enum Halt {
    Stopped,
    Failed(ScovilleError),
}

impl From<ScovilleError> for Halt {
    fn from(e: ScovilleError) -> Self {
        Halt::Failed(e)
    }
}

pub struct PhaseEngine {
    plan: PhasePlan,
    anchor: BuyPhase,
    gap_fill: BuyPhase,
    liquidity_delay: Duration,
    /// Last durably persisted checkpoint.
    checkpoint: Checkpoint,
    store: Arc<dyn ProgressStore>,
    executor: Arc<dyn TradeExecutor>,
    control: ControlReceiver,
    sink: ProgressSink,
    rng: StdRng,
}

impl PhaseEngine {
    /// Build an engine that resumes from `checkpoint`.
    ///
    /// `checkpoint` should be what `store` last returned from `load()`.
    pub fn new(
        config: &AppConfig,
        checkpoint: Checkpoint,
        store: Arc<dyn ProgressStore>,
        executor: Arc<dyn TradeExecutor>,
    ) -> (Self, EngineHandles) {
        let plan = PhasePlan::from_config(config);
        let (control_handle, control_rx) = control::channel();
        let (sink, events) = sink::channel(config.engine.event_buffer);

        let engine = Self {
            plan,
            anchor: BuyPhase {
                phase: Phase::Anchor,
                label: "Anchor",
                banner: "Entering Phase 1: Anchor Buys",
                min: config.anchor.buy_min,
                max: config.anchor.buy_max,
                steps: plan.anchor_steps,
                delay: config.anchor_delay(),
            },
            gap_fill: BuyPhase {
                phase: Phase::GapFill,
                label: "GapFill",
                banner: "Entering Phase 2: Gap Fill",
                min: config.gap_fill.buy_min,
                max: config.gap_fill.buy_max,
                steps: plan.gap_fill_steps,
                delay: config.gap_fill_delay(),
            },
            liquidity_delay: config.liquidity_delay(),
            checkpoint,
            store,
            executor,
            control: control_rx,
            sink,
            rng: StdRng::from_entropy(),
        };

        let handles = EngineHandles {
            control: control_handle,
            events,
        };
        (engine, handles)
    }

    /// Use a fixed seed for amount draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run on a dedicated tokio task.
    pub fn spawn(self) -> JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    /// Drive the mission from the current checkpoint until it completes,
    /// is stopped, or fails.
    pub async fn run(mut self) -> RunOutcome {
        if self.checkpoint.is_done() {
            info!(
                total_spent = format!("${:.2}", self.checkpoint.total_spent),
                "Mission already complete, nothing to do"
            );
            return RunOutcome::Completed(self.checkpoint);
        }

        info!(
            phase = %self.checkpoint.phase,
            anchor_index = self.checkpoint.anchor_index,
            gap_fill_index = self.checkpoint.gap_fill_index,
            anchor_steps = self.plan.anchor_steps,
            gap_fill_steps = self.plan.gap_fill_steps,
            liquidity = self.plan.liquidity_enabled,
            "Phase engine starting"
        );

        if self.checkpoint.paused {
            self.publish(ProgressEvent::control(
                EventKind::Paused,
                "Session was left PAUSED. Waiting for resume...",
                &self.checkpoint,
            ))
            .await;
        }

        match self.drive().await {
            Ok(()) => {
                info!(
                    total_spent = format!("${:.2}", self.checkpoint.total_spent),
                    observer = self.sink.has_observer(),
                    "Mission complete"
                );
                RunOutcome::Completed(self.checkpoint)
            }
            Err(Halt::Stopped) => {
                info!(
                    checkpoint = %self.checkpoint,
                    controller_detached = self.control.is_detached(),
                    "Run stopped by controller"
                );
                RunOutcome::Stopped(self.checkpoint)
            }
            Err(Halt::Failed(error)) => {
                error!(error = %error, checkpoint = %self.checkpoint, "Run failed");
                self.publish(ProgressEvent::error(
                    format!("ERROR: {error}"),
                    &self.checkpoint,
                ))
                .await;
                RunOutcome::Failed {
                    checkpoint: self.checkpoint,
                    error,
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<(), Halt> {
        if self.checkpoint.phase == Phase::Anchor {
            self.run_buy_phase(self.anchor).await?;
            self.advance_phase().await?;
        }

        if self.checkpoint.phase == Phase::GapFill {
            self.run_buy_phase(self.gap_fill).await?;
            self.advance_phase().await?;
        }

        if self.checkpoint.phase == Phase::Liquidity {
            self.run_liquidity().await?;
        }

        Ok(())
    }

    async fn run_buy_phase(&mut self, phase: BuyPhase) -> Result<(), Halt> {
        let start = self.completed_steps(phase.phase);

        for i in start..phase.steps {
            self.boundary().await?;
            if i == start {
                self.publish(ProgressEvent::log(phase.banner, &self.checkpoint))
                    .await;
            }

            let step = i + 1;
            let amount = self.draw(phase.min, phase.max);
            let label = format!("{}_{}", phase.label, step);

            let receipt = self
                .executor
                .execute(&label, amount)
                .await
                .map_err(|e| ScovilleError::TradeExecution {
                    label: label.clone(),
                    message: format!("{e:#}"),
                })?;

            let mut next = self.checkpoint.clone();
            match phase.phase {
                Phase::Anchor => next.anchor_index = step,
                _ => next.gap_fill_index = step,
            }
            next.total_spent += amount;
            self.commit(next)?;

            info!(
                phase = %phase.phase,
                step,
                total = phase.steps,
                amount = format!("${amount:.2}"),
                total_spent = format!("${:.2}", self.checkpoint.total_spent),
                order_id = %receipt.order_id,
                "Step complete"
            );

            self.publish(ProgressEvent::step(
                format!("{} {} bought ${:.2}", phase.label, step, amount),
                &self.checkpoint,
                Some(amount),
                step,
                phase.steps,
            ))
            .await;

            tokio::time::sleep(phase.delay).await;
        }

        Ok(())
    }

    async fn run_liquidity(&mut self) -> Result<(), Halt> {
        self.boundary().await?;
        self.publish(ProgressEvent::log(
            "Entering Phase 3: Liquidity Injection",
            &self.checkpoint,
        ))
        .await;

        let receipt = self
            .executor
            .inject_liquidity(LIQUIDITY_LABEL)
            .await
            .map_err(|e| ScovilleError::TradeExecution {
                label: LIQUIDITY_LABEL.to_string(),
                message: format!("{e:#}"),
            })?;

        let mut next = self.checkpoint.clone();
        next.phase = Phase::Done;
        self.commit(next)?;
        info!(order_id = %receipt.order_id, "Liquidity injected");

        self.publish(ProgressEvent::step(
            "Liquidity added. MISSION COMPLETE.",
            &self.checkpoint,
            None,
            1,
            1,
        ))
        .await;

        tokio::time::sleep(self.liquidity_delay).await;
        Ok(())
    }

    /// Persist the move to the next phase.
    async fn advance_phase(&mut self) -> Result<(), Halt> {
        let from = self.checkpoint.phase;
        let to = from.next(self.plan.liquidity_enabled);

        let mut next = self.checkpoint.clone();
        next.phase = to;
        self.commit(next)?;
        info!(from = %from, to = %to, "Phase transition");

        if to == Phase::Done {
            self.publish(ProgressEvent::log("MISSION COMPLETE.", &self.checkpoint))
                .await;
        }
        Ok(())
    }

    // -- Control -------------------------------------------------------------

    /// Step boundary: handle every pending control signal, suspending while
    /// paused. Returns once the next step may start.
    async fn boundary(&mut self) -> Result<(), Halt> {
        loop {
            if self.checkpoint.paused {
                self.suspend().await?;
            }

            match self.control.poll() {
                Poll::Idle => return Ok(()),
                Poll::Signal(ControlSignal::Stop) => return Err(self.stop_requested().await),
                Poll::Signal(ControlSignal::Pause) => {
                    self.set_paused(true)?;
                    info!(checkpoint = %self.checkpoint, "Engine paused");
                    self.publish(ProgressEvent::control(
                        EventKind::Paused,
                        "PROCESS PAUSED. Waiting for resume...",
                        &self.checkpoint,
                    ))
                    .await;
                }
                Poll::Signal(ControlSignal::Resume) => {
                    debug!("Resume received while running, ignoring");
                }
            }
        }
    }

    /// Block until resume or stop.
    async fn suspend(&mut self) -> Result<(), Halt> {
        loop {
            match self.control.wait().await {
                Some(ControlSignal::Resume) => {
                    self.set_paused(false)?;
                    info!("Engine resumed");
                    self.publish(ProgressEvent::control(
                        EventKind::Resumed,
                        "RESUMED.",
                        &self.checkpoint,
                    ))
                    .await;
                    return Ok(());
                }
                Some(ControlSignal::Pause) => continue,
                Some(ControlSignal::Stop) => return Err(self.stop_requested().await),
                None => {
                    warn!("Controller disconnected while paused, stopping");
                    return Err(self.stop_requested().await);
                }
            }
        }
    }

    async fn stop_requested(&mut self) -> Halt {
        self.publish(ProgressEvent::control(
            EventKind::Stopped,
            "STOP SIGNAL RECEIVED.",
            &self.checkpoint,
        ))
        .await;
        Halt::Stopped
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), ScovilleError> {
        let mut next = self.checkpoint.clone();
        next.paused = paused;
        self.commit(next)
    }

    // -- Helpers -------------------------------------------------------------

    /// Persist `next`; only a successful save makes it the current checkpoint.
    fn commit(&mut self, next: Checkpoint) -> Result<(), ScovilleError> {
        debug_assert!(next.phase >= self.checkpoint.phase);
        self.store.save(&next)?;
        self.checkpoint = next;
        Ok(())
    }

    async fn publish(&mut self, event: ProgressEvent) {
        self.sink.publish(event).await;
    }

    fn completed_steps(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Anchor => self.checkpoint.anchor_index,
            Phase::GapFill => self.checkpoint.gap_fill_index,
            Phase::Liquidity | Phase::Done => 0,
        }
    }

    /// Uniform draw from `[min, max)`; a degenerate range yields `min`.
    fn draw(&mut self, min: f64, max: f64) -> f64 {
        if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
