//! SCOVILLE: resumable three-phase acquisition engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores progress from disk (or starts fresh), runs the phase engine on
//! its own task and renders its progress events on the console, forwarding
//! keyboard and Ctrl-C control to it.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use scoville::config::AppConfig;
use scoville::engine::{ControlHandle, PhaseEngine, SimulatedExecutor, TradeExecutor};
use scoville::storage::{JsonFileStore, ProgressStore};
use scoville::types::{EventKind, ProgressEvent, RunOutcome, ScovilleError};

const BANNER: &str = r#"
 ___  ___ _____   _____ _    _    ___
/ __|/ __/ _ \ \ / /_ _| |  | |  | __|
\__ \ (_| (_) \ V / | || |__| |__| _|
|___/\___\___/ \_/ |___|____|____|___|

  Anchor -> Gap Fill -> Liquidity
  Controls: p + Enter = pause/resume | q + Enter = stop | Ctrl+C = stop
"#;

#[derive(Parser)]
#[command(name = "scoville")]
#[command(version, about = "Resumable three-phase acquisition engine")]
struct Cli {
    /// TOML config file. When it does not exist, configuration is read from
    /// environment variables (and `.env`).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the checkpoint file location.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Skip the live-mode confirmation prompt.
    #[arg(long)]
    yes: bool,

    /// Delete saved progress and exit.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let cfg = load_config(&cli.config)?;
    init_logging();
    cfg.validate()?;

    let state_path = cli
        .state_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.engine.state_file));
    let store = Arc::new(JsonFileStore::new(state_path));

    if cli.reset {
        store.clear()?;
        println!("Progress at {} cleared.", store.path().display());
        return Ok(());
    }

    if !cfg.mission.paper_mode && !cli.yes && !confirm_live()? {
        println!("Confirmation not received. Exiting.");
        return Ok(());
    }

    let checkpoint = match store.load() {
        Ok(cp) => cp,
        Err(e @ ScovilleError::CorruptState { .. }) => {
            error!(error = %e, "Saved progress is unreadable");
            return Err(anyhow::Error::new(e)
                .context("Refusing to start from a corrupt checkpoint; rerun with --reset to discard it"));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{BANNER}");
    for line in checkpoint.resume_summary() {
        println!("  {line}");
    }

    let executor = Arc::new(SimulatedExecutor::new(cfg.mission.paper_mode));
    info!(
        target_price = cfg.mission.target_price,
        total_budget = cfg.mission.total_budget,
        paper_mode = cfg.mission.paper_mode,
        liquidity = cfg.mission.enable_liquidity_phase,
        executor = executor.name(),
        state_file = %store.path().display(),
        "SCOVILLE starting up"
    );

    let (engine, handles) = PhaseEngine::new(&cfg, checkpoint.clone(), store.clone(), executor);
    let run = engine.spawn();

    let paused = Arc::new(AtomicBool::new(checkpoint.paused));
    spawn_keyboard(handles.control.clone(), paused.clone());

    let mut events = handles.events;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if let Some(ack) = event.acknowledged_pause() {
                            paused.store(ack, Ordering::SeqCst);
                        }
                        render_event(&event);
                    }
                    None => break,
                }
            }
            _ = &mut shutdown, if !stopping => {
                info!("Shutdown signal received.");
                stopping = true;
                if handles.control.stop().is_err() {
                    warn!("Engine already finished");
                }
            }
        }
    }

    let outcome = run.await.context("Engine task panicked")?;
    info!(outcome = %outcome, "SCOVILLE shut down.");

    match outcome {
        RunOutcome::Completed(cp) => {
            println!("Mission complete. Total spent: ${:.2}", cp.total_spent);
            Ok(())
        }
        RunOutcome::Stopped(cp) => {
            println!("Stopped. Progress saved: {cp}");
            Ok(())
        }
        RunOutcome::Failed { error, .. } => Err(error.into()),
    }
}

/// Load from TOML when the file exists, otherwise from the environment.
fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let path = path.to_string_lossy();
        AppConfig::load(&path)
    } else {
        AppConfig::from_env().with_context(|| {
            format!(
                "No config file at {} and environment configuration is incomplete",
                path.display()
            )
        })
    }
}

fn confirm_live() -> Result<bool> {
    println!("====================================================================");
    println!("  WARNING: LIVE TRADING MODE IS ENABLED");
    println!("====================================================================");
    println!("This run is configured to commit REAL funds.");
    println!("Check your configuration before proceeding.");
    println!();
    println!("Type 'YES' to confirm and start: ");

    let mut input = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut input)
        .context("Failed to read confirmation")?;
    Ok(input.trim() == "YES")
}

/// Forward console commands to the engine from a dedicated thread, so a
/// pending stdin read never holds up shutdown.
fn spawn_keyboard(control: ControlHandle, paused: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let sent = match line.trim() {
                "p" | "P" => {
                    let want = !paused.load(Ordering::SeqCst);
                    paused.store(want, Ordering::SeqCst);
                    println!(">>> {} requested <<<", if want { "PAUSE" } else { "RESUME" });
                    control.set_paused(want)
                }
                "q" | "Q" => {
                    println!(">>> STOP requested <<<");
                    control.stop()
                }
                "" => continue,
                other => {
                    println!("Unknown command '{other}'. Use p (pause/resume) or q (stop).");
                    continue;
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });
}

fn render_event(event: &ProgressEvent) {
    let line = event.log_line.as_deref().unwrap_or("");
    match event.kind {
        EventKind::Step => println!(
            "[{} {:>2}/{:<2}] {} | spent ${:.2}",
            event.checkpoint.phase,
            event.phase_current,
            event.phase_total,
            line,
            event.checkpoint.total_spent,
        ),
        EventKind::Error => eprintln!("!! {line}"),
        EventKind::Paused | EventKind::Resumed | EventKind::Stopped => println!(">>> {line}"),
        EventKind::Log => println!("{line}"),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scoville=info"));

    let json_logging = std::env::var("SCOVILLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
