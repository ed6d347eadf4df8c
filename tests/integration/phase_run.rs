//! Phase engine runs through the public API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use scoville::config::AppConfig;
use scoville::engine::{EngineHandles, PhaseEngine};
use scoville::storage::{JsonFileStore, MemoryStore, ProgressStore};
use scoville::types::{Checkpoint, EventKind, Phase, ProgressEvent, RunOutcome, ScovilleError};

use crate::mock_executor::MockExecutor;

fn config(liquidity: bool, event_buffer: usize) -> AppConfig {
    let toml = format!(
        r#"
        [mission]
        target_price = 0.0042
        total_budget = 10000.0
        paper_mode = true
        enable_liquidity_phase = {liquidity}

        [anchor]
        buy_min = 1.0
        buy_max = 2.0
        settle_delay_ms = 0

        [gap_fill]
        buy_min = 0.1
        buy_max = 0.5
        settle_delay_ms = 0

        [liquidity]
        settle_delay_ms = 0

        [engine]
        event_buffer = {event_buffer}
        "#
    );
    toml::from_str(&toml).unwrap()
}

fn temp_path() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("scoville_it_progress_{}.json", uuid::Uuid::new_v4()));
    p
}

async fn drain(handles: &mut EngineHandles) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = handles.events.recv().await {
        events.push(event);
    }
    events
}

/// Receive events until one matches, returning it.
async fn recv_until(
    handles: &mut EngineHandles,
    pred: impl Fn(&ProgressEvent) -> bool,
) -> ProgressEvent {
    loop {
        let event = handles.events.recv().await.expect("engine ended early");
        if pred(&event) {
            return event;
        }
    }
}

fn is_step_in(phase: Phase) -> impl Fn(&ProgressEvent) -> bool {
    move |e| e.kind == EventKind::Step && e.checkpoint.phase == phase
}

fn expected_labels(anchors: u32, gap_fills: u32) -> Vec<String> {
    (1..=anchors)
        .map(|i| format!("Anchor_{i}"))
        .chain((1..=gap_fills).map(|i| format!("GapFill_{i}")))
        .collect()
}

#[tokio::test]
async fn test_fresh_store_loads_default() {
    let store = JsonFileStore::new(temp_path());
    let cp = store.load().unwrap();
    assert_eq!(cp.phase, Phase::Anchor);
    assert_eq!(cp.anchor_index, 0);
    assert_eq!(cp.gap_fill_index, 0);
    assert_eq!(cp.total_spent, 0.0);
    assert!(!cp.paused);
}

#[tokio::test]
async fn test_stop_then_restart_resumes_without_gaps() {
    let path = temp_path();
    let cfg = config(true, 1);
    let executor = Arc::new(MockExecutor::new());

    // First session: stop somewhere in gap-fill.
    let store = Arc::new(JsonFileStore::new(&path));
    let (engine, mut handles) =
        PhaseEngine::new(&cfg, store.load().unwrap(), store.clone(), executor.clone());
    let task = engine.spawn();
    recv_until(&mut handles, is_step_in(Phase::GapFill)).await;
    handles.control.stop().unwrap();
    let after_stop = drain(&mut handles).await;
    let first = task.await.unwrap();

    assert!(first.is_stopped());
    assert_eq!(after_stop.last().unwrap().kind, EventKind::Stopped);
    let saved = store.load().unwrap();
    assert_eq!(&saved, first.checkpoint());
    assert_eq!(saved.phase, Phase::GapFill);
    assert!(saved.gap_fill_index >= 1 && saved.gap_fill_index < 15);

    // Second session: a new store over the same file, as after a restart.
    let store = Arc::new(JsonFileStore::new(&path));
    let resumed_from = store.load().unwrap();
    let (engine, mut handles) =
        PhaseEngine::new(&cfg, resumed_from.clone(), store.clone(), executor.clone());
    let task = engine.spawn();
    let events = drain(&mut handles).await;
    let second = task.await.unwrap();

    assert!(second.is_completed());
    let first_step = events.iter().find(|e| e.kind == EventKind::Step).unwrap();
    assert_eq!(first_step.phase_current, resumed_from.gap_fill_index + 1);

    // Every step ran exactly once across both sessions.
    assert_eq!(executor.labels(), expected_labels(3, 15));
    assert_eq!(executor.liquidity_calls(), 1);

    let mut sum = 0.0;
    for (_, amount) in executor.calls() {
        sum += amount;
    }
    let done = store.load().unwrap();
    assert_eq!(done.phase, Phase::Done);
    assert_eq!(done.total_spent, sum);

    store.clear().unwrap();
}

#[tokio::test]
async fn test_pause_halts_progress_until_resume() {
    let store = Arc::new(MemoryStore::new());
    let start = Checkpoint {
        phase: Phase::GapFill,
        anchor_index: 3,
        ..Checkpoint::default()
    };
    let (engine, mut handles) = PhaseEngine::new(
        &config(false, 1),
        start,
        store.clone(),
        Arc::new(MockExecutor::new()),
    );
    let task = engine.spawn();

    recv_until(&mut handles, is_step_in(Phase::GapFill)).await;
    handles.control.set_paused(true).unwrap();
    let paused = recv_until(&mut handles, |e| e.kind == EventKind::Paused).await;
    let paused_at = paused.checkpoint.gap_fill_index;
    assert!(paused.checkpoint.paused);

    // Nothing moves while suspended.
    let quiet = tokio::time::timeout(Duration::from_millis(150), handles.events.recv()).await;
    assert!(quiet.is_err(), "no events expected while paused");
    let on_disk = store.load().unwrap();
    assert!(on_disk.paused);
    assert_eq!(on_disk.gap_fill_index, paused_at);

    handles.control.set_paused(false).unwrap();
    let resumed = recv_until(&mut handles, |e| e.kind == EventKind::Resumed).await;
    assert!(!resumed.checkpoint.paused);
    assert_eq!(resumed.checkpoint.gap_fill_index, paused_at);
    assert!(store.history().contains(&resumed.checkpoint));

    let next = recv_until(&mut handles, |e| e.kind == EventKind::Step).await;
    assert_eq!(next.checkpoint.gap_fill_index, paused_at + 1);

    drain(&mut handles).await;
    let outcome = task.await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.checkpoint().gap_fill_index, 20);
    assert!(!outcome.checkpoint().paused);
}

#[tokio::test]
async fn test_stop_while_paused() {
    let store = Arc::new(MemoryStore::new());
    let (engine, mut handles) = PhaseEngine::new(
        &config(true, 1),
        Checkpoint::default(),
        store.clone(),
        Arc::new(MockExecutor::new()),
    );
    let task = engine.spawn();

    recv_until(&mut handles, is_step_in(Phase::Anchor)).await;
    handles.control.set_paused(true).unwrap();
    recv_until(&mut handles, |e| e.kind == EventKind::Paused).await;
    let saves = store.save_count();

    handles.control.stop().unwrap();
    let rest = drain(&mut handles).await;
    let outcome = task.await.unwrap();

    assert!(outcome.is_stopped());
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].kind, EventKind::Stopped);
    assert_eq!(store.save_count(), saves);
    assert!(outcome.checkpoint().paused);
}

#[tokio::test]
async fn test_stop_leaves_last_checkpoint_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let (engine, mut handles) = PhaseEngine::new(
        &config(true, 1),
        Checkpoint::default(),
        store.clone(),
        Arc::new(MockExecutor::new()),
    );
    let task = engine.spawn();

    recv_until(&mut handles, is_step_in(Phase::Anchor)).await;
    handles.control.stop().unwrap();
    let rest = drain(&mut handles).await;
    let outcome = task.await.unwrap();

    assert!(outcome.is_stopped());
    let history = store.history();
    assert_eq!(history.last().unwrap(), outcome.checkpoint());
    assert_eq!(&store.load().unwrap(), outcome.checkpoint());

    // No step events after the stop acknowledgement.
    let stop_at = rest.iter().position(|e| e.kind == EventKind::Stopped).unwrap();
    assert_eq!(stop_at, rest.len() - 1);
}

#[tokio::test]
async fn test_phase_never_decreases() {
    for liquidity in [true, false] {
        let store = Arc::new(MemoryStore::new());
        let (engine, mut handles) = PhaseEngine::new(
            &config(liquidity, 4),
            Checkpoint::default(),
            store.clone(),
            Arc::new(MockExecutor::new()),
        );
        let task = engine.spawn();
        drain(&mut handles).await;
        assert!(task.await.unwrap().is_completed());

        let history = store.history();
        for pair in history.windows(2) {
            assert!(pair[1].phase >= pair[0].phase);
            assert!(pair[1].total_spent >= pair[0].total_spent);
            if pair[0].phase > Phase::Anchor {
                assert_eq!(pair[1].anchor_index, pair[0].anchor_index);
            }
            if pair[0].phase > Phase::GapFill {
                assert_eq!(pair[1].gap_fill_index, pair[0].gap_fill_index);
            }
        }

        let saw_liquidity = history.iter().any(|cp| cp.phase == Phase::Liquidity);
        assert_eq!(saw_liquidity, liquidity);
    }
}

#[tokio::test]
async fn test_persisted_before_published() {
    let store = Arc::new(MemoryStore::new());
    let (engine, mut handles) = PhaseEngine::new(
        &config(true, 1),
        Checkpoint::default(),
        store.clone(),
        Arc::new(MockExecutor::new()),
    );
    let task = engine.spawn();

    while let Some(event) = handles.events.recv().await {
        if event.kind == EventKind::Step {
            assert!(store.history().contains(&event.checkpoint));
        }
    }
    assert!(task.await.unwrap().is_completed());
}

#[tokio::test]
async fn test_execution_failure_then_resume() {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(MockExecutor::new());
    executor.fail_on("GapFill_4");
    let cfg = config(false, 4);

    let (engine, mut handles) =
        PhaseEngine::new(&cfg, Checkpoint::default(), store.clone(), executor.clone());
    let task = engine.spawn();
    let events = drain(&mut handles).await;
    let outcome = task.await.unwrap();

    match &outcome {
        RunOutcome::Failed { checkpoint, error } => {
            assert!(matches!(error, ScovilleError::TradeExecution { label, .. } if label == "GapFill_4"));
            assert_eq!(checkpoint.phase, Phase::GapFill);
            assert_eq!(checkpoint.gap_fill_index, 3);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert!(events.last().unwrap().is_error());

    executor.clear_error();
    let (engine, mut handles) =
        PhaseEngine::new(&cfg, store.load().unwrap(), store.clone(), executor.clone());
    let task = engine.spawn();
    drain(&mut handles).await;
    let outcome = task.await.unwrap();

    assert!(outcome.is_completed());
    let labels = executor.labels();
    assert_eq!(labels.iter().filter(|l| *l == "GapFill_4").count(), 2);
    assert_eq!(labels.len(), 3 + 20 + 1);
    assert_eq!(executor.liquidity_calls(), 0);

    // The failed attempt's amount was never committed.
    let calls = executor.calls();
    let failed_idx = labels.iter().position(|l| l == "GapFill_4").unwrap();
    let mut sum = 0.0;
    for (i, (_, amount)) in calls.iter().enumerate() {
        if i != failed_idx {
            sum += amount;
        }
    }
    assert_eq!(outcome.checkpoint().total_spent, sum);
}

#[tokio::test]
async fn test_corrupt_file_is_not_overwritten() {
    let path = temp_path();
    std::fs::write(&path, "not json at all").unwrap();
    let store = JsonFileStore::new(&path);

    let err = store.load().unwrap_err();
    assert!(matches!(err, ScovilleError::CorruptState { .. }));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json at all");

    store.clear().unwrap();
}

#[tokio::test]
async fn test_rerun_done_checkpoint_from_disk() {
    let path = temp_path();
    let store = Arc::new(JsonFileStore::new(&path));
    let executor = Arc::new(MockExecutor::new());
    let cfg = config(true, 4);

    let (engine, mut handles) =
        PhaseEngine::new(&cfg, store.load().unwrap(), store.clone(), executor.clone());
    let task = engine.spawn();
    drain(&mut handles).await;
    assert!(task.await.unwrap().is_completed());
    let done = store.load().unwrap();
    let calls = executor.calls().len();

    let (engine, mut handles) =
        PhaseEngine::new(&cfg, done.clone(), store.clone(), executor.clone());
    let task = engine.spawn();
    let events = drain(&mut handles).await;
    let outcome = task.await.unwrap();

    assert!(outcome.is_completed());
    assert!(events.is_empty());
    assert_eq!(executor.calls().len(), calls);
    assert_eq!(store.load().unwrap(), done);

    store.clear().unwrap();
}
