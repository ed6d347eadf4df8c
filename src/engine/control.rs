//! Control plane between a controller (console, tests) and the engine.
//!
//! The controller holds a cloneable [`ControlHandle`]; the engine owns the
//! [`ControlReceiver`] and only looks at it at step boundaries.

use tokio::sync::mpsc;
use tracing::debug;

/// A request from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

/// What the engine should do after checking for signals at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Nothing pending.
    Idle,
    Signal(ControlSignal),
}

/// Returned when the engine has already finished and dropped its receiver.
#[derive(Debug, thiserror::Error)]
#[error("engine is no longer running")]
pub struct EngineGone;

/// Create a connected handle/receiver pair.
pub fn channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, ControlReceiver { rx, detached: false })
}

/// Controller side. Sending never blocks.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlSignal>,
}

impl ControlHandle {
    /// Request pause (`true`) or resume (`false`).
    pub fn set_paused(&self, paused: bool) -> Result<(), EngineGone> {
        let signal = if paused {
            ControlSignal::Pause
        } else {
            ControlSignal::Resume
        };
        self.send(signal)
    }

    /// Request graceful termination at the next step boundary.
    pub fn stop(&self) -> Result<(), EngineGone> {
        self.send(ControlSignal::Stop)
    }

    fn send(&self, signal: ControlSignal) -> Result<(), EngineGone> {
        debug!(?signal, "Control signal sent");
        self.tx.send(signal).map_err(|_| EngineGone)
    }
}

/// Engine side.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<ControlSignal>,
    detached: bool,
}

impl ControlReceiver {
    /// Non-blocking check for the next pending signal.
    pub fn poll(&mut self) -> Poll {
        match self.rx.try_recv() {
            Ok(signal) => Poll::Signal(signal),
            Err(mpsc::error::TryRecvError::Empty) => Poll::Idle,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.detached = true;
                Poll::Idle
            }
        }
    }

    /// Block until a signal arrives. `None` means every controller handle
    /// has been dropped and no signal can ever arrive.
    pub async fn wait(&mut self) -> Option<ControlSignal> {
        let signal = self.rx.recv().await;
        if signal.is_none() {
            self.detached = true;
        }
        signal
    }

    /// True once the controller side has gone away.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}
