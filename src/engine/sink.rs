//! Progress sink: the bounded outbound event stream.
//!
//! The engine is the only producer. `publish` waits while the channel is
//! full, so a slow observer slows the engine down; events are never dropped
//! to avoid blocking.

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::ProgressEvent;

/// Create a sink with room for `capacity` undelivered events.
pub fn channel(capacity: usize) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSink {
            tx,
            observer_gone: false,
        },
        rx,
    )
}

pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    observer_gone: bool,
}

impl ProgressSink {
    /// Deliver an event, waiting for channel capacity if needed.
    ///
    /// If the observer has dropped its receiver the event is discarded; the
    /// checkpoint on disk stays authoritative.
    pub async fn publish(&mut self, event: ProgressEvent) {
        if self.observer_gone {
            return;
        }
        if self.tx.send(event).await.is_err() {
            self.observer_gone = true;
            warn!("Progress observer disconnected; continuing without events");
        }
    }

    pub fn has_observer(&self) -> bool {
        !self.observer_gone
    }
}
