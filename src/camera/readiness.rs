//! Readiness ("subject present") signal that gates arming a capture.
//!
//! The session starts one watcher per acquired stream and stops it when the
//! stream goes away. Updates are stamped with the stream generation so a late
//! signal from an old stream is ignored.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One readiness change for a given stream generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessUpdate {
    pub generation: u64,
    pub ready: bool,
}

/// Write side handed to a [`ReadinessSource`].
#[derive(Debug, Clone)]
pub struct ReadinessSignal {
    generation: u64,
    tx: mpsc::UnboundedSender<ReadinessUpdate>,
}

impl ReadinessSignal {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ReadinessUpdate>) -> Self {
        Self { generation, tx }
    }

    /// Publish a change. Returns false once the session is gone.
    pub fn set(&self, ready: bool) -> bool {
        self.tx
            .send(ReadinessUpdate {
                generation: self.generation,
                ready,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Produces readiness for one stream. `watch` runs until it returns or the
/// session aborts it; it may flip the signal any number of times.
#[async_trait]
pub trait ReadinessSource: Send + Sync {
    async fn watch(&self, stream_id: String, signal: ReadinessSignal);
}

/// Reports ready a fixed delay after the stream comes up. Stand-in for a
/// presence detector.
#[derive(Debug, Clone, Copy)]
pub struct DelayedReadiness {
    delay: Duration,
}

impl DelayedReadiness {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayedReadiness {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReadinessSource for DelayedReadiness {
    async fn watch(&self, stream_id: String, signal: ReadinessSignal) {
        tokio::time::sleep(self.delay).await;
        tracing::debug!(target: "camera", "[READINESS] Subject ready on stream {}", stream_id);
        signal.set(true);
    }
}
