//! Live camera stream ownership and supervision.
//!
//! A platform backend implements [`CameraDevice`] and hands out [`VideoStream`]s.
//! The [`StreamManager`] wraps each one in a [`StreamHandle`], which stops the
//! underlying tracks when released or dropped.

pub mod health;
pub mod manager;
pub mod synthetic;

pub use health::{HealthCheck, HealthCounter, HealthVerdict, StreamHealth, TrackActivityCheck};
pub use manager::{AcquireRequest, StreamManager};
pub use synthetic::{SyntheticCamera, SyntheticStream};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::AcquisitionError;
use super::types::{Frame, StreamConstraints};

/// Platform camera access. `open` may suspend while the user answers a permission prompt.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(
        &self,
        constraints: StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, AcquisitionError>;
}

/// An acquired video stream and its hardware tracks.
pub trait VideoStream: Send + Sync {
    fn id(&self) -> &str;

    /// Number of tracks still producing media.
    fn live_tracks(&self) -> usize;

    /// Whether playback is running (not paused by the platform).
    fn is_playing(&self) -> bool;

    /// Snapshot of the most recent frame, if the stream has rendered one.
    fn current_frame(&self) -> Option<Frame>;

    /// Stop every track. Must be safe to call more than once.
    fn stop(&self);
}

/// Exclusive ownership of one acquired stream.
pub struct StreamHandle {
    stream: Box<dyn VideoStream>,
    generation: u64,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.stream.id())
            .field("generation", &self.generation)
            .field("acquired_at", &self.acquired_at)
            .field("released", &self.released)
            .finish()
    }
}

impl StreamHandle {
    pub(crate) fn new(stream: Box<dyn VideoStream>, generation: u64) -> Self {
        Self {
            stream,
            generation,
            acquired_at: Utc::now(),
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        self.stream.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn stream(&self) -> &dyn VideoStream {
        self.stream.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop all tracks. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stream.stop();
        tracing::debug!(target: "camera", "[STREAM] Released stream {} (generation {})", self.stream.id(), self.generation);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}
