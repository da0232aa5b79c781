//! Heuristic liveness checks for an acquired stream.
//!
//! A camera can go dark without reporting an error (power saving, the device
//! being reclaimed by another process). The check is a swappable heuristic; the
//! counter turns repeated bad checks into a single recreation request.

use super::StreamHandle;

/// Why a stream looked non-productive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    NoLiveTrack,
    NotPlaying,
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradedReason::NoLiveTrack => write!(f, "no live track"),
            DegradedReason::NotPlaying => write!(f, "playback paused"),
        }
    }
}

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Healthy,
    Degraded(DegradedReason),
}

pub trait HealthCheck: Send + Sync {
    fn check(&self, handle: &StreamHandle) -> StreamHealth;
}

/// Degraded when the stream has no live track or playback is not running.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackActivityCheck;

impl HealthCheck for TrackActivityCheck {
    fn check(&self, handle: &StreamHandle) -> StreamHealth {
        let stream = handle.stream();
        if stream.live_tracks() == 0 {
            StreamHealth::Degraded(DegradedReason::NoLiveTrack)
        } else if !stream.is_playing() {
            StreamHealth::Degraded(DegradedReason::NotPlaying)
        } else {
            StreamHealth::Healthy
        }
    }
}

/// What the manager concluded from a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Bad check below the threshold.
    Degraded { consecutive: u32 },
    /// Threshold reached; the stream must be recreated. The counter is already reset.
    RecreateNeeded,
    /// Threshold reached but the recreation ceiling is spent.
    Exhausted { attempts: u32 },
    /// Nothing to check (no stream, or one is being acquired).
    Idle,
}

/// Consecutive degraded checks since the last acquisition or healthy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCounter {
    consecutive: u32,
    threshold: u32,
}

impl HealthCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn value(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Record one check. Returns true when the threshold is reached, in which case
    /// the counter starts over.
    pub fn record(&mut self, health: StreamHealth) -> bool {
        match health {
            StreamHealth::Healthy => {
                self.consecutive = 0;
                false
            }
            StreamHealth::Degraded(_) => {
                self.consecutive += 1;
                if self.consecutive >= self.threshold {
                    self.consecutive = 0;
                    true
                } else {
                    false
                }
            }
        }
    }
}
