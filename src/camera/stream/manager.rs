//! StreamManager - sole owner of the live camera stream.
//!
//! Acquisition is split in two so a caller can await the platform on another task:
//! `begin_acquire()` releases whatever is held and hands out a generation-stamped
//! [`AcquireRequest`]; `complete()` adopts the result only if that generation is still
//! current. Anything that arrives late (after a release or a newer request) is
//! stopped on arrival instead of adopted.

use std::sync::Arc;

use super::health::{HealthCheck, HealthCounter, HealthVerdict, StreamHealth};
use super::{CameraDevice, StreamHandle, VideoStream};
use crate::camera::errors::AcquisitionError;
use crate::camera::types::StreamConstraints;

/// A detached acquisition, safe to await off the owner's task.
pub struct AcquireRequest {
    generation: u64,
    device: Arc<dyn CameraDevice>,
    constraints: StreamConstraints,
}

impl AcquireRequest {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn open(self) -> (u64, Result<Box<dyn VideoStream>, AcquisitionError>) {
        let result = self.device.open(self.constraints).await;
        (self.generation, result)
    }
}

/// How an acquisition result was handled.
#[derive(Debug, PartialEq)]
pub enum Adoption {
    /// The stream is now the live handle.
    Adopted,
    /// The request was superseded or cancelled; any stream that came back was stopped.
    Stale,
    /// The platform refused the request.
    Failed(AcquisitionError),
}

pub struct StreamManager {
    device: Arc<dyn CameraDevice>,
    constraints: StreamConstraints,
    health_check: Box<dyn HealthCheck>,
    counter: HealthCounter,
    current: Option<StreamHandle>,
    generation: u64,
    pending: Option<u64>,
    recreations: u32,
    max_recreations: Option<u32>,
}

impl StreamManager {
    pub fn new(
        device: Arc<dyn CameraDevice>,
        constraints: StreamConstraints,
        health_check: Box<dyn HealthCheck>,
        degraded_threshold: u32,
    ) -> Self {
        Self {
            device,
            constraints,
            health_check,
            counter: HealthCounter::new(degraded_threshold),
            current: None,
            generation: 0,
            pending: None,
            recreations: 0,
            max_recreations: None,
        }
    }

    pub fn with_max_recreations(mut self, max_recreations: Option<u32>) -> Self {
        self.max_recreations = max_recreations;
        self
    }

    pub fn current(&self) -> Option<&StreamHandle> {
        self.current.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_acquiring(&self) -> bool {
        self.pending.is_some()
    }

    pub fn health_counter(&self) -> HealthCounter {
        self.counter
    }

    /// Recreations since the last user-initiated acquisition.
    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    /// Start a fresh acquisition. Releases the current stream first.
    pub fn begin_acquire(&mut self) -> AcquireRequest {
        self.recreations = 0;
        self.next_request()
    }

    /// Start a self-healing recreation. Releases the current stream first.
    pub fn begin_recreate(&mut self) -> AcquireRequest {
        self.recreations += 1;
        tracing::info!(target: "camera", "[STREAM] Recreating stream (attempt {})", self.recreations);
        self.next_request()
    }

    fn next_request(&mut self) -> AcquireRequest {
        self.release();
        self.generation += 1;
        self.pending = Some(self.generation);

        AcquireRequest {
            generation: self.generation,
            device: Arc::clone(&self.device),
            constraints: self.constraints,
        }
    }

    /// Hand the result of an [`AcquireRequest`] back to the manager.
    pub fn complete(
        &mut self,
        generation: u64,
        result: Result<Box<dyn VideoStream>, AcquisitionError>,
    ) -> Adoption {
        if self.pending != Some(generation) {
            if let Ok(stream) = result {
                tracing::info!(target: "camera", "[STREAM] Dropping late stream {} (generation {})", stream.id(), generation);
                StreamHandle::new(stream, generation).release();
            }
            return Adoption::Stale;
        }

        self.pending = None;

        match result {
            Ok(stream) => {
                tracing::info!(target: "camera", "[STREAM] Stream acquired: id={}, generation={}", stream.id(), generation);
                self.current = Some(StreamHandle::new(stream, generation));
                self.counter.reset();
                Adoption::Adopted
            }
            Err(e) => {
                tracing::warn!(target: "camera", "[STREAM] Acquisition failed: {}", e);
                Adoption::Failed(e)
            }
        }
    }

    /// Acquire and adopt in one step.
    pub async fn acquire(&mut self) -> Result<&StreamHandle, AcquisitionError> {
        let request = self.begin_acquire();
        self.finish(request).await
    }

    /// Release and acquire again in one step. Resets the health counter on success.
    pub async fn recreate(&mut self) -> Result<&StreamHandle, AcquisitionError> {
        let request = self.begin_recreate();
        self.finish(request).await
    }

    async fn finish(&mut self, request: AcquireRequest) -> Result<&StreamHandle, AcquisitionError> {
        let (generation, result) = request.open().await;
        match self.complete(generation, result) {
            Adoption::Adopted => self.current.as_ref().ok_or_else(|| {
                AcquisitionError::StartFailed("stream vanished after adoption".to_string())
            }),
            Adoption::Failed(e) => Err(e),
            Adoption::Stale => Err(AcquisitionError::StartFailed(
                "acquisition was superseded".to_string(),
            )),
        }
    }

    /// Stop the current stream and forget any in-flight acquisition. Idempotent.
    pub fn release(&mut self) {
        self.pending = None;
        if let Some(mut handle) = self.current.take() {
            handle.release();
        }
        self.counter.reset();
    }

    /// Run one health check against the current stream.
    pub fn check_health(&mut self) -> HealthVerdict {
        let Some(handle) = self.current.as_ref() else {
            return HealthVerdict::Idle;
        };

        let health = self.health_check.check(handle);
        if let StreamHealth::Degraded(reason) = health {
            tracing::debug!(target: "camera", "[STREAM] Health check degraded: {} ({} of {})",
                reason, self.counter.value() + 1, self.counter.threshold());
        }

        if !self.counter.record(health) {
            return match health {
                StreamHealth::Healthy => HealthVerdict::Healthy,
                StreamHealth::Degraded(_) => HealthVerdict::Degraded {
                    consecutive: self.counter.value(),
                },
            };
        }

        if let Some(max) = self.max_recreations {
            if self.recreations >= max {
                tracing::error!(target: "camera", "[STREAM] Recreation ceiling reached ({})", max);
                return HealthVerdict::Exhausted {
                    attempts: self.recreations,
                };
            }
        }

        HealthVerdict::RecreateNeeded
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.release();
    }
}
