//! Single-in-flight delivery of a captured payload.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::capture::CapturedPayload;
use super::errors::SubmissionError;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Delivered,
    Rejected(SubmissionError),
    /// Another delivery was still in flight; `deliver` was not called.
    Ignored,
}

/// Clears the busy flag on drop, including a delivery future dropped mid-flight.
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                busy: Arc::clone(busy),
            })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Guards the hand-off to the verification collaborator. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct SubmissionGate {
    busy: Arc<AtomicBool>,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the gate without delivering yet. `None` while another delivery runs.
    pub fn try_begin(&self) -> Option<SubmissionPermit> {
        BusyGuard::acquire(&self.busy).map(|guard| SubmissionPermit { _guard: guard })
    }

    /// Deliver `payload` unless a delivery is already running. Never retries.
    pub async fn submit<F, Fut>(&self, payload: CapturedPayload, deliver: F) -> SubmitOutcome
    where
        F: FnOnce(CapturedPayload) -> Fut,
        Fut: Future<Output = Result<(), SubmissionError>>,
    {
        let Some(permit) = self.try_begin() else {
            tracing::debug!(target: "camera", "[SUBMIT] Ignoring submit while busy");
            return SubmitOutcome::Ignored;
        };

        permit.deliver(payload, deliver).await
    }
}

/// Proof that the gate is held. The gate reopens when the permit is dropped.
pub struct SubmissionPermit {
    _guard: BusyGuard,
}

impl SubmissionPermit {
    /// Run one delivery while holding the gate. The gate stays busy until the
    /// permit itself is dropped.
    pub async fn deliver<F, Fut>(&self, payload: CapturedPayload, deliver: F) -> SubmitOutcome
    where
        F: FnOnce(CapturedPayload) -> Fut,
        Fut: Future<Output = Result<(), SubmissionError>>,
    {
        tracing::info!(target: "camera", "[SUBMIT] Delivering capture {}", payload.verification_id);

        match deliver(payload).await {
            Ok(()) => SubmitOutcome::Delivered,
            Err(e) => {
                tracing::warn!(target: "camera", "[SUBMIT] Delivery rejected: {}", e);
                SubmitOutcome::Rejected(e)
            }
        }
    }
}
