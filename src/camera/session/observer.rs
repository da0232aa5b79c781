//! Host callbacks for a capture session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::camera::capture::CapturedPayload;
use crate::camera::errors::SubmissionError;

/// What the host receives when the user confirms a capture.
#[derive(Clone, PartialEq)]
pub struct CaptureResult {
    /// JPEG bytes.
    pub image: Vec<u8>,
    pub verification_id: String,
    pub captured_at: DateTime<Utc>,
}

impl std::fmt::Debug for CaptureResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureResult")
            .field("bytes", &self.image.len())
            .field("verification_id", &self.verification_id)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

impl From<CapturedPayload> for CaptureResult {
    fn from(payload: CapturedPayload) -> Self {
        Self {
            image: payload.image,
            verification_id: payload.verification_id,
            captured_at: payload.captured_at,
        }
    }
}

/// Receives the session's outcomes.
///
/// `on_error` and `on_cancel` are called from the session task and must not block.
/// `on_capture` runs on its own task; an `Err` keeps the capture for another confirm.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_capture(&self, result: CaptureResult) -> Result<(), SubmissionError>;

    fn on_error(&self, message: &str);

    fn on_cancel(&self);
}
