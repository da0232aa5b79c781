use thiserror::Error;

/// The camera could not be acquired, or could not be brought back after degrading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Camera permission was denied")]
    PermissionDenied,
    #[error("No camera device was found")]
    NoDevice,
    #[error("Camera is busy or in use by another application")]
    DeviceBusy,
    #[error("Camera cannot satisfy the requested constraints: {0}")]
    Unsupported(String),
    #[error("Camera stream failed to start: {0}")]
    StartFailed(String),
    #[error("Camera stayed unresponsive after {0} recovery attempts")]
    RecoveryExhausted(u32),
}

impl AcquisitionError {
    /// Returns true if the user has to change something (grant access, free the device)
    /// before a retry can succeed.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            AcquisitionError::PermissionDenied
                | AcquisitionError::NoDevice
                | AcquisitionError::DeviceBusy
        )
    }
}

/// A still frame could not be read from the stream or encoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureEncodeError {
    #[error("No live camera stream to capture from")]
    NoStream,
    #[error("Camera did not provide a frame")]
    NoFrame,
    #[error("Frame buffer has {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),
    #[error("Image encoder produced no output")]
    EmptyOutput,
}

/// The external collaborator rejected a delivered capture.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SubmissionError {
    pub message: String,
}

impl SubmissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for session operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Capture(#[from] CaptureEncodeError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("No capture is waiting for confirmation")]
    NothingToConfirm,
    #[error("A submission is already in flight")]
    SubmissionBusy,
    #[error("Capture session is not running")]
    SessionClosed,
}
