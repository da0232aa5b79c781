pub mod capture;
pub mod errors;
pub mod readiness;
pub mod session;
pub mod stream;
pub mod submission;
pub mod types;
pub mod verification;

pub use capture::{CapturedPayload, FrameCapturer};
pub use errors::{AcquisitionError, CaptureEncodeError, SessionError, SubmissionError};
pub use readiness::{DelayedReadiness, ReadinessSignal, ReadinessSource};
pub use session::{
    CaptureResult, CaptureState, SessionConfig, SessionCoordinator, SessionHandle,
    SessionObserver, SessionStatus,
};
pub use stream::{CameraDevice, StreamHandle, StreamManager, SyntheticCamera, VideoStream};
pub use submission::{SubmissionGate, SubmitOutcome};
pub use types::{FacingMode, Frame, StreamConstraints};
pub use verification::{AccessToken, VerificationError, VerificationStatus, Verifier, VerifierObserver};
