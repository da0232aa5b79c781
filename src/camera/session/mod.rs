//! Capture session: the state machine, the actor that runs it, and the host contract.

pub mod coordinator;
pub mod observer;
pub mod state;

pub use coordinator::{SessionConfig, SessionCoordinator, SessionHandle, SessionStatus};
pub use observer::{CaptureResult, SessionObserver};
pub use state::CaptureState;
