//! Pure state machine for the capture session lifecycle.
//!
//! `(State, Event) -> (NewState, Vec<SideEffect>)`
//!
//! Invalid transitions return the current state with no effects. The coordinator
//! executes the effects; nothing here touches the camera.

use serde::Serialize;

use crate::camera::errors::{AcquisitionError, CaptureEncodeError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CaptureState {
    /// Initial state, and where cancel/retake/retry land. An acquisition may be pending.
    #[default]
    AwaitingPermission,

    /// Stream is up and supervised; waiting for the user to arm.
    Live,

    /// Counting down to an automatic capture.
    CountdownArmed { remaining: u32 },

    /// Grabbing and encoding the frame.
    Processing,

    /// A capture is ready for preview and confirmation.
    Verified,

    /// Something surfaced to the user. Stream is released.
    Failed { reason: String },
}

impl CaptureState {
    /// States in which the session may hold a stream.
    pub fn holds_stream(&self) -> bool {
        matches!(
            self,
            CaptureState::AwaitingPermission
                | CaptureState::Live
                | CaptureState::CountdownArmed { .. }
                | CaptureState::Processing
                | CaptureState::Verified
        )
    }

    /// States in which the stream is health-checked.
    pub fn is_supervised(&self) -> bool {
        matches!(self, CaptureState::Live | CaptureState::CountdownArmed { .. })
    }

    pub fn countdown(&self) -> Option<u32> {
        match self {
            CaptureState::CountdownArmed { remaining } => Some(*remaining),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::AwaitingPermission => "awaiting-permission",
            CaptureState::Live => "live",
            CaptureState::CountdownArmed { .. } => "countdown-armed",
            CaptureState::Processing => "processing",
            CaptureState::Verified => "verified",
            CaptureState::Failed { .. } => "failed",
        }
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Host asked for the camera.
    StartRequested,

    /// A stream was adopted (first acquisition or recreation).
    StreamAcquired,

    /// Acquisition, recreation, or recovery failed.
    AcquisitionFailed { error: AcquisitionError },

    /// User asked to arm; `ready` is the readiness signal at that moment.
    ArmRequested { ready: bool, countdown: u32 },

    /// One second of countdown elapsed.
    CountdownTick,

    /// Health checks crossed the threshold.
    StreamDegraded,

    CaptureSucceeded,

    CaptureFailed { error: CaptureEncodeError },

    RetakeRequested,

    RetryRequested,

    CancelRequested,
}

/// Side effects triggered by state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Release anything held and request a new stream.
    AcquireStream,

    /// Release and re-request the stream to recover from degradation.
    RecreateStream,

    /// Stop all tracks and forget any in-flight acquisition.
    ReleaseStream,

    /// Start the readiness watcher for the current stream.
    WatchReadiness,

    StartCountdown,

    StopCountdown,

    /// Read and encode one frame; feeds back CaptureSucceeded/CaptureFailed.
    CaptureFrame,

    /// Drop the captured payload and its preview.
    DiscardPayload,

    NotifyError { message: String },

    NotifyCancel,

    EmitStateChange { state: CaptureState },
}

/// Pure state transition function.
pub fn transition(state: CaptureState, event: SessionEvent) -> (CaptureState, Vec<SideEffect>) {
    match (&state, event) {
        // AwaitingPermission + StartRequested -> AwaitingPermission (acquiring)
        (CaptureState::AwaitingPermission, SessionEvent::StartRequested) => {
            (state, vec![SideEffect::AcquireStream])
        }

        // AwaitingPermission + StreamAcquired -> Live
        (CaptureState::AwaitingPermission, SessionEvent::StreamAcquired) => {
            let new_state = CaptureState::Live;
            let effects = vec![
                SideEffect::WatchReadiness,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Live + StreamAcquired -> Live (recreated stream needs fresh readiness)
        (CaptureState::Live, SessionEvent::StreamAcquired) => {
            (state, vec![SideEffect::WatchReadiness])
        }

        // AwaitingPermission/Live/CountdownArmed + AcquisitionFailed -> Failed
        (
            CaptureState::AwaitingPermission
            | CaptureState::Live
            | CaptureState::CountdownArmed { .. },
            SessionEvent::AcquisitionFailed { error },
        ) => fail(error.to_string()),

        // Live + ArmRequested(ready) -> CountdownArmed
        (CaptureState::Live, SessionEvent::ArmRequested { ready: true, countdown }) => {
            let new_state = CaptureState::CountdownArmed {
                remaining: countdown.max(1),
            };
            let effects = vec![
                SideEffect::StartCountdown,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // CountdownArmed + CountdownTick -> CountdownArmed (n-1) or Processing
        (CaptureState::CountdownArmed { remaining }, SessionEvent::CountdownTick) => {
            if *remaining > 1 {
                let new_state = CaptureState::CountdownArmed {
                    remaining: remaining - 1,
                };
                let effects = vec![SideEffect::EmitStateChange {
                    state: new_state.clone(),
                }];
                (new_state, effects)
            } else {
                let new_state = CaptureState::Processing;
                let effects = vec![
                    SideEffect::StopCountdown,
                    SideEffect::EmitStateChange {
                        state: new_state.clone(),
                    },
                    SideEffect::CaptureFrame,
                ];
                (new_state, effects)
            }
        }

        // Live + StreamDegraded -> Live (recreating)
        (CaptureState::Live, SessionEvent::StreamDegraded) => {
            (state, vec![SideEffect::RecreateStream])
        }

        // CountdownArmed + StreamDegraded -> Live (countdown would read from a replaced stream)
        (CaptureState::CountdownArmed { .. }, SessionEvent::StreamDegraded) => {
            let new_state = CaptureState::Live;
            let effects = vec![
                SideEffect::StopCountdown,
                SideEffect::RecreateStream,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Processing + CaptureSucceeded -> Verified
        (CaptureState::Processing, SessionEvent::CaptureSucceeded) => {
            let new_state = CaptureState::Verified;
            let effects = vec![SideEffect::EmitStateChange {
                state: new_state.clone(),
            }];
            (new_state, effects)
        }

        // Processing + CaptureFailed -> Failed
        (CaptureState::Processing, SessionEvent::CaptureFailed { error }) => {
            fail(error.to_string())
        }

        // Verified + RetakeRequested -> AwaitingPermission (re-acquiring)
        (CaptureState::Verified, SessionEvent::RetakeRequested) => {
            let new_state = CaptureState::AwaitingPermission;
            let effects = vec![
                SideEffect::ReleaseStream,
                SideEffect::DiscardPayload,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
                SideEffect::AcquireStream,
            ];
            (new_state, effects)
        }

        // Failed + RetryRequested -> AwaitingPermission (re-acquiring)
        (CaptureState::Failed { .. }, SessionEvent::RetryRequested) => {
            let new_state = CaptureState::AwaitingPermission;
            let effects = vec![
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
                SideEffect::AcquireStream,
            ];
            (new_state, effects)
        }

        // Any + CancelRequested -> AwaitingPermission
        (_, SessionEvent::CancelRequested) => {
            let new_state = CaptureState::AwaitingPermission;
            let effects = vec![
                SideEffect::StopCountdown,
                SideEffect::ReleaseStream,
                SideEffect::DiscardPayload,
                SideEffect::NotifyCancel,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}

fn fail(reason: String) -> (CaptureState, Vec<SideEffect>) {
    let new_state = CaptureState::Failed {
        reason: reason.clone(),
    };
    let effects = vec![
        SideEffect::StopCountdown,
        SideEffect::ReleaseStream,
        SideEffect::NotifyError { message: reason },
        SideEffect::EmitStateChange {
            state: new_state.clone(),
        },
    ];
    (new_state, effects)
}
