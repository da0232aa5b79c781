//! SessionCoordinator - single owner actor for the capture session.
//!
//! The coordinator owns the stream manager, the countdown, the readiness watcher
//! and the captured payload, and feeds everything through the state machine.
//! Nothing else mutates session state.
//!
//! Architecture:
//! - The host sends Commands via a cloneable SessionHandle
//! - Spawned workers (acquisition, encoding, delivery) report back as WorkerEvents
//! - The readiness source reports through its own channel, stamped by stream generation
//! - Countdown (1s) and health (configurable) ticks come from tokio intervals
//! - Hosts observe SessionStatus through a watch channel

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::observer::SessionObserver;
use super::state::{transition, CaptureState, SessionEvent, SideEffect};
use crate::camera::capture::{CapturedPayload, FrameCapturer};
use crate::camera::errors::{AcquisitionError, CaptureEncodeError, SessionError};
use crate::camera::readiness::{DelayedReadiness, ReadinessSignal, ReadinessSource, ReadinessUpdate};
use crate::camera::stream::manager::Adoption;
use crate::camera::stream::{
    AcquireRequest, CameraDevice, HealthCheck, HealthVerdict, StreamManager, TrackActivityCheck,
    VideoStream,
};
use crate::camera::submission::{SubmissionGate, SubmissionPermit, SubmitOutcome};
use crate::core::settings::CaptureSettings;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Commands sent from the host to the coordinator.
#[derive(Debug)]
enum Command {
    Start {
        response_tx: oneshot::Sender<()>,
    },
    Arm {
        response_tx: oneshot::Sender<bool>,
    },
    Cancel {
        response_tx: oneshot::Sender<()>,
    },
    Retake {
        response_tx: oneshot::Sender<()>,
    },
    Retry {
        response_tx: oneshot::Sender<()>,
    },
    Confirm {
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Status {
        response_tx: oneshot::Sender<SessionStatus>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Events sent from spawned workers to the coordinator.
enum WorkerEvent {
    StreamOpened {
        generation: u64,
        result: Result<Box<dyn VideoStream>, AcquisitionError>,
    },
    FrameEncoded {
        attempt: u64,
        result: Result<CapturedPayload, CaptureEncodeError>,
    },
    SubmissionFinished {
        /// Held until the outcome is applied so a confirm can't slip in between.
        permit: SubmissionPermit,
        verification_id: String,
        outcome: SubmitOutcome,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Session status for hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: CaptureState,
    pub ready: bool,
    pub countdown: Option<u32>,
    pub stream_live: bool,
    pub acquiring: bool,
    /// `data:` URI of the capture awaiting confirmation.
    pub preview: Option<String>,
    pub verification_id: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub submitting: bool,
    pub error: Option<String>,
    /// Set on failure when retrying is pointless until the user grants access or frees the camera.
    pub needs_user_action: bool,
    pub recreations: u32,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            state: CaptureState::AwaitingPermission,
            ready: false,
            countdown: None,
            stream_live: false,
            acquiring: false,
            preview: None,
            verification_id: None,
            captured_at: None,
            submitting: false,
            error: None,
            needs_user_action: false,
            recreations: 0,
        }
    }
}

/// Everything a session needs from its host.
pub struct SessionConfig {
    pub settings: CaptureSettings,
    pub device: Arc<dyn CameraDevice>,
    pub observer: Arc<dyn SessionObserver>,
    /// Defaults to [`DelayedReadiness`] with the configured delay.
    pub readiness: Option<Arc<dyn ReadinessSource>>,
    /// Defaults to [`TrackActivityCheck`].
    pub health_check: Option<Box<dyn HealthCheck>>,
}

impl SessionConfig {
    pub fn new(device: Arc<dyn CameraDevice>, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            settings: CaptureSettings::default(),
            device,
            observer,
            readiness: None,
            health_check: None,
        }
    }

    pub fn with_settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_readiness(mut self, readiness: Arc<dyn ReadinessSource>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn with_health_check(mut self, health_check: Box<dyn HealthCheck>) -> Self {
        self.health_check = Some(health_check);
        self
    }
}

pub struct SessionCoordinator {
    state: CaptureState,
    streams: StreamManager,
    capturer: FrameCapturer,
    gate: SubmissionGate,
    payload: Option<CapturedPayload>,
    capture_attempt: u64,
    countdown_seconds: u32,
    countdown: Option<Interval>,
    health: Interval,
    ready: bool,
    needs_user_action: bool,
    readiness: Arc<dyn ReadinessSource>,
    readiness_task: Option<JoinHandle<()>>,
    observer: Arc<dyn SessionObserver>,
    status_tx: watch::Sender<SessionStatus>,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<WorkerEvent>,
    event_tx: mpsc::Sender<WorkerEvent>,
    readiness_rx: mpsc::UnboundedReceiver<ReadinessUpdate>,
    readiness_tx: mpsc::UnboundedSender<ReadinessUpdate>,
}

impl SessionCoordinator {
    /// Build a coordinator and its handle. Must be called inside a Tokio runtime.
    pub fn new(config: SessionConfig) -> (Self, SessionHandle) {
        let settings = config.settings.sanitized();

        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (readiness_tx, readiness_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());

        let health_check = config
            .health_check
            .unwrap_or_else(|| Box::new(TrackActivityCheck));
        let streams = StreamManager::new(
            config.device,
            settings.constraints(),
            health_check,
            settings.degraded_threshold,
        )
        .with_max_recreations(settings.max_recreations);

        let readiness = config
            .readiness
            .unwrap_or_else(|| Arc::new(DelayedReadiness::new(settings.readiness_delay())));

        let period = settings.health_interval();
        let mut health = interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let coordinator = Self {
            state: CaptureState::AwaitingPermission,
            streams,
            capturer: FrameCapturer::new(settings.jpeg_quality),
            gate: SubmissionGate::new(),
            payload: None,
            capture_attempt: 0,
            countdown_seconds: settings.countdown_seconds,
            countdown: None,
            health,
            ready: false,
            needs_user_action: false,
            readiness,
            readiness_task: None,
            observer: config.observer,
            status_tx,
            command_rx,
            event_rx,
            event_tx,
            readiness_rx,
            readiness_tx,
        };

        let handle = SessionHandle {
            command_tx,
            status_rx,
        };

        (coordinator, handle)
    }

    /// Build a coordinator and run it on a new task.
    pub fn spawn(config: SessionConfig) -> SessionHandle {
        let (coordinator, handle) = Self::new(config);
        tokio::spawn(coordinator.run());
        handle
    }

    /// Main event loop. Runs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(target: "camera", "[SESSION] Starting event loop");

        let mut shutdown_tx = None;

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown { response_tx }) => {
                            tracing::info!(target: "camera", "[SESSION] Shutdown requested");
                            shutdown_tx = Some(response_tx);
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            tracing::info!(target: "camera", "[SESSION] All handles dropped, shutting down");
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_worker_event(event);
                }
                Some(update) = self.readiness_rx.recv() => {
                    self.handle_readiness(update);
                }
                _ = next_tick(&mut self.countdown) => {
                    self.apply(SessionEvent::CountdownTick);
                }
                _ = self.health.tick(), if self.state.is_supervised() => {
                    self.run_health_check();
                }
            }

            self.publish_status();
        }

        self.cleanup();

        if let Some(response_tx) = shutdown_tx {
            let _ = response_tx.send(());
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { response_tx } => {
                if self.streams.is_live() || self.streams.is_acquiring() {
                    tracing::debug!(target: "camera", "[SESSION] Start ignored, stream already live or pending");
                } else {
                    self.apply(SessionEvent::StartRequested);
                }
                let _ = response_tx.send(());
            }
            Command::Arm { response_tx } => {
                let was_live = self.state == CaptureState::Live;
                self.apply(SessionEvent::ArmRequested {
                    ready: self.ready,
                    countdown: self.countdown_seconds,
                });
                let armed = was_live && matches!(self.state, CaptureState::CountdownArmed { .. });
                if !armed {
                    tracing::debug!(target: "camera", "[SESSION] Arm ignored (state={}, ready={})",
                        self.state.name(), self.ready);
                }
                let _ = response_tx.send(armed);
            }
            Command::Cancel { response_tx } => {
                self.apply(SessionEvent::CancelRequested);
                let _ = response_tx.send(());
            }
            Command::Retake { response_tx } => {
                self.apply(SessionEvent::RetakeRequested);
                let _ = response_tx.send(());
            }
            Command::Retry { response_tx } => {
                self.apply(SessionEvent::RetryRequested);
                let _ = response_tx.send(());
            }
            Command::Confirm { response_tx } => {
                self.handle_confirm(response_tx);
            }
            Command::Status { response_tx } => {
                let _ = response_tx.send(self.status());
            }
            Command::Shutdown { response_tx } => {
                // Intercepted by the run loop
                let _ = response_tx.send(());
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::StreamOpened { generation, result } => {
                match self.streams.complete(generation, result) {
                    Adoption::Adopted => {
                        self.health.reset();
                        self.apply(SessionEvent::StreamAcquired);
                    }
                    Adoption::Stale => {}
                    Adoption::Failed(error) => {
                        self.apply(SessionEvent::AcquisitionFailed { error });
                    }
                }
            }
            WorkerEvent::FrameEncoded { attempt, result } => {
                if attempt != self.capture_attempt || self.state != CaptureState::Processing {
                    tracing::debug!(target: "camera", "[SESSION] Discarding stale capture result (attempt {})", attempt);
                    return;
                }
                match result {
                    Ok(payload) => {
                        tracing::info!(target: "camera", "[SESSION] Capture ready: {}", payload.verification_id);
                        self.payload = Some(payload);
                        self.apply(SessionEvent::CaptureSucceeded);
                    }
                    Err(error) => {
                        self.apply(SessionEvent::CaptureFailed { error });
                    }
                }
            }
            WorkerEvent::SubmissionFinished {
                permit,
                verification_id,
                outcome,
                response_tx,
            } => {
                let result = match outcome {
                    SubmitOutcome::Delivered => {
                        if self
                            .payload
                            .as_ref()
                            .is_some_and(|p| p.verification_id == verification_id)
                        {
                            self.payload = None;
                        }
                        Ok(())
                    }
                    SubmitOutcome::Rejected(e) => Err(SessionError::Submission(e)),
                    SubmitOutcome::Ignored => Err(SessionError::SubmissionBusy),
                };
                drop(permit);
                let _ = response_tx.send(result);
            }
        }
    }

    fn handle_readiness(&mut self, update: ReadinessUpdate) {
        let current = self.streams.current().map(|h| h.generation());
        if current != Some(update.generation) || !self.state.holds_stream() {
            tracing::debug!(target: "camera", "[SESSION] Ignoring readiness for generation {}", update.generation);
            return;
        }
        if self.ready != update.ready {
            tracing::info!(target: "camera", "[SESSION] Readiness changed: {}", update.ready);
        }
        self.ready = update.ready;
    }

    fn handle_confirm(&mut self, response_tx: oneshot::Sender<Result<(), SessionError>>) {
        let payload = match (&self.state, &self.payload) {
            (CaptureState::Verified, Some(payload)) => payload.clone(),
            _ => {
                let _ = response_tx.send(Err(SessionError::NothingToConfirm));
                return;
            }
        };

        let Some(permit) = self.gate.try_begin() else {
            tracing::debug!(target: "camera", "[SESSION] Confirm ignored, submission in flight");
            let _ = response_tx.send(Err(SessionError::SubmissionBusy));
            return;
        };

        let observer = Arc::clone(&self.observer);
        let event_tx = self.event_tx.clone();
        let verification_id = payload.verification_id.clone();

        tokio::spawn(async move {
            let outcome = permit
                .deliver(payload, |p| async move { observer.on_capture(p.into()).await })
                .await;
            let _ = event_tx
                .send(WorkerEvent::SubmissionFinished {
                    permit,
                    verification_id,
                    outcome,
                    response_tx,
                })
                .await;
        });
    }

    fn run_health_check(&mut self) {
        match self.streams.check_health() {
            HealthVerdict::RecreateNeeded => {
                tracing::warn!(target: "camera", "[SESSION] Stream degraded, recreating");
                self.apply(SessionEvent::StreamDegraded);
            }
            HealthVerdict::Exhausted { attempts } => {
                self.apply(SessionEvent::AcquisitionFailed {
                    error: AcquisitionError::RecoveryExhausted(attempts),
                });
            }
            HealthVerdict::Healthy | HealthVerdict::Degraded { .. } | HealthVerdict::Idle => {}
        }
    }

    /// Run an event and every follow-up event its effects produce.
    fn apply(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        let mut entered_supervised = false;

        while let Some(event) = queue.pop_front() {
            let from = self.state.name();
            let adopted = matches!(event, SessionEvent::StreamAcquired);
            let needs_user_action = match &event {
                SessionEvent::AcquisitionFailed { error } => error.needs_user_action(),
                _ => false,
            };
            let (new_state, effects) = transition(std::mem::take(&mut self.state), event);
            self.state = new_state;

            if from != self.state.name() {
                tracing::info!(target: "camera", "[SESSION] {} -> {}", from, self.state.name());
                if matches!(self.state, CaptureState::Failed { .. }) {
                    self.needs_user_action = needs_user_action;
                }
            }
            if self.state.is_supervised() && (adopted || from != self.state.name()) {
                entered_supervised = true;
            }

            for effect in effects {
                if let Some(follow_up) = self.execute_effect(effect) {
                    queue.push_back(follow_up);
                }
            }
        }

        // A stream must never outlive a state that doesn't hold one
        if !self.state.holds_stream() && (self.streams.is_live() || self.streams.is_acquiring()) {
            tracing::warn!(target: "camera", "[SESSION] Releasing stream left over in {}", self.state.name());
            self.release_stream();
        }

        // Entering Live or CountdownArmed, or adopting a stream there, checks right away.
        // A recreation releases the stream first, so any nested check comes back Idle.
        if entered_supervised && self.state.is_supervised() {
            self.run_health_check();
        }
    }

    fn execute_effect(&mut self, effect: SideEffect) -> Option<SessionEvent> {
        match effect {
            SideEffect::AcquireStream => {
                self.stop_readiness();
                let request = self.streams.begin_acquire();
                self.spawn_acquisition(request);
            }
            SideEffect::RecreateStream => {
                self.stop_readiness();
                let request = self.streams.begin_recreate();
                self.spawn_acquisition(request);
            }
            SideEffect::ReleaseStream => {
                self.release_stream();
            }
            SideEffect::WatchReadiness => {
                self.watch_readiness();
            }
            SideEffect::StartCountdown => {
                let mut countdown = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
                countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.countdown = Some(countdown);
            }
            SideEffect::StopCountdown => {
                self.countdown = None;
            }
            SideEffect::CaptureFrame => {
                return self.capture_frame();
            }
            SideEffect::DiscardPayload => {
                self.payload = None;
            }
            SideEffect::NotifyError { message } => {
                tracing::error!(target: "camera", "[SESSION] {}", message);
                self.observer.on_error(&message);
            }
            SideEffect::NotifyCancel => {
                self.observer.on_cancel();
            }
            SideEffect::EmitStateChange { state } => {
                tracing::debug!(target: "camera", "[SESSION] Emitting state change: {:?}", state);
                self.publish_status();
            }
        }
        None
    }

    fn spawn_acquisition(&self, request: AcquireRequest) {
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let (generation, result) = request.open().await;
            let sent = event_tx
                .send(WorkerEvent::StreamOpened { generation, result })
                .await;

            // Session is gone: nobody will adopt this stream
            if let Err(mpsc::error::SendError(WorkerEvent::StreamOpened {
                result: Ok(stream),
                ..
            })) = sent
            {
                stream.stop();
            }
        });
    }

    fn release_stream(&mut self) {
        self.stop_readiness();
        self.streams.release();
    }

    fn watch_readiness(&mut self) {
        self.stop_readiness();

        let Some(handle) = self.streams.current() else {
            return;
        };

        let signal = ReadinessSignal::new(handle.generation(), self.readiness_tx.clone());
        let stream_id = handle.id().to_string();
        let source = Arc::clone(&self.readiness);

        self.readiness_task = Some(tokio::spawn(async move {
            source.watch(stream_id, signal).await;
        }));
    }

    fn stop_readiness(&mut self) {
        self.ready = false;
        if let Some(task) = self.readiness_task.take() {
            task.abort();
        }
    }

    /// Read the frame now; encode it off the session task.
    fn capture_frame(&mut self) -> Option<SessionEvent> {
        let frame = match self.capturer.read_frame(self.streams.current()) {
            Ok(frame) => frame,
            Err(error) => return Some(SessionEvent::CaptureFailed { error }),
        };

        self.capture_attempt += 1;
        let attempt = self.capture_attempt;
        let capturer = self.capturer;
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || capturer.encode(frame)).await {
                Ok(result) => result,
                Err(e) => Err(CaptureEncodeError::EncodeFailed(e.to_string())),
            };
            let _ = event_tx
                .send(WorkerEvent::FrameEncoded { attempt, result })
                .await;
        });

        None
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state.clone(),
            ready: self.ready,
            countdown: self.state.countdown(),
            stream_live: self.streams.is_live(),
            acquiring: self.streams.is_acquiring(),
            preview: self.payload.as_ref().map(|p| p.preview.clone()),
            verification_id: self.payload.as_ref().map(|p| p.verification_id.clone()),
            captured_at: self.payload.as_ref().map(|p| p.captured_at),
            submitting: self.gate.is_busy(),
            error: match &self.state {
                CaptureState::Failed { reason } => Some(reason.clone()),
                _ => None,
            },
            needs_user_action: matches!(self.state, CaptureState::Failed { .. })
                && self.needs_user_action,
            recreations: self.streams.recreations(),
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn cleanup(&mut self) {
        tracing::info!(target: "camera", "[SESSION] Cleaning up resources...");

        self.countdown = None;
        self.release_stream();
        self.payload = None;
        self.publish_status();

        tracing::info!(target: "camera", "[SESSION] Cleanup complete");
    }
}

async fn next_tick(countdown: &mut Option<Interval>) -> Instant {
    match countdown {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

/// Handle to send commands to the coordinator. Dropping every clone ends the session.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;

        response_rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Request the camera. Returns once acquisition has begun.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Start { response_tx })
            .await
    }

    /// Arm the countdown. `Ok(false)` when not live or not ready.
    pub async fn arm(&self) -> Result<bool, SessionError> {
        self.request(|response_tx| Command::Arm { response_tx }).await
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Cancel { response_tx })
            .await
    }

    pub async fn retake(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Retake { response_tx })
            .await
    }

    pub async fn retry(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Retry { response_tx })
            .await
    }

    /// Deliver the verified capture to the observer. Resolves when delivery finishes.
    pub async fn confirm(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Confirm { response_tx })
            .await?
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|response_tx| Command::Status { response_tx })
            .await
    }

    /// Last published status, without a round trip.
    pub fn latest(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Stop the session and release the camera.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|response_tx| Command::Shutdown { response_tx })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::errors::SubmissionError;
    use crate::camera::session::observer::CaptureResult;
    use crate::camera::stream::{StreamHealth, SyntheticCamera};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        captures: Mutex<Vec<CaptureResult>>,
        errors: Mutex<Vec<String>>,
        cancels: AtomicU32,
        reject: AtomicBool,
        delivery_delay: Mutex<Duration>,
    }

    impl RecordingObserver {
        fn captures(&self) -> usize {
            self.captures.lock().unwrap().len()
        }

        fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionObserver for RecordingObserver {
        async fn on_capture(&self, result: CaptureResult) -> Result<(), SubmissionError> {
            let delay = *self.delivery_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            self.captures.lock().unwrap().push(result);
            if self.reject.load(Ordering::SeqCst) {
                Err(SubmissionError::new("face not recognised"))
            } else {
                Ok(())
            }
        }

        fn on_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn on_cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn small_settings() -> CaptureSettings {
        CaptureSettings {
            ideal_width: 64,
            ideal_height: 48,
            ..CaptureSettings::default()
        }
    }

    fn spawn_session(
        camera: &SyntheticCamera,
        observer: &Arc<RecordingObserver>,
        settings: CaptureSettings,
    ) -> SessionHandle {
        let config = SessionConfig::new(Arc::new(camera.clone()), observer.clone())
            .with_settings(settings);
        SessionCoordinator::spawn(config)
    }

    async fn wait_until(
        handle: &SessionHandle,
        predicate: impl FnMut(&SessionStatus) -> bool,
    ) -> SessionStatus {
        let mut rx = handle.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session status")
            .expect("session closed")
            .clone();
        status
    }

    async fn go_live(handle: &SessionHandle) -> SessionStatus {
        handle.start().await.unwrap();
        wait_until(handle, |s| s.state == CaptureState::Live && s.ready).await
    }

    async fn go_verified(handle: &SessionHandle) -> SessionStatus {
        go_live(handle).await;
        assert!(handle.arm().await.unwrap());
        wait_until(handle, |s| s.state == CaptureState::Verified).await
    }

    // ============ Arming ============

    #[tokio::test(start_paused = true)]
    async fn test_arm_requires_live_and_ready() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        // Not started yet
        assert!(!handle.arm().await.unwrap());

        handle.start().await.unwrap();
        let status = wait_until(&handle, |s| s.state == CaptureState::Live).await;
        assert!(!status.ready);

        // Live but readiness has not fired
        assert!(!handle.arm().await.unwrap());
        assert_eq!(handle.status().await.unwrap().state, CaptureState::Live);

        wait_until(&handle, |s| s.ready).await;
        assert!(handle.arm().await.unwrap());
        assert_eq!(
            handle.status().await.unwrap().state,
            CaptureState::CountdownArmed { remaining: 3 }
        );

        // Only one countdown at a time
        assert!(!handle.arm().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_captures_exactly_once() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        let status = go_verified(&handle).await;

        assert!(status.preview.unwrap().starts_with("data:image/jpeg;base64,"));
        assert!(status.verification_id.unwrap().starts_with("FV-"));
        assert_eq!(status.countdown, None);
        assert_eq!(camera.latest_stream().unwrap().frames_rendered(), 1);

        // Stream stays up for the preview
        assert!(status.stream_live);
        assert_eq!(camera.live_streams(), 1);

        // onCapture only fires on confirm
        assert_eq!(observer.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frame_fails_once_and_releases() {
        let camera = SyntheticCamera::new();
        camera.start_streams_blank(true);
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_live(&handle).await;
        assert!(handle.arm().await.unwrap());

        let status =
            wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;

        assert_eq!(status.preview, None);
        assert_eq!(status.error.as_deref(), Some("Camera did not provide a frame"));
        assert!(!status.needs_user_action);
        assert_eq!(observer.errors().len(), 1);
        assert_eq!(camera.live_streams(), 0);
    }

    // ============ Acquisition ============

    #[tokio::test(start_paused = true)]
    async fn test_denied_permission_fails_and_retry_recovers() {
        let camera = SyntheticCamera::new();
        camera.deny(AcquisitionError::PermissionDenied);
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        handle.start().await.unwrap();
        let status =
            wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;
        assert_eq!(status.error.as_deref(), Some("Camera permission was denied"));
        assert!(status.needs_user_action);
        assert_eq!(observer.errors(), vec!["Camera permission was denied".to_string()]);

        camera.allow();
        handle.retry().await.unwrap();
        let status = wait_until(&handle, |s| s.state == CaptureState::Live).await;
        assert!(!status.needs_user_action);
        assert_eq!(camera.live_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_start_failure_needs_no_user_action() {
        let camera = SyntheticCamera::new();
        camera.deny(AcquisitionError::StartFailed("pipeline stalled".to_string()));
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        handle.start().await.unwrap();
        let status =
            wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;

        assert!(!status.needs_user_action);
    }

    // ============ Cancel ============

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_from_every_reachable_state() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        // Live
        go_live(&handle).await;
        handle.cancel().await.unwrap();
        assert_eq!(handle.latest().state, CaptureState::AwaitingPermission);
        assert_eq!(camera.live_streams(), 0);

        // CountdownArmed
        go_live(&handle).await;
        assert!(handle.arm().await.unwrap());
        handle.cancel().await.unwrap();
        assert_eq!(camera.live_streams(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.latest().state, CaptureState::AwaitingPermission);

        // Verified
        go_verified(&handle).await;
        handle.cancel().await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, CaptureState::AwaitingPermission);
        assert_eq!(status.preview, None);
        assert_eq!(camera.live_streams(), 0);

        // Failed
        camera.deny(AcquisitionError::DeviceBusy);
        handle.start().await.unwrap();
        wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;
        handle.cancel().await.unwrap();
        assert_eq!(handle.latest().state, CaptureState::AwaitingPermission);
        camera.allow();

        // AwaitingPermission with nothing held
        handle.cancel().await.unwrap();

        assert_eq!(observer.cancels.load(Ordering::SeqCst), 5);
        assert_eq!(camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_acquisition_stops_late_stream() {
        let camera = SyntheticCamera::new();
        camera.set_open_delay(Duration::from_secs(3));
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        handle.start().await.unwrap();
        assert!(handle.status().await.unwrap().acquiring);

        handle.cancel().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, CaptureState::AwaitingPermission);
        assert!(!status.stream_live);
        assert_eq!(camera.open_count(), 1);
        assert_eq!(camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_processing_discards_late_encode() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        // Full-size frames so the encode is still running when cancel lands
        let handle = spawn_session(&camera, &observer, CaptureSettings::default());

        go_live(&handle).await;
        assert!(handle.arm().await.unwrap());
        wait_until(&handle, |s| s.state == CaptureState::Processing).await;

        handle.cancel().await.unwrap();
        assert_eq!(handle.latest().state, CaptureState::AwaitingPermission);
        assert_eq!(camera.live_streams(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, CaptureState::AwaitingPermission);
        assert_eq!(status.preview, None);
        assert_eq!(status.verification_id, None);
        assert_eq!(camera.live_streams(), 0);
        assert_eq!(observer.cancels.load(Ordering::SeqCst), 1);
        assert!(observer.errors().is_empty());
        assert_eq!(observer.captures(), 0);
    }

    // ============ Self-healing ============

    /// Healthy check that counts how often it runs.
    struct CountingCheck(Arc<AtomicU32>);

    impl HealthCheck for CountingCheck {
        fn check(&self, _handle: &crate::camera::stream::StreamHandle) -> StreamHealth {
            self.0.fetch_add(1, Ordering::SeqCst);
            StreamHealth::Healthy
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entering_supervised_states_runs_health_check() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let checks = Arc::new(AtomicU32::new(0));
        let settings = CaptureSettings {
            health_interval_ms: 60_000,
            readiness_delay_ms: 0,
            ..small_settings()
        };
        let handle = SessionCoordinator::spawn(
            SessionConfig::new(Arc::new(camera.clone()), observer.clone())
                .with_settings(settings)
                .with_health_check(Box::new(CountingCheck(Arc::clone(&checks)))),
        );

        go_live(&handle).await;
        assert_eq!(checks.load(Ordering::SeqCst), 1);

        assert!(handle.arm().await.unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 2);

        // Countdown ticks and the capture itself are not supervised entries
        wait_until(&handle, |s| s.state == CaptureState::Verified).await;
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }


    #[tokio::test(start_paused = true)]
    async fn test_degraded_stream_during_countdown_is_recreated() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_live(&handle).await;
        let first = camera.latest_stream().unwrap();
        assert!(handle.arm().await.unwrap());

        first.pause();

        let status = wait_until(&handle, |s| {
            s.state == CaptureState::Live && s.stream_live && s.recreations == 1
        })
        .await;

        assert!(!status.ready);
        assert!(first.is_stopped());
        assert_eq!(first.frames_rendered(), 0);
        assert_eq!(camera.open_count(), 2);
        assert_eq!(camera.live_streams(), 1);
        assert!(observer.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recreation_fails_session() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_live(&handle).await;
        camera.deny(AcquisitionError::DeviceBusy);
        camera.latest_stream().unwrap().end_tracks();

        let status =
            wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;

        assert!(!status.stream_live);
        assert_eq!(camera.live_streams(), 0);
        assert_eq!(observer.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreation_ceiling_fails_session() {
        let camera = SyntheticCamera::new();
        camera.start_streams_paused(true);
        let observer = Arc::new(RecordingObserver::default());
        let settings = CaptureSettings {
            max_recreations: Some(1),
            ..small_settings()
        };
        let handle = spawn_session(&camera, &observer, settings);

        handle.start().await.unwrap();
        let status =
            wait_until(&handle, |s| matches!(s.state, CaptureState::Failed { .. })).await;

        assert_eq!(
            status.error.as_deref(),
            Some("Camera stayed unresponsive after 1 recovery attempts")
        );
        assert_eq!(camera.open_count(), 2);
        assert_eq!(camera.live_streams(), 0);
        assert_eq!(observer.errors().len(), 1);
    }

    // ============ Confirm ============

    #[tokio::test(start_paused = true)]
    async fn test_double_confirm_delivers_once() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        *observer.delivery_delay.lock().unwrap() = Duration::from_secs(1);
        let handle = spawn_session(&camera, &observer, small_settings());

        go_verified(&handle).await;

        let (first, second) = tokio::join!(handle.confirm(), handle.confirm());
        let results = [first, second];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(SessionError::SubmissionBusy)));
        assert_eq!(observer.captures(), 1);

        let status = handle.status().await.unwrap();
        assert!(!status.submitting);
        assert_eq!(status.preview, None);
        assert_eq!(handle.confirm().await, Err(SessionError::NothingToConfirm));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_confirm_keeps_capture() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        observer.reject.store(true, Ordering::SeqCst);
        let handle = spawn_session(&camera, &observer, small_settings());

        go_verified(&handle).await;

        assert_eq!(
            handle.confirm().await,
            Err(SessionError::Submission(SubmissionError::new(
                "face not recognised"
            )))
        );
        let status = handle.status().await.unwrap();
        assert!(!status.submitting);
        assert!(status.preview.is_some());

        observer.reject.store(false, Ordering::SeqCst);
        assert_eq!(handle.confirm().await, Ok(()));
        assert_eq!(observer.captures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_outside_verified() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        assert_eq!(handle.confirm().await, Err(SessionError::NothingToConfirm));
        go_live(&handle).await;
        assert_eq!(handle.confirm().await, Err(SessionError::NothingToConfirm));
        assert_eq!(observer.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_discards_and_reacquires() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_verified(&handle).await;
        let first = camera.latest_stream().unwrap();

        handle.retake().await.unwrap();
        let status = wait_until(&handle, |s| s.state == CaptureState::Live).await;

        assert_eq!(status.preview, None);
        assert!(first.is_stopped());
        assert_eq!(camera.open_count(), 2);
        assert_eq!(camera.live_streams(), 1);
    }

    // ============ Teardown ============

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_stream() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_live(&handle).await;
        handle.shutdown().await.unwrap();

        assert_eq!(camera.live_streams(), 0);
        assert_eq!(handle.start().await, Err(SessionError::SessionClosed));
        assert_eq!(observer.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_releases_stream() {
        let camera = SyntheticCamera::new();
        let observer = Arc::new(RecordingObserver::default());
        let handle = spawn_session(&camera, &observer, small_settings());

        go_live(&handle).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(camera.live_streams(), 0);
    }
}
