//! Test-pattern camera for headless hosts and tests.
//!
//! Every opened stream renders a gradient whose blue channel advances per frame.
//! The camera and its streams expose fault injection: denied or slow opens,
//! paused playback, ended tracks and missing frames.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{CameraDevice, VideoStream};
use crate::camera::errors::AcquisitionError;
use crate::camera::types::{Frame, StreamConstraints, RGBA_BYTES_PER_PIXEL};

#[derive(Default)]
struct CameraState {
    denial: Mutex<Option<AcquisitionError>>,
    open_delay: Mutex<Duration>,
    start_paused: AtomicBool,
    start_blank: AtomicBool,
    opened: AtomicU32,
    streams: Mutex<Vec<SyntheticStream>>,
}

/// A [`CameraDevice`] that never touches hardware. Clones share state.
#[derive(Clone, Default)]
pub struct SyntheticCamera {
    state: Arc<CameraState>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail with `error`.
    pub fn deny(&self, error: AcquisitionError) {
        *lock(&self.state.denial) = Some(error);
    }

    /// Let `open` succeed again.
    pub fn allow(&self) {
        *lock(&self.state.denial) = None;
    }

    /// Simulate the time a permission prompt or device warm-up takes.
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.state.open_delay) = delay;
    }

    /// New streams start with playback paused (a feed that never comes up).
    pub fn start_streams_paused(&self, paused: bool) {
        self.state.start_paused.store(paused, Ordering::SeqCst);
    }

    /// New streams never render a frame.
    pub fn start_streams_blank(&self, blank: bool) {
        self.state.start_blank.store(blank, Ordering::SeqCst);
    }

    /// Number of `open` calls that produced a stream.
    pub fn open_count(&self) -> u32 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet stopped.
    pub fn live_streams(&self) -> usize {
        lock(&self.state.streams)
            .iter()
            .filter(|s| !s.is_stopped())
            .count()
    }

    pub fn latest_stream(&self) -> Option<SyntheticStream> {
        lock(&self.state.streams).last().cloned()
    }
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    async fn open(
        &self,
        constraints: StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, AcquisitionError> {
        let delay = *lock(&self.state.open_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.state.denial).clone() {
            return Err(error);
        }

        let index = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let stream = SyntheticStream::new(
            format!("synthetic-{}", index),
            constraints.ideal_width,
            constraints.ideal_height,
        );
        if self.state.start_paused.load(Ordering::SeqCst) {
            stream.pause();
        }
        if self.state.start_blank.load(Ordering::SeqCst) {
            stream.drop_frames();
        }

        lock(&self.state.streams).push(stream.clone());
        Ok(Box::new(stream))
    }
}

struct StreamState {
    id: String,
    width: u32,
    height: u32,
    stopped: AtomicBool,
    tracks_ended: AtomicBool,
    paused: AtomicBool,
    blank: AtomicBool,
    frame_index: AtomicU64,
}

/// Control side of a synthetic stream. Clones share state with the stream the
/// session holds.
#[derive(Clone)]
pub struct SyntheticStream {
    state: Arc<StreamState>,
}

impl SyntheticStream {
    fn new(id: String, width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(StreamState {
                id,
                width: width.max(1),
                height: height.max(1),
                stopped: AtomicBool::new(false),
                tracks_ended: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                blank: AtomicBool::new(false),
                frame_index: AtomicU64::new(0),
            }),
        }
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    /// The device was reclaimed: tracks report ended but nobody called `stop`.
    pub fn end_tracks(&self) {
        self.state.tracks_ended.store(true, Ordering::SeqCst);
    }

    pub fn drop_frames(&self) {
        self.state.blank.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Frames handed out through `current_frame`.
    pub fn frames_rendered(&self) -> u64 {
        self.state.frame_index.load(Ordering::SeqCst)
    }

    fn render(&self) -> Frame {
        let index = self.state.frame_index.fetch_add(1, Ordering::Relaxed);
        let (width, height) = (self.state.width, self.state.height);
        let mut data = Vec::with_capacity(Frame::expected_len(width, height));

        let blue = (index % 256) as u8;
        for y in 0..height {
            let green = (y as u64 * 255 / height as u64) as u8;
            for x in 0..width {
                let red = (x as u64 * 255 / width as u64) as u8;
                data.extend_from_slice(&[red, green, blue, 255]);
            }
        }
        debug_assert_eq!(data.len() % RGBA_BYTES_PER_PIXEL, 0);

        Frame {
            width,
            height,
            data,
        }
    }
}

impl VideoStream for SyntheticStream {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn live_tracks(&self) -> usize {
        if self.is_stopped() || self.state.tracks_ended.load(Ordering::SeqCst) {
            0
        } else {
            1
        }
    }

    fn is_playing(&self) -> bool {
        self.live_tracks() > 0 && !self.state.paused.load(Ordering::SeqCst)
    }

    fn current_frame(&self) -> Option<Frame> {
        if !self.is_playing() || self.state.blank.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.render())
    }

    fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
