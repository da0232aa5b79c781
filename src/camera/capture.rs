//! Still-frame capture and JPEG encoding.
//!
//! Reading the frame is cheap and happens against the live handle; encoding is
//! CPU-bound and works on an owned [`Frame`] so it can run off the session task.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use super::errors::CaptureEncodeError;
use super::stream::StreamHandle;
use super::types::Frame;

/// JPEG quality used when nothing else is configured (0-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

const PREVIEW_PREFIX: &str = "data:image/jpeg;base64,";
const VERIFICATION_ID_PREFIX: &str = "FV-";

/// One encoded still, ready for preview and delivery.
#[derive(Clone, PartialEq)]
pub struct CapturedPayload {
    /// JPEG bytes.
    pub image: Vec<u8>,
    /// `data:` URI of the same image for display.
    pub preview: String,
    /// Presentation-only reference shown next to the preview.
    pub verification_id: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl std::fmt::Debug for CapturedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedPayload")
            .field("bytes", &self.image.len())
            .field("verification_id", &self.verification_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Stateless frame grabber. Never mutates or releases the handle it reads from.
#[derive(Debug, Clone, Copy)]
pub struct FrameCapturer {
    quality: u8,
}

impl Default for FrameCapturer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameCapturer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Read one frame and encode it.
    pub fn capture(&self, handle: Option<&StreamHandle>) -> Result<CapturedPayload, CaptureEncodeError> {
        let frame = self.read_frame(handle)?;
        self.encode(frame)
    }

    /// Snapshot the current frame of a live handle.
    pub fn read_frame(&self, handle: Option<&StreamHandle>) -> Result<Frame, CaptureEncodeError> {
        let handle = handle
            .filter(|h| !h.is_released())
            .ok_or(CaptureEncodeError::NoStream)?;

        let frame = handle
            .stream()
            .current_frame()
            .ok_or(CaptureEncodeError::NoFrame)?;

        let expected = Frame::expected_len(frame.width, frame.height);
        if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
            return Err(CaptureEncodeError::InvalidFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        Ok(frame)
    }

    /// Encode an RGBA frame to JPEG and build the preview.
    pub fn encode(&self, frame: Frame) -> Result<CapturedPayload, CaptureEncodeError> {
        let Frame {
            width,
            height,
            data,
        } = frame;
        let actual = data.len();

        let rgba = RgbaImage::from_raw(width, height, data).ok_or(
            CaptureEncodeError::InvalidFrame {
                expected: Frame::expected_len(width, height),
                actual,
            },
        )?;

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

        let mut image = Vec::new();
        JpegEncoder::new_with_quality(&mut image, self.quality)
            .encode_image(&rgb)
            .map_err(|e| CaptureEncodeError::EncodeFailed(e.to_string()))?;

        if image.is_empty() {
            return Err(CaptureEncodeError::EmptyOutput);
        }

        let preview = format!("{}{}", PREVIEW_PREFIX, STANDARD.encode(&image));

        tracing::debug!(target: "camera", "[CAPTURE] Encoded {}x{} frame to {} bytes (quality {})",
            width, height, image.len(), self.quality);

        Ok(CapturedPayload {
            image,
            preview,
            verification_id: new_verification_id(),
            width,
            height,
            captured_at: Utc::now(),
        })
    }
}

fn new_verification_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", VERIFICATION_ID_PREFIX, id[..8].to_uppercase())
}
