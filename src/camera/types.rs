use serde::{Deserialize, Serialize};

/// Which camera the session asks the platform for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front-facing camera.
    #[default]
    User,
    /// Rear-facing camera.
    Environment,
}

/// Preferences passed to the platform when acquiring a stream.
///
/// Width and height are ideals, not requirements: the device may deliver
/// another size and the session works with whatever arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConstraints {
    pub facing_mode: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Bytes per RGBA8 pixel.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

/// A single still frame in RGBA8, row-major, no padding.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Buffer size a well-formed frame of these dimensions must have.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGBA_BYTES_PER_PIXEL
    }
}
