use crate::shared::paths::{ensure_dir, get_settings_path};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::camera::types::{FacingMode, StreamConstraints};

const MIN_HEALTH_INTERVAL_MS: u64 = 100;
const MIN_DEGRADED_THRESHOLD: u32 = 1;
const MIN_JPEG_QUALITY: u8 = 1;
const MAX_JPEG_QUALITY: u8 = 100;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Tunables for a capture session. Every field falls back to its default when
/// missing from the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub countdown_seconds: u32,
    pub health_interval_ms: u64,
    pub degraded_threshold: u32,
    pub readiness_delay_ms: u64,
    pub jpeg_quality: u8,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing_mode: FacingMode,
    /// Hard ceiling on self-healing recreations per acquisition. `None` never gives up.
    pub max_recreations: Option<u32>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            countdown_seconds: 3,
            health_interval_ms: 500,
            degraded_threshold: 2,
            readiness_delay_ms: 2000,
            jpeg_quality: 95,
            ideal_width: 1280,
            ideal_height: 720,
            facing_mode: FacingMode::User,
            max_recreations: None,
        }
    }
}

impl CaptureSettings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms)
    }

    pub fn constraints(&self) -> StreamConstraints {
        StreamConstraints {
            facing_mode: self.facing_mode,
            ideal_width: self.ideal_width,
            ideal_height: self.ideal_height,
        }
    }

    /// Pull out-of-range values back to something the session can run with.
    pub fn sanitized(mut self) -> Self {
        self.countdown_seconds = self.countdown_seconds.max(1);
        self.health_interval_ms = self.health_interval_ms.max(MIN_HEALTH_INTERVAL_MS);
        self.degraded_threshold = self.degraded_threshold.max(MIN_DEGRADED_THRESHOLD);
        self.jpeg_quality = self.jpeg_quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
        self.ideal_width = self.ideal_width.max(1);
        self.ideal_height = self.ideal_height.max(1);
        self
    }
}

pub fn load_settings() -> CaptureSettings {
    let path = get_settings_path();

    if !path.exists() {
        return CaptureSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "system", "Ignoring unreadable settings at {:?}: {}", path, e);
            CaptureSettings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<CaptureSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings: CaptureSettings = serde_json::from_str(&contents)?;
    Ok(settings.sanitized())
}

pub fn save_settings(settings: &CaptureSettings) -> Result<(), SettingsError> {
    save_settings_to_file(settings, &get_settings_path())
}

pub fn save_settings_to_file(settings: &CaptureSettings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_contract() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.countdown_seconds, 3);
        assert_eq!(settings.degraded_threshold, 2);
        assert_eq!(settings.health_interval(), Duration::from_millis(500));
        assert_eq!(settings.readiness_delay(), Duration::from_secs(2));
        assert_eq!(settings.max_recreations, None);

        let constraints = settings.constraints();
        assert_eq!(constraints.facing_mode, FacingMode::User);
        assert_eq!((constraints.ideal_width, constraints.ideal_height), (1280, 720));
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{ "countdownSeconds": 5, "maxRecreations": 4 }"#).unwrap();

        let settings = load_settings_from_file(&path).unwrap();
        assert_eq!(settings.countdown_seconds, 5);
        assert_eq!(settings.max_recreations, Some(4));
        assert_eq!(settings.jpeg_quality, 95);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "countdownSeconds": 0, "healthIntervalMs": 1, "degradedThreshold": 0, "jpegQuality": 0 }"#,
        )
        .unwrap();

        let settings = load_settings_from_file(&path).unwrap();
        assert_eq!(settings.countdown_seconds, 1);
        assert_eq!(settings.health_interval_ms, MIN_HEALTH_INTERVAL_MS);
        assert_eq!(settings.degraded_threshold, 1);
        assert_eq!(settings.jpeg_quality, 1);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        let settings = CaptureSettings {
            facing_mode: FacingMode::Environment,
            max_recreations: Some(3),
            ..CaptureSettings::default()
        };
        save_settings_to_file(&settings, &path).unwrap();

        let loaded = load_settings_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            load_settings_from_file(&path),
            Err(SettingsError::ParseError(_))
        ));
    }
}
