use crate::engine::CaptureSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Server configuration, loaded from `ATTEND_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind: SocketAddr,
    /// Directory holding users.json and attendance.json (default: ./data).
    pub data_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a positive match; lower is stricter.
    pub match_threshold: f32,
    /// Minimum SCRFD score for a detection to count as a face.
    pub detection_confidence: f32,
    /// Frames to try before giving up on a capture.
    pub capture_attempts: usize,
    /// Pause after each unusable frame.
    pub capture_delay: Duration,
    /// Pause after opening the camera so exposure can settle.
    pub warmup: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            bind: parsed(&lookup, "ATTEND_BIND", "0.0.0.0:5000".parse().ok())?,
            data_dir: PathBuf::from(text("ATTEND_DATA_DIR", "data")),
            camera_device: text("ATTEND_CAMERA_DEVICE", "/dev/video0"),
            model_dir: lookup("ATTEND_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(attend_core::default_model_dir),
            match_threshold: parsed(&lookup, "ATTEND_MATCH_THRESHOLD", Some(1.1))?,
            detection_confidence: parsed(&lookup, "ATTEND_DETECTION_CONFIDENCE", Some(0.5))?,
            capture_attempts: parsed(&lookup, "ATTEND_CAPTURE_ATTEMPTS", Some(30))?,
            capture_delay: Duration::from_millis(parsed(&lookup, "ATTEND_CAPTURE_DELAY_MS", Some(100))?),
            warmup: Duration::from_millis(parsed(&lookup, "ATTEND_WARMUP_MS", Some(1000))?),
        })
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn attendance_path(&self) -> PathBuf {
        self.data_dir.join("attendance.json")
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            attempts: self.capture_attempts.max(1),
            delay: self.capture_delay,
            warmup: self.warmup,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => default.ok_or(ConfigError::Invalid {
            key,
            value: String::new(),
        }),
    }
}
