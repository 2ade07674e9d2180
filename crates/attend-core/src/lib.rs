//! attend-core — Face verification engine and attendance bookkeeping.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both via
//! ONNX Runtime on the CPU. Registered users and attendance events live in
//! flat JSON files.

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use attendance::{AttendanceLog, AttendanceRecord, Stats};
pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;
pub use store::{normalize_rfid, StoreError, UserRecord, UserStore};
pub use types::{BoundingBox, DistanceMatcher, Embedding, MatchError, MatchResult, Matcher};

/// Default location of the ONNX model files.
///
/// `$XDG_DATA_HOME/attend/models`, falling back to `~/.local/share/attend/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
        .join("models")
}
