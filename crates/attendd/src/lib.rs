//! attendd — attendance server.
//!
//! A card reader posts RFID scans; each scan triggers a live face check
//! against the face registered for that card, and a match is logged.

pub mod api;
pub mod config;
pub mod engine;
pub mod state;

pub use config::Config;
pub use engine::{spawn_engine, CameraBackend, CaptureSettings, EngineError, EngineHandle, FaceBackend};
pub use state::AppState;
