use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: probe has {probe}, registered face has {reference}")]
    DimensionMismatch { probe: usize, reference: usize },
    #[error("empty embedding")]
    Empty,
}

/// Outcome of comparing a live capture against a registered face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance between probe and reference. Lower = more similar.
    pub distance: f32,
}

/// Strategy for deciding whether a probe embedding belongs to a registered face.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Distance-threshold matcher: a probe matches when its distance to the
/// reference is strictly below the threshold.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if probe.values.is_empty() || reference.values.is_empty() {
            return Err(MatchError::Empty);
        }
        if probe.dim() != reference.dim() {
            return Err(MatchError::DimensionMismatch {
                probe: probe.dim(),
                reference: reference.dim(),
            });
        }

        let distance = probe.euclidean_distance(reference);
        Ok(MatchResult {
            matched: distance < threshold,
            distance,
        })
    }
}
