//! Face capability seams and the single-face selection policy.
//!
//! The detection and recognition networks are opaque: the crate only sees
//! three capabilities, each loaded by [`crate::models::ModelLoader`].

use crate::types::{BoundingBox, Landmarks};
use std::cmp::Ordering;
use thiserror::Error;

// --- Named constants (tiny face detector defaults) ---
pub const DEFAULT_INPUT_SIZE: u32 = 224;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Detector input resolution and confidence cut-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Square input resolution in pixels.
    pub input_size: u32,
    /// Detections scoring below this are discarded.
    pub score_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Coarse face detector over a grayscale frame.
pub trait FaceLocator: Send + Sync {
    fn locate(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Landmark refiner for one located face.
pub trait LandmarkRefiner: Send + Sync {
    fn refine(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Landmarks, DetectorError>;
}

/// Descriptor extractor. Returns raw values; validation happens in
/// [`crate::FacialDescriptor::new`].
pub trait DescriptorExtractor: Send + Sync {
    fn extract(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
        landmarks: &Landmarks,
    ) -> Result<Vec<f32>, DetectorError>;
}

/// Pick at most one face from the locator output.
///
/// Candidates below `score_threshold` are dropped. Among the rest the order is:
/// highest confidence, then larger area, then top-most, then left-most.
/// The result is independent of the order the locator reported faces in.
pub fn select_face(candidates: &[BoundingBox], score_threshold: f32) -> Option<BoundingBox> {
    candidates
        .iter()
        .filter(|b| b.confidence.is_finite() && b.confidence >= score_threshold)
        .min_by(|a, b| rank(a, b))
        .cloned()
}

fn rank(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.area().partial_cmp(&a.area()).unwrap_or(Ordering::Equal))
        .then_with(|| a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
        .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
}
