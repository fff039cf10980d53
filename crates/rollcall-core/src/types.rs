use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of values in a facial descriptor produced by the recognition net.
pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("expected {DESCRIPTOR_LEN}-dim descriptor, got {0}")]
    WrongLength(usize),
    #[error("descriptor value at index {0} is not finite")]
    NonFinite(usize),
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Facial landmark points produced by the landmark refiner (68 for the tiny net).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<(f32, f32)>,
}

/// Fixed-length facial descriptor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FacialDescriptor {
    values: Box<[f32]>,
}

impl FacialDescriptor {
    /// Validate and wrap raw extractor output.
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(DescriptorError::WrongLength(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite(idx));
        }
        Ok(Self {
            values: values.into_boxed_slice(),
        })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<Vec<f32>> for FacialDescriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FacialDescriptor> for Vec<f32> {
    fn from(d: FacialDescriptor) -> Self {
        d.values.into_vec()
    }
}

/// A roster member as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub name: String,
    /// Shown on the confirmation card when the roster has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_phone: Option<String>,
}

/// Similarity score in [0, 1]. Higher = more confident.
///
/// Keeps full precision; [`Display`](fmt::Display) renders three decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(pub f64);

impl Score {
    pub fn value(self) -> f64 {
        self.0
    }

    /// Score rounded to three decimal places.
    pub fn rounded(self) -> f64 {
        (self.0 * 1000.0).round() / 1000.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Outcome of one identification round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentificationResult {
    Matched { student: Student, score: Score },
    NotMatched { best_score: Option<f64> },
    Failed { reason: String },
}

impl IdentificationResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}
