//! rollcall-core — Identification workflow building blocks.
//!
//! Descriptor and result types, the capability model loader, the single-face
//! selection policy, the workflow reducer and the confirmation session.

pub mod cancel;
pub mod confirmation;
pub mod detector;
pub mod models;
pub mod types;
pub mod workflow;

use async_trait::async_trait;

pub use cancel::{cancel_pair, CancelHandle, CancelToken, Cancelled};
pub use confirmation::{AttendanceMarker, Confirmation, ConfirmOutcome, ConfirmationSession};
pub use detector::DetectorOptions;
pub use models::{CapabilityBundle, CapabilityProvider, ModelLoadError, ModelLoader, ModelSource};
pub use types::{BoundingBox, FacialDescriptor, IdentificationResult, Landmarks, Score, Student};
pub use workflow::{reduce, Event, Phase, WorkflowState};

/// Remote matching service. Every call settles to exactly one result variant.
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, descriptor: &FacialDescriptor) -> IdentificationResult;
}
