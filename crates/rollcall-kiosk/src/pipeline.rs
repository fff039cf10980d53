//! One-shot capture: frame -> face -> landmarks -> descriptor.
//!
//! The frame is pulled on the async side; inference runs on the blocking
//! pool so the executor keeps serving timers and cancellation meanwhile.

use rollcall_core::detector::{select_face, DetectorError};
use rollcall_core::types::DescriptorError;
use rollcall_core::{CapabilityBundle, DetectorOptions, FacialDescriptor};
use rollcall_hw::{CameraError, Frame, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture already in progress")]
    Busy,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("inference task failed: {0}")]
    Inference(#[from] tokio::task::JoinError),
}

/// Turns one camera frame into a facial descriptor. Not re-entrant.
pub struct CapturePipeline {
    bundle: CapabilityBundle,
    options: DetectorOptions,
    busy: AtomicBool,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CapturePipeline {
    pub fn new(bundle: CapabilityBundle, options: DetectorOptions) -> Self {
        Self {
            bundle,
            options,
            busy: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Pull exactly one frame and extract a descriptor from its best face.
    ///
    /// Returns [`CaptureError::Busy`] without touching `source` if another
    /// capture is in flight. Dropping the returned future abandons the
    /// inference result; the blocking task runs to completion on its own.
    pub async fn capture_once(
        &self,
        source: &dyn FrameSource,
    ) -> Result<FacialDescriptor, CaptureError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("capture skipped: pipeline busy");
            return Err(CaptureError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let frame = source.next_frame().await?;
        tracing::debug!(
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            "frame captured"
        );

        let bundle = self.bundle.clone();
        let options = self.options;
        tokio::task::spawn_blocking(move || infer(&bundle, &options, &frame)).await?
    }
}

/// Locate, select, refine and extract on one frame. CPU-bound.
fn infer(
    bundle: &CapabilityBundle,
    options: &DetectorOptions,
    frame: &Frame,
) -> Result<FacialDescriptor, CaptureError> {
    let candidates = bundle
        .locator
        .locate(&frame.data, frame.width, frame.height, options)?;
    let face = select_face(&candidates, options.score_threshold).ok_or_else(|| {
        tracing::debug!(candidates = candidates.len(), "no face above threshold");
        CaptureError::NoFaceDetected
    })?;
    tracing::debug!(
        confidence = face.confidence,
        x = face.x,
        y = face.y,
        candidates = candidates.len(),
        "face selected"
    );

    let landmarks = bundle
        .refiner
        .refine(&frame.data, frame.width, frame.height, &face)?;
    let values = bundle
        .extractor
        .extract(&frame.data, frame.width, frame.height, &face, &landmarks)?;
    Ok(FacialDescriptor::new(values)?)
}
