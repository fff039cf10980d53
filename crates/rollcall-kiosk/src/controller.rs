//! Kiosk session controller.
//!
//! Owns the model loader, camera session, capture pipeline, identification
//! client and confirmation card for one session, and is the only writer of
//! the [`WorkflowState`]. Every suspension point goes through the session's
//! cancel token; once it fires, late results are dropped instead of applied.

use crate::pipeline::{CaptureError, CapturePipeline};
use rollcall_core::confirmation::DEFAULT_AUTO_HIDE;
use rollcall_core::workflow::{CloseReason, Outcome};
use rollcall_core::{
    cancel_pair, reduce, AttendanceMarker, CancelHandle, CancelToken, ConfirmOutcome,
    Confirmation, ConfirmationSession, DetectorOptions, Event, Identifier, ModelLoader, Phase,
    WorkflowState,
};
use rollcall_hw::{CameraError, CameraSession};
use std::sync::Arc;
use std::time::Duration;

pub struct Kiosk {
    loader: ModelLoader,
    camera: CameraSession,
    pipeline: Option<CapturePipeline>,
    identifier: Arc<dyn Identifier>,
    confirmation: Confirmation,
    options: DetectorOptions,
    auto_hide: Duration,
    state: WorkflowState,
    cancel: CancelHandle,
    token: CancelToken,
}

impl Kiosk {
    pub fn new(
        loader: ModelLoader,
        camera: CameraSession,
        identifier: Arc<dyn Identifier>,
        marker: Arc<dyn AttendanceMarker>,
    ) -> Self {
        let (cancel, token) = cancel_pair();
        Self {
            loader,
            camera,
            pipeline: None,
            identifier,
            confirmation: Confirmation::new(marker),
            options: DetectorOptions::default(),
            auto_hide: DEFAULT_AUTO_HIDE,
            state: WorkflowState::default(),
            cancel,
            token,
        }
    }

    pub fn with_options(mut self, options: DetectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Zero keeps the confirmation card open until confirm or dismiss.
    pub fn with_auto_hide(mut self, auto_hide: Duration) -> Self {
        self.auto_hide = auto_hide;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn camera(&self) -> &CameraSession {
        &self.camera
    }

    pub fn confirmation(&self) -> Option<ConfirmationSession> {
        self.confirmation.current()
    }

    /// Handle that tears the session down from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn apply(&mut self, event: Event) {
        if self.token.is_cancelled() {
            tracing::debug!(?event, "event discarded after teardown");
            return;
        }
        let next = reduce(&self.state, event);
        if next.phase != self.state.phase {
            tracing::info!(from = ?self.state.phase, to = ?next.phase, status = %next.status, "workflow transition");
        }
        self.state = next;
    }

    /// Load the capability bundle, then acquire the camera.
    pub async fn start(&mut self) {
        if self.pipeline.is_none() {
            let Ok(loaded) = self.token.guard(self.loader.load()).await else {
                tracing::debug!("model load discarded after teardown");
                return;
            };
            match loaded {
                Ok(bundle) => {
                    self.pipeline = Some(CapturePipeline::new(bundle, self.options));
                    self.apply(Event::ModelsLoaded);
                }
                Err(e) => {
                    self.apply(Event::ModelLoadFailed(e.to_string()));
                    return;
                }
            }
        }
        self.start_camera().await;
    }

    /// Ask for the camera again after a denial or a missing device.
    pub async fn retry_camera(&mut self) {
        if matches!(&self.state.phase, Phase::Error(kind) if kind.is_camera()) {
            self.start_camera().await;
        } else {
            tracing::debug!(phase = ?self.state.phase, "camera retry ignored");
        }
    }

    async fn start_camera(&mut self) {
        let Ok(started) = self.token.guard(self.camera.start()).await else {
            self.camera.stop();
            tracing::debug!("camera start discarded after teardown");
            return;
        };
        let event = match started {
            Ok(_) => Event::CameraStarted,
            Err(CameraError::Denied(cause)) => {
                tracing::warn!(%cause, "camera permission denied");
                Event::CameraDenied
            }
            Err(CameraError::Unavailable(cause)) => Event::CameraUnavailable(cause),
            Err(other) => Event::CameraUnavailable(other.to_string()),
        };
        self.apply(event);
    }

    /// Capture one descriptor and identify it. On a match the confirmation card opens.
    pub async fn scan(&mut self) {
        self.sync_confirmation();
        let before = self.state.clone();
        self.apply(Event::CaptureStarted);
        if self.state.phase != Phase::Capturing {
            return;
        }
        let Some(pipeline) = self.pipeline.as_ref() else {
            self.state = before;
            return;
        };

        let Ok(captured) = self.token.guard(pipeline.capture_once(&self.camera)).await else {
            tracing::debug!("capture discarded after teardown");
            return;
        };
        let descriptor = match captured {
            Ok(descriptor) => descriptor,
            Err(CaptureError::Busy) => {
                self.state = before;
                return;
            }
            Err(CaptureError::NoFaceDetected) => {
                self.apply(Event::NoFaceDetected);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                self.apply(Event::CaptureFailed(format!("Capture failed: {e}")));
                return;
            }
        };
        self.apply(Event::DescriptorCaptured);

        let Ok(result) = self.token.guard(self.identifier.identify(&descriptor)).await else {
            tracing::debug!("identify result discarded after teardown");
            return;
        };
        drop(descriptor);
        self.apply(Event::Identified(result));

        if self.state.phase == Phase::Result(Outcome::Matched) {
            self.open_confirmation();
        }
    }

    fn open_confirmation(&mut self) {
        let Some((student, score)) = self.state.matched.clone() else {
            return;
        };
        match self.confirmation.open(student, self.auto_hide) {
            Ok(session) => {
                tracing::debug!(student_id = %session.student.student_id, %score, "awaiting confirmation");
                self.apply(Event::ConfirmationOpened);
            }
            Err(e) => tracing::warn!(error = %e, "confirmation not opened"),
        }
    }

    /// Confirm the open card and record attendance.
    pub async fn confirm(&mut self) {
        if !self.confirmation.is_open() {
            self.sync_confirmation();
            return;
        }
        let outcome = self.token.guard(self.confirmation.confirm()).await;
        self.sync_confirmation();
        match outcome {
            Ok(ConfirmOutcome::Marked(student)) => self.apply(Event::AttendanceMarked(student)),
            Ok(ConfirmOutcome::MarkFailed { reason, .. }) => {
                self.apply(Event::AttendanceMarkFailed(reason))
            }
            Ok(ConfirmOutcome::NotOpen) => {}
            Err(_) => tracing::debug!("attendance result discarded after teardown"),
        }
    }

    pub fn dismiss(&mut self) {
        self.confirmation.dismiss();
        self.sync_confirmation();
    }

    pub fn reset(&mut self) {
        self.sync_confirmation();
        self.apply(Event::Reset);
    }

    /// Wait for the open card to close (auto-hide or another task) and apply it.
    ///
    /// Returns `None` if nothing is open. With auto-hide disabled this waits
    /// until the card is closed some other way.
    pub async fn next_confirmation_close(&mut self) -> Option<CloseReason> {
        let closed = match self.confirmation.try_next_closed() {
            Some(closed) => closed,
            None if self.confirmation.is_open() => {
                self.token
                    .guard(self.confirmation.next_closed())
                    .await
                    .ok()
                    .flatten()?
            }
            None => return None,
        };
        self.apply(Event::ConfirmationClosed(closed.reason));
        Some(closed.reason)
    }

    fn sync_confirmation(&mut self) {
        while let Some(closed) = self.confirmation.try_next_closed() {
            self.apply(Event::ConfirmationClosed(closed.reason));
        }
    }

    /// Cancel in-flight work, clear the confirmation timer and release the camera.
    pub fn shutdown(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(phase = ?self.state.phase, "kiosk session shutting down");
        }
        self.cancel.cancel();
        self.confirmation.cancel();
        self.camera.stop();
    }
}

impl Drop for Kiosk {
    fn drop(&mut self) {
        self.shutdown();
    }
}
