//! Identification workflow state as a pure reducer.
//!
//! `reduce(state, event) -> state` is the only way the phase changes. Events
//! that do not apply to the current phase leave the phase as it is.

use crate::types::{IdentificationResult, Score, Student};
use std::fmt;

/// Terminal or operator-actionable failure states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    ModelLoadFailure(String),
    CameraDenied,
    CameraUnavailable(String),
}

impl ErrorKind {
    /// Camera errors can be retried by restarting the camera.
    pub fn is_camera(&self) -> bool {
        matches!(self, Self::CameraDenied | Self::CameraUnavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    NotMatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    ModelsReady,
    CameraReady,
    Capturing,
    Identifying,
    Result(Outcome),
    ConfirmationOpen,
    Idle,
    Error(ErrorKind),
}

impl Phase {
    /// Phases from which a new capture may begin.
    pub fn accepts_capture(&self) -> bool {
        matches!(
            self,
            Phase::CameraReady | Phase::Idle | Phase::Result(Outcome::NotMatched)
        )
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Capturing | Phase::Identifying)
    }
}

/// Why a confirmation session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Confirmed,
    Dismissed,
    TimedOut,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Confirmed => "confirmed",
            Self::Dismissed => "dismissed",
            Self::TimedOut => "timed out",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ModelsLoaded,
    ModelLoadFailed(String),
    CameraStarted,
    CameraDenied,
    CameraUnavailable(String),
    CaptureStarted,
    NoFaceDetected,
    CaptureFailed(String),
    DescriptorCaptured,
    Identified(IdentificationResult),
    ConfirmationOpened,
    ConfirmationClosed(CloseReason),
    AttendanceMarked(Student),
    AttendanceMarkFailed(String),
    Reset,
}

/// Phase plus the operator-facing status line and the last match shown.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub phase: Phase,
    pub status: String,
    pub matched: Option<(Student, Score)>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            phase: Phase::Initializing,
            status: "Loading models...".into(),
            matched: None,
        }
    }
}

impl WorkflowState {
    fn with(&self, phase: Phase, status: impl Into<String>) -> Self {
        Self {
            phase,
            status: status.into(),
            matched: self.matched.clone(),
        }
    }

    fn status_only(&self, status: impl Into<String>) -> Self {
        self.with(self.phase.clone(), status)
    }
}

/// Apply one event.
pub fn reduce(state: &WorkflowState, event: Event) -> WorkflowState {
    use Phase as P;

    // Model failure is terminal from any step.
    if let Event::ModelLoadFailed(cause) = event {
        return WorkflowState {
            phase: P::Error(ErrorKind::ModelLoadFailure(cause)),
            status: "Failed to load models".into(),
            matched: None,
        };
    }
    if matches!(state.phase, P::Error(ErrorKind::ModelLoadFailure(_))) {
        return state.clone();
    }

    match (&state.phase, event) {
        (P::Initializing, Event::ModelsLoaded) => state.with(P::ModelsReady, "Models loaded, allow camera"),

        (P::ModelsReady | P::Error(_), Event::CameraStarted) => {
            state.with(P::CameraReady, "Camera running, press Scan")
        }
        (P::ModelsReady | P::Error(_), Event::CameraDenied) => {
            state.with(P::Error(ErrorKind::CameraDenied), "Camera access denied")
        }
        (P::ModelsReady | P::Error(_), Event::CameraUnavailable(cause)) => state.with(
            P::Error(ErrorKind::CameraUnavailable(cause.clone())),
            format!("Camera unavailable: {cause}"),
        ),

        (phase, Event::CaptureStarted) if phase.accepts_capture() => WorkflowState {
            phase: P::Capturing,
            status: "Detecting face...".into(),
            matched: None,
        },
        (P::Initializing, Event::CaptureStarted) => state.status_only("Models loading..."),
        (P::ModelsReady | P::Error(_), Event::CaptureStarted) => state.status_only("Camera not ready"),

        (P::Capturing, Event::NoFaceDetected) => state.with(P::CameraReady, "No face detected. Try again."),
        (P::Capturing, Event::CaptureFailed(reason)) => state.with(P::CameraReady, reason),
        (P::Capturing, Event::DescriptorCaptured) => state.with(P::Identifying, "Identifying..."),

        (P::Identifying, Event::Identified(result)) => match result {
            IdentificationResult::Matched { student, score } => WorkflowState {
                phase: P::Result(Outcome::Matched),
                status: format!("Matched: {}", student.name),
                matched: Some((student, score)),
            },
            IdentificationResult::NotMatched { best_score } => {
                let best = best_score.map_or_else(|| "N/A".to_string(), |s| s.to_string());
                state.with(P::Result(Outcome::NotMatched), format!("No match (bestScore: {best})"))
            }
            IdentificationResult::Failed { reason } => state.with(P::CameraReady, reason),
        },

        (P::Result(Outcome::Matched), Event::ConfirmationOpened) => {
            let name = state
                .matched
                .as_ref()
                .map(|(s, _)| s.name.clone())
                .unwrap_or_default();
            state.with(P::ConfirmationOpen, format!("Confirm attendance for {name}"))
        }
        (P::ConfirmationOpen, Event::ConfirmationClosed(reason)) => {
            let status = match reason {
                CloseReason::Confirmed => "Marking attendance...",
                CloseReason::Dismissed | CloseReason::TimedOut => "Ready",
            };
            WorkflowState {
                phase: P::Idle,
                status: status.into(),
                matched: None,
            }
        }

        // Mark results arrive after the session has closed; they only touch the status line.
        (_, Event::AttendanceMarked(student)) => {
            state.status_only(format!("Attendance marked: {}", student.name))
        }
        (_, Event::AttendanceMarkFailed(reason)) => {
            state.status_only(format!("Attendance not recorded: {reason}"))
        }

        (P::CameraReady | P::Idle | P::Result(_), Event::Reset) => WorkflowState {
            phase: P::Idle,
            status: "Ready".into(),
            matched: None,
        },

        (_, event) => {
            tracing::trace!(phase = ?state.phase, ?event, "event ignored in current phase");
            state.clone()
        }
    }
}
