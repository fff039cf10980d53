//! Time-boxed confirmation card shown after a match.
//!
//! Three exits race while a session is open: confirm, dismiss and the
//! auto-hide timer. Whichever takes the session out of the shared slot first
//! wins; the others observe an empty slot and do nothing.

use crate::types::Student;
use crate::workflow::CloseReason;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_AUTO_HIDE: Duration = Duration::from_millis(6000);

/// Records attendance for a confirmed student.
#[async_trait]
pub trait AttendanceMarker: Send + Sync {
    async fn mark_present(&self, student_id: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationSession {
    pub student: Student,
    pub opened_at: DateTime<Utc>,
    /// `None` when auto-hide is disabled.
    pub auto_hide: Option<Duration>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("a confirmation session is already open for {0}")]
    AlreadyOpen(String),
}

/// Result of an explicit confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Marked(Student),
    MarkFailed { student: Student, reason: String },
    /// Session was already closed (dismissed or timed out).
    NotOpen,
}

/// Close notification delivered to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closed {
    pub student: Student,
    pub reason: CloseReason,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    session: Option<ConfirmationSession>,
}

pub struct Confirmation {
    marker: Arc<dyn AttendanceMarker>,
    slot: Arc<Mutex<Slot>>,
    timer: Option<JoinHandle<()>>,
    closed_tx: mpsc::UnboundedSender<Closed>,
    closed_rx: mpsc::UnboundedReceiver<Closed>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // Slot holds plain data; a poisoned lock still has a consistent value.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Confirmation {
    pub fn new(marker: Arc<dyn AttendanceMarker>) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            marker,
            slot: Arc::new(Mutex::new(Slot::default())),
            timer: None,
            closed_tx,
            closed_rx,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).session.is_some()
    }

    pub fn current(&self) -> Option<ConfirmationSession> {
        lock(&self.slot).session.clone()
    }

    /// Open a session. `auto_hide` of zero disables the timer.
    pub fn open(
        &mut self,
        student: Student,
        auto_hide: Duration,
    ) -> Result<ConfirmationSession, ConfirmError> {
        let mut slot = lock(&self.slot);
        if let Some(existing) = &slot.session {
            return Err(ConfirmError::AlreadyOpen(existing.student.student_id.clone()));
        }

        slot.generation += 1;
        let generation = slot.generation;
        let session = ConfirmationSession {
            student,
            opened_at: Utc::now(),
            auto_hide: (!auto_hide.is_zero()).then_some(auto_hide),
        };
        slot.session = Some(session.clone());
        drop(slot);

        tracing::info!(
            student_id = %session.student.student_id,
            auto_hide_ms = auto_hide.as_millis() as u64,
            "confirmation opened"
        );

        self.clear_timer();
        if let Some(delay) = session.auto_hide {
            let slot = Arc::clone(&self.slot);
            let closed_tx = self.closed_tx.clone();
            self.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let expired = {
                    let mut slot = lock(&slot);
                    if slot.generation == generation {
                        slot.session.take()
                    } else {
                        None
                    }
                };
                if let Some(session) = expired {
                    tracing::info!(student_id = %session.student.student_id, "confirmation timed out");
                    let _ = closed_tx.send(Closed {
                        student: session.student,
                        reason: CloseReason::TimedOut,
                    });
                }
            }));
        }

        Ok(session)
    }

    /// Confirm the open session: close it, then record attendance once.
    pub async fn confirm(&mut self) -> ConfirmOutcome {
        let Some(session) = self.take(CloseReason::Confirmed) else {
            return ConfirmOutcome::NotOpen;
        };
        let student = session.student;
        match self.marker.mark_present(&student.student_id).await {
            Ok(()) => {
                tracing::info!(student_id = %student.student_id, "attendance marked");
                ConfirmOutcome::Marked(student)
            }
            Err(reason) => {
                tracing::warn!(student_id = %student.student_id, %reason, "attendance mark failed");
                ConfirmOutcome::MarkFailed { student, reason }
            }
        }
    }

    /// Close without side effects. Returns false if nothing was open.
    pub fn dismiss(&mut self) -> bool {
        self.take(CloseReason::Dismissed).is_some()
    }

    /// Teardown: drop any open session and clear the timer. No notification.
    pub fn cancel(&mut self) {
        self.clear_timer();
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        slot.session = None;
    }

    /// Next close notification, if one is already queued.
    pub fn try_next_closed(&mut self) -> Option<Closed> {
        self.closed_rx.try_recv().ok()
    }

    /// Wait for the next close notification.
    pub async fn next_closed(&mut self) -> Option<Closed> {
        self.closed_rx.recv().await
    }

    fn take(&mut self, reason: CloseReason) -> Option<ConfirmationSession> {
        let session = {
            let mut slot = lock(&self.slot);
            let session = slot.session.take()?;
            slot.generation += 1;
            session
        };
        self.clear_timer();
        tracing::debug!(student_id = %session.student.student_id, %reason, "confirmation closed");
        let _ = self.closed_tx.send(Closed {
            student: session.student.clone(),
            reason,
        });
        Some(session)
    }

    fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Confirmation {
    fn drop(&mut self) {
        self.clear_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingMarker {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AttendanceMarker for CountingMarker {
        async fn mark_present(&self, _student_id: &str) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("service unavailable".into())
            } else {
                Ok(())
            }
        }
    }

    fn student() -> Student {
        Student {
            student_id: "S-3".into(),
            name: "Grace".into(),
            parent_phone: None,
        }
    }

    fn setup(fail: bool) -> (Arc<CountingMarker>, Confirmation) {
        let marker = Arc::new(CountingMarker {
            fail,
            ..Default::default()
        });
        let confirmation = Confirmation::new(marker.clone());
        (marker, confirmation)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_twice_rejected() {
        let (_, mut c) = setup(false);
        c.open(student(), DEFAULT_AUTO_HIDE).unwrap();
        let err = c.open(student(), DEFAULT_AUTO_HIDE).unwrap_err();
        assert_eq!(err, ConfirmError::AlreadyOpen("S-3".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_closes_without_mark() {
        let (marker, mut c) = setup(false);
        let session = c.open(student(), Duration::from_millis(6000)).unwrap();
        assert_eq!(session.auto_hide, Some(Duration::from_millis(6000)));

        tokio::time::sleep(Duration::from_millis(5999)).await;
        assert!(c.is_open());

        let closed = c.next_closed().await.unwrap();
        assert_eq!(closed.reason, CloseReason::TimedOut);
        assert!(!c.is_open());
        assert_eq!(marker.calls.load(Ordering::SeqCst), 0);

        // actions after timeout are no-ops
        assert_eq!(c.confirm().await, ConfirmOutcome::NotOpen);
        assert!(!c.dismiss());
        assert_eq!(marker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_auto_hide_never_closes() {
        let (_, mut c) = setup(false);
        let session = c.open(student(), Duration::ZERO).unwrap();
        assert_eq!(session.auto_hide, None);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(c.is_open());
        assert!(c.try_next_closed().is_none());
        assert!(c.dismiss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_marks_once_and_cancels_timer() {
        let (marker, mut c) = setup(false);
        c.open(student(), DEFAULT_AUTO_HIDE).unwrap();

        assert_eq!(c.confirm().await, ConfirmOutcome::Marked(student()));
        assert_eq!(c.try_next_closed().map(|x| x.reason), Some(CloseReason::Confirmed));

        tokio::time::sleep(DEFAULT_AUTO_HIDE * 2).await;
        assert!(c.try_next_closed().is_none(), "timer must not fire after confirm");
        assert_eq!(c.confirm().await, ConfirmOutcome::NotOpen);
        assert_eq!(marker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_failure_still_closes() {
        let (marker, mut c) = setup(true);
        c.open(student(), DEFAULT_AUTO_HIDE).unwrap();
        let outcome = c.confirm().await;
        assert_eq!(
            outcome,
            ConfirmOutcome::MarkFailed {
                student: student(),
                reason: "service unavailable".into()
            }
        );
        assert!(!c.is_open());
        assert_eq!(marker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_is_idempotent() {
        let (marker, mut c) = setup(false);
        c.open(student(), DEFAULT_AUTO_HIDE).unwrap();
        assert!(c.dismiss());
        assert!(!c.dismiss());
        assert_eq!(c.try_next_closed().map(|x| x.reason), Some(CloseReason::Dismissed));
        assert!(c.try_next_closed().is_none());
        assert_eq!(marker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_after_close_gets_fresh_timer() {
        let (_, mut c) = setup(false);
        c.open(student(), Duration::from_millis(100)).unwrap();
        c.dismiss();
        let _ = c.try_next_closed();

        c.open(student(), Duration::from_millis(1000)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(c.is_open(), "stale timer from first session must not close the second");
        let closed = c.next_closed().await.unwrap();
        assert_eq!(closed.reason, CloseReason::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_clears_without_notification() {
        let (marker, mut c) = setup(false);
        c.open(student(), DEFAULT_AUTO_HIDE).unwrap();
        c.cancel();
        c.cancel();
        assert!(!c.is_open());
        tokio::time::sleep(DEFAULT_AUTO_HIDE * 2).await;
        assert!(c.try_next_closed().is_none());
        assert_eq!(marker.calls.load(Ordering::SeqCst), 0);
    }
}
