//! Session liveness token.
//!
//! Every suspension point in a session runs through [`CancelToken::guard`],
//! so results that arrive after teardown are dropped instead of applied.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session cancelled")]
pub struct Cancelled;

/// Trigger side. Cloning shares the same token.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side handed to every suspension point.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the handle fires (or is dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for errors only when the sender is gone, which also ends the session
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless the session is cancelled first, then check again.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.checkpoint()?;
        let output = tokio::select! {
            biased;
            _ = self.cancelled() => return Err(Cancelled),
            out = fut => out,
        };
        self.checkpoint()?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_through_when_live() {
        let (_handle, token) = cancel_pair();
        assert_eq!(token.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_guard_rejects_after_cancel() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert_eq!(token.guard(async { 7 }).await, Err(Cancelled));
        assert!(token.checkpoint().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_interrupts_pending_future() {
        let (handle, token) = cancel_pair();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        };
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(token.guard(slow), canceller);
        assert_eq!(result, Err(Cancelled));
    }
}
