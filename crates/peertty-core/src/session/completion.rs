//! Single-shot end-of-session signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::SessionResult;

/// Capacity-one signal carrying how the session ended.
///
/// The first [`fire`](Self::fire) wins. Later calls are accepted and
/// dropped, so pumps racing to report their own end never block.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    fired: AtomicBool,
    result: Mutex<Option<SessionResult>>,
    notify: Notify,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how the session ended. Returns `false` if it already had.
    pub fn fire(&self, result: SessionResult) -> bool {
        {
            let mut slot = self.inner.result.lock();
            if self.inner.fired.load(Ordering::Acquire) {
                tracing::debug!(?result, "Session already ended, ignoring");
                return false;
            }
            match &result {
                Ok(()) => tracing::debug!("Session ended"),
                Err(e) => tracing::debug!(error = %e, "Session ended with error"),
            }
            *slot = Some(result);
            self.inner.fired.store(true, Ordering::Release);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolve once the signal has fired
    pub async fn fired(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }

    /// Resolve with the winning result.
    ///
    /// The result is handed out once; later callers get `Ok(())`.
    pub async fn wait(&self) -> SessionResult {
        self.fired().await;
        self.inner.result.lock().take().unwrap_or(Ok(()))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("fired", &self.is_fired())
            .finish()
    }
}
