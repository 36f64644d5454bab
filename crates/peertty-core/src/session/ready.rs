//! One-shot readiness gate

use tokio::sync::watch;

/// Holds back work until a value becomes available.
///
/// Opened once with the value; anything awaiting [`ready`](Self::ready)
/// before then is woken without polling.
pub struct ReadyGate<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> ReadyGate<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish the value and release all waiters
    pub fn open(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// The value if the gate is open
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait until the gate opens
    pub async fn ready(&self) -> Option<T> {
        let mut rx = self.tx.subscribe();
        let value = rx.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }
}

impl<T: Clone> Default for ReadyGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
