//! End-of-session cleanup, run exactly once per session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Completion, SessionResult};
use crate::protocol::Payload;
use crate::terminal::TerminalMode;
use crate::transport::DataChannel;

pub(crate) struct Coordinator {
    channel: Arc<dyn DataChannel>,
    completion: Completion,
    terminal: Arc<TerminalMode>,
    finished: AtomicBool,
}

impl Coordinator {
    pub(crate) fn new(
        channel: Arc<dyn DataChannel>,
        completion: Completion,
        terminal: Arc<TerminalMode>,
    ) -> Self {
        Self {
            channel,
            completion,
            terminal,
            finished: AtomicBool::new(false),
        }
    }

    /// Wait for the completion to fire, clean up, and hand back its result.
    ///
    /// `release` shuts down role-specific resources; it runs after the
    /// terminal is restored and before the channel is closed.
    pub(crate) async fn finish(&self, release: impl FnOnce()) -> SessionResult {
        let result = self.completion.wait().await;
        if self.finished.swap(true, Ordering::AcqRel) {
            return result;
        }

        if let Err(e) = self.channel.send(Payload::quit()) {
            tracing::debug!("Failed to send quit to peer: {}", e);
        }

        match self.terminal.restore() {
            Ok(true) => tracing::debug!("Terminal mode restored"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to restore terminal mode: {}", e),
        }

        release();
        self.channel.close();
        result
    }
}
