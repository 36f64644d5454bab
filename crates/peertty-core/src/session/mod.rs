//! Session protocol engine for both ends of the channel
//!
//! Each side consumes its [`EventStream`](crate::transport::EventStream) on a
//! single dispatcher task, so messages are handled in transport order.
//! Every end condition (peer quit, child exit, I/O failure, interrupt) is
//! funnelled into one [`Completion`], and cleanup runs once after it fires.

mod cleanup;
mod client;
mod completion;
mod host;
mod ready;

use std::io;

use thiserror::Error;
use tokio::task::JoinHandle;

pub use client::{ClientOptions, ClientSession};
pub use completion::Completion;
pub use host::{HostOptions, HostSession};
pub use ready::ReadyGate;

use crate::pty::PtyError;
use crate::terminal::TerminalError;
use crate::transport::TransportError;

/// Why a session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("interrupted")]
    Interrupted,

    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("unmatched message: {0:?}")]
    UnmatchedMessage(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// `Ok` for a graceful quit or child exit
pub type SessionResult = Result<(), SessionError>;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the channel to open
    AwaitingChannel,
    /// Channel open, process not spawned yet (host only)
    ProcessNotReady,
    /// Pumps running
    Ready,
    /// Completion fired and cleanup done
    Terminated,
}

/// Apply the unmatched-message policy
fn protocol_violation(strict: bool, raw: String) -> SessionResult {
    if strict {
        return Err(SessionError::UnmatchedMessage(raw));
    }
    tracing::warn!(message = %raw, "Ignoring unmatched message");
    Ok(())
}

/// Fire `Interrupted` when the process receives SIGINT
fn spawn_interrupt_watcher(completion: Completion) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::debug!("Interrupt received");
                    completion.fire(Err(SessionError::Interrupted));
                }
                Err(e) => tracing::warn!("Failed to listen for interrupt: {}", e),
            },
            _ = completion.fired() => {}
        }
    })
}

/// True for the error Linux returns from a pty master once the child is gone
fn is_pty_eof(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EIO)
}
