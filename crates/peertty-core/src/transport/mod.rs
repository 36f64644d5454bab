//! Message channel between host and client
//!
//! Sessions see a transport as a [`DataChannel`] to send on plus an
//! ordered stream of [`ChannelEvent`]s. The stream is handed over when the
//! session is constructed, before any event can be delivered.

pub mod memory;
pub mod websocket;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::Payload;

/// Errors from the underlying transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel is closed")]
    Closed,

    #[error("transport failed: {0}")]
    Failed(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection rejected: {0}")]
    Rejected(String),
}

/// Lifecycle and data events of a channel, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is usable; always the first event
    Open,
    Message(Payload),
    /// The peer or the local side closed the channel
    Close,
    /// The transport failed; no further messages follow
    Error(String),
}

/// Receiving half of a channel
pub type EventStream = mpsc::UnboundedReceiver<ChannelEvent>;

/// Sending half of an ordered, reliable, boundary-preserving channel
pub trait DataChannel: Send + Sync {
    /// Queue one message. Never blocks, so pump threads may call it directly.
    fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Close the channel. Further sends fail; repeated calls are no-ops.
    fn close(&self);
}

/// An established channel
pub struct Connection {
    pub channel: Arc<dyn DataChannel>,
    pub events: EventStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
