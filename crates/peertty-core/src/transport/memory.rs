//! In-process channel pair

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelEvent, Connection, DataChannel, TransportError};
use crate::protocol::Payload;

/// One end of a [`pair`]
pub struct MemoryChannel {
    peer: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    local: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    closed: AtomicBool,
}

impl DataChannel for MemoryChannel {
    fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.peer.lock().as_ref() {
            Some(peer) => peer
                .send(ChannelEvent::Message(payload))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for side in [&self.peer, &self.local] {
            if let Some(tx) = side.lock().take() {
                let _ = tx.send(ChannelEvent::Close);
            }
        }
    }
}

/// Two connected endpoints. Both streams start with [`ChannelEvent::Open`].
pub fn pair() -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let _ = a_tx.send(ChannelEvent::Open);
    let _ = b_tx.send(ChannelEvent::Open);

    let a = MemoryChannel {
        peer: Mutex::new(Some(b_tx.clone())),
        local: Mutex::new(Some(a_tx.clone())),
        closed: AtomicBool::new(false),
    };
    let b = MemoryChannel {
        peer: Mutex::new(Some(a_tx)),
        local: Mutex::new(Some(b_tx)),
        closed: AtomicBool::new(false),
    };

    (
        Connection {
            channel: Arc::new(a),
            events: a_rx,
        },
        Connection {
            channel: Arc::new(b),
            events: b_rx,
        },
    )
}
