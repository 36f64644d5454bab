//! WebSocket channel with ticket-gated accept
//!
//! The host binds a listener and advertises `ws://host:port` in its offer.
//! The client answers with a random ticket and connects to
//! `ws://host:port/<ticket>`; the host accepts only that path and rejects
//! every other upgrade with 403.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};

use super::{ChannelEvent, Connection, DataChannel, TransportError};
use crate::protocol::Payload;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum Outbound {
    Frame(Payload),
    Close,
}

/// Sending half of a WebSocket connection
struct WsChannel {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl DataChannel for WsChannel {
    fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Outbound::Frame(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Host-side listener waiting for the client
pub struct WsListener {
    listener: TcpListener,
    url: String,
}

impl WsListener {
    /// Bind `listen` and advertise the bound port under `advertise_host`
    pub async fn bind(listen: &str, advertise_host: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(listen).await?;
        let port = listener.local_addr()?.port();
        let host = if advertise_host.contains(':') && !advertise_host.starts_with('[') {
            format!("[{advertise_host}]")
        } else {
            advertise_host.to_string()
        };
        let url = format!("ws://{host}:{port}");
        tracing::debug!(%url, "Listening for client");
        Ok(Self { listener, url })
    }

    /// URL the client should connect to, without the ticket
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the client presenting `ticket`.
    ///
    /// Connections with any other path are rejected and waiting continues.
    pub async fn accept(self, ticket: &str) -> Result<Connection, TransportError> {
        let expected = format!("/{ticket}");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let check = |request: &Request, response: Response| {
                if request.uri().path() == expected {
                    Ok(response)
                } else {
                    let mut rejection = ErrorResponse::new(Some("invalid ticket".to_string()));
                    *rejection.status_mut() = StatusCode::FORBIDDEN;
                    Err(rejection)
                }
            };

            match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, check)).await {
                Ok(Ok(ws)) => {
                    tracing::debug!(%peer, "Client connected");
                    return Ok(spawn_connection(ws));
                }
                Ok(Err(e)) => tracing::warn!(%peer, error = %e, "Rejected connection"),
                Err(_) => tracing::warn!(%peer, "WebSocket handshake timed out"),
            }
        }
    }
}

/// Connect to a host at `url` presenting `ticket`
pub async fn connect(url: &str, ticket: &str) -> Result<Connection, TransportError> {
    let target = format!("{}/{}", url.trim_end_matches('/'), ticket);
    match connect_async(target.as_str()).await {
        Ok((ws, _response)) => {
            tracing::debug!(url, "Connected to host");
            Ok(spawn_connection(ws))
        }
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => Err(
            TransportError::Rejected(format!("host answered {}", response.status())),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Run reader and writer tasks for an upgraded stream
fn spawn_connection<S>(ws: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (event_tx, events) = mpsc::unbounded_channel();
    let _ = event_tx.send(ChannelEvent::Open);

    let writer_events = event_tx.clone();
    tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            let result = match outbound {
                Outbound::Frame(Payload::Binary(data)) => sink.send(Message::Binary(data)).await,
                Outbound::Frame(Payload::Text(text)) => sink.send(Message::text(text)).await,
                Outbound::Close => {
                    let _ = sink.close().await;
                    let _ = writer_events.send(ChannelEvent::Close);
                    break;
                }
            };
            if let Err(e) = result {
                let _ = writer_events.send(ChannelEvent::Error(e.to_string()));
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let event = match frame {
                Ok(Message::Binary(data)) => ChannelEvent::Message(Payload::Binary(data)),
                Ok(Message::Text(text)) => ChannelEvent::Message(Payload::Text(text.as_str().to_owned())),
                Ok(Message::Close(_)) => ChannelEvent::Close,
                Ok(_) => continue,
                Err(e) => ChannelEvent::Error(e.to_string()),
            };
            let last = !matches!(event, ChannelEvent::Message(_));
            if event_tx.send(event).is_err() || last {
                return;
            }
        }
        let _ = event_tx.send(ChannelEvent::Close);
    });

    Connection {
        channel: Arc::new(WsChannel {
            tx: out_tx,
            closed: AtomicBool::new(false),
        }),
        events,
    }
}
