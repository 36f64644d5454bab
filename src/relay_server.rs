//! Self-hosted blob relay for one-way connections
//!
//! Stores text blobs in memory under a slug: `PUT /{slug}` (or `POST`)
//! stores, `GET /{slug}` fetches. Slots are write-once and handed out
//! once: a second write gets 409 and a successful read removes the blob.
//! Unread blobs expire after a TTL, and the number of live slots is capped.

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

use peertty_core::relay::MAX_BLOB_LEN;

/// How long an unread blob is kept
const SLOT_TTL: Duration = Duration::from_secs(10 * 60);

/// Live slots allowed at once
const MAX_SLOTS: usize = 1024;

struct Slot {
    body: String,
    stored_at: Instant,
}

/// Shared blob storage
#[derive(Clone)]
pub struct RelayState {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(SLOT_TTL, MAX_SLOTS)
    }
}

impl RelayState {
    /// Storage keeping unread blobs for `ttl`, at most `capacity` at once
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity,
        }
    }
}

/// Build the relay routes
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/{slug}", get(get_blob).put(put_blob).post(put_blob))
        .with_state(state)
}

async fn put_blob(
    State(state): State<RelayState>,
    Path(slug): Path<String>,
    body: String,
) -> Response {
    if body.len() > MAX_BLOB_LEN {
        tracing::debug!(len = body.len(), "Rejected oversized blob");
        return (StatusCode::UNPROCESSABLE_ENTITY, "too long").into_response();
    }

    let mut slots = state.slots.write();
    slots.retain(|_, slot| slot.stored_at.elapsed() < state.ttl);
    if slots.contains_key(&slug) {
        tracing::debug!("Rejected write to taken slot");
        return (StatusCode::CONFLICT, "slot taken").into_response();
    }
    if slots.len() >= state.capacity {
        tracing::warn!(slots = slots.len(), "Relay full");
        return (StatusCode::SERVICE_UNAVAILABLE, "relay full").into_response();
    }

    tracing::debug!(len = body.len(), "Stored blob");
    slots.insert(
        slug,
        Slot {
            body,
            stored_at: Instant::now(),
        },
    );
    StatusCode::CREATED.into_response()
}

async fn get_blob(State(state): State<RelayState>, Path(slug): Path<String>) -> Response {
    let slot = state.slots.write().remove(&slug);
    match slot {
        Some(slot) if slot.stored_at.elapsed() < state.ttl => {
            (StatusCode::OK, slot.body).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Relay server bound to a port on all interfaces
pub struct RelayServer {
    port: u16,
    state: RelayState,
}

impl RelayServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: RelayState::default(),
        }
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Relay listening on http://{}", listener.local_addr()?);
        serve(listener, self.state).await
    }
}

/// Serve the relay on an already bound listener
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}
