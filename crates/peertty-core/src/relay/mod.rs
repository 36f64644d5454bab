//! One-way handshake through a polled blob relay
//!
//! The host publishes its offer with a random slot name; the client
//! writes its answer to that slot and the host polls until it appears.
//! Slots are addressed by slug only, so slugs must be long and random.

mod http;

use std::thread;
use std::time::{Duration, Instant};

use rand::RngExt;
use thiserror::Error;

pub use http::{HttpRelay, DEFAULT_RELAY_URL};

/// Largest body the relay accepts
pub const MAX_BLOB_LEN: usize = 10_000;

/// Slug length used for offers
pub const SLUG_LEN: usize = 100;

/// Default delay between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

const SLUG_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Errors from relay access
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("blob is {len} bytes, the relay accepts at most {MAX_BLOB_LEN}")]
    TooLarge { len: usize },

    #[error("relay returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("relay request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("timed out waiting for the answer after {0:?}")]
    Timeout(Duration),
}

/// Slug-addressed blob storage
pub trait BlobStore: Send + Sync {
    /// Store `body` under `slug`
    fn put(&self, slug: &str, body: &str) -> Result<(), RelayError>;

    /// Fetch the blob under `slug`, `None` while nothing has been stored
    fn get(&self, slug: &str) -> Result<Option<String>, RelayError>;
}

/// Store `blob` under `slug` after checking it fits
pub fn publish(store: &dyn BlobStore, slug: &str, blob: &str) -> Result<(), RelayError> {
    if blob.len() > MAX_BLOB_LEN {
        return Err(RelayError::TooLarge { len: blob.len() });
    }
    store.put(slug, blob)?;
    tracing::debug!(slug, len = blob.len(), "Published blob to relay");
    Ok(())
}

/// Block until a blob appears under `slug`.
///
/// Sleeps `interval` after every miss. Any error other than a miss ends
/// the wait. Without a `timeout` this waits forever.
pub fn poll_until_available(
    store: &dyn BlobStore,
    slug: &str,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<String, RelayError> {
    let deadline = timeout.map(|t| (Instant::now() + t, t));
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(body) = store.get(slug)? {
            tracing::debug!(attempts, "Relay blob available");
            return Ok(body);
        }

        if let Some((at, limit)) = deadline {
            if Instant::now() + interval > at {
                return Err(RelayError::Timeout(limit));
            }
        }
        tracing::trace!(attempts, "Relay blob not yet available");
        thread::sleep(interval);
    }
}

/// Random slug of `len` characters from `[0-9a-zA-Z]`
pub fn random_slug(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(SLUG_ALPHABET[rng.random_range(0..SLUG_ALPHABET.len())]))
        .collect()
}
