//! Session descriptions and their copy-paste friendly encoding
//!
//! A description travels as a single base64 token: the `sdp` is
//! zlib-compressed and base64-encoded into the JSON document, and the JSON
//! document is base64-encoded again. When the description carries a key
//! and nonce the `sdp` holds hex-encoded AES-256-GCM ciphertext (see
//! [`crypto`]).

mod crypto;

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many `=` characters decoding will add back to a truncated token
const MAX_PADDING_RETRIES: usize = 2;

/// Errors from encoding, decoding or encrypting a session description
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid session description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to compress or inflate sdp: {0}")]
    Compression(#[from] std::io::Error),

    #[error("sdp is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("session description has a key without a nonce or a nonce without a key")]
    IncompleteKeys,

    #[error("session description carries no encryption keys")]
    MissingKeys,

    #[error("invalid hex in {field}: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("key must be 32 bytes and nonce 12 bytes")]
    KeyLength,

    #[error("failed to decrypt sdp: wrong key or tampered data")]
    Decrypt,

    #[error("failed to encrypt sdp")]
    Encrypt,
}

/// Connection-setup blob exchanged out of band before the channel opens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Transport parameters, or hex ciphertext when encrypted
    #[serde(rename = "Sdp")]
    pub sdp: String,

    /// Relay slot the answer should be published to
    #[serde(rename = "TenKbSiteLoc", default, with = "empty_as_none")]
    pub relay_slug: Option<String>,

    /// Hex-encoded 256-bit AES key
    #[serde(rename = "Key", default, with = "empty_as_none")]
    pub key: Option<String>,

    /// Hex-encoded 96-bit GCM nonce
    #[serde(rename = "Nonce", default, with = "empty_as_none")]
    pub nonce: Option<String>,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            ..Self::default()
        }
    }

    fn check_key_pair(&self) -> Result<(), SignalingError> {
        if self.key.is_some() != self.nonce.is_some() {
            return Err(SignalingError::IncompleteKeys);
        }
        Ok(())
    }
}

/// Encode a description into a single token
pub fn encode(description: &SessionDescription) -> Result<String, SignalingError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(description.sdp.as_bytes())?;
    let compressed = encoder.finish()?;

    let wire = SessionDescription {
        sdp: B64.encode(compressed),
        ..description.clone()
    };
    let json = serde_json::to_vec(&wire)?;
    Ok(B64.encode(json))
}

/// Decode a token produced by [`encode`].
///
/// Surrounding whitespace is ignored, and up to two missing trailing `=`
/// are tolerated since terminals tend to lose them on copy-paste.
pub fn decode(token: &str) -> Result<SessionDescription, SignalingError> {
    let json = decode_lenient(token.trim())?;
    let mut description: SessionDescription = serde_json::from_slice(&json)?;
    description.check_key_pair()?;

    let compressed = B64.decode(description.sdp.as_bytes())?;
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;
    description.sdp = String::from_utf8(inflated)?;

    Ok(description)
}

fn decode_lenient(token: &str) -> Result<Vec<u8>, SignalingError> {
    let mut candidate = token.to_string();
    let mut attempt = 0;
    loop {
        match B64.decode(candidate.as_bytes()) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt == MAX_PADDING_RETRIES => return Err(e.into()),
            Err(_) => {
                candidate.push('=');
                attempt += 1;
            }
        }
    }
}

/// Absent optionals are written as empty strings, and empty strings read
/// back as `None`
mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|s| !s.is_empty()))
    }
}
