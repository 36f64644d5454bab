//! Optional AES-256-GCM sealing of the `sdp` field
//!
//! Used by the one-way handshake, where descriptions pass through a third
//! party relay. The key and nonce travel inside the offer; the answer is
//! sealed with the same pair and sent back without them.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngExt;

use super::{SessionDescription, SignalingError};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

impl SessionDescription {
    /// Fill in a fresh random key and nonce
    pub fn generate_keys(&mut self) {
        let mut rng = rand::rng();
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut key);
        rng.fill(&mut nonce);
        self.key = Some(hex::encode(key));
        self.nonce = Some(hex::encode(nonce));
    }

    /// Whether this description carries a key pair
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some() && self.nonce.is_some()
    }

    /// Replace `sdp` with its hex-encoded ciphertext
    pub fn encrypt(&mut self) -> Result<(), SignalingError> {
        let (cipher, nonce) = self.cipher()?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), self.sdp.as_bytes())
            .map_err(|_| SignalingError::Encrypt)?;
        self.sdp = hex::encode(sealed);
        Ok(())
    }

    /// Replace the hex ciphertext in `sdp` with its plaintext.
    ///
    /// On any failure `sdp` is left as it was.
    pub fn decrypt(&mut self) -> Result<(), SignalingError> {
        let (cipher, nonce) = self.cipher()?;
        let sealed = hex::decode(&self.sdp).map_err(|source| SignalingError::Hex {
            field: "Sdp",
            source,
        })?;
        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| SignalingError::Decrypt)?;
        self.sdp = String::from_utf8(plain)?;
        Ok(())
    }

    /// Copy with key and nonce removed, for sending back to the key owner
    pub fn without_keys(&self) -> Self {
        Self {
            key: None,
            nonce: None,
            ..self.clone()
        }
    }

    /// Copy carrying `other`'s key and nonce
    pub fn with_keys_from(&self, other: &SessionDescription) -> Self {
        Self {
            key: other.key.clone(),
            nonce: other.nonce.clone(),
            ..self.clone()
        }
    }

    fn cipher(&self) -> Result<(Aes256Gcm, Vec<u8>), SignalingError> {
        self.check_key_pair()?;
        let (Some(key), Some(nonce)) = (&self.key, &self.nonce) else {
            return Err(SignalingError::MissingKeys);
        };

        let key = hex::decode(key).map_err(|source| SignalingError::Hex { field: "Key", source })?;
        let nonce = hex::decode(nonce).map_err(|source| SignalingError::Hex {
            field: "Nonce",
            source,
        })?;
        if key.len() != KEY_LEN || nonce.len() != NONCE_LEN {
            return Err(SignalingError::KeyLength);
        }

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SignalingError::KeyLength)?;
        Ok((cipher, nonce))
    }
}
