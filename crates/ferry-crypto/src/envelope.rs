//! Serializable encryption envelopes for control-channel payloads.
//!
//! An [`Envelope`] carries a nonce, the AEAD ciphertext and, for the first
//! encrypted message of a session only, the salt the transfer key was
//! derived with. Byte fields are base64 in the JSON form so the envelope can
//! ride inside protocol messages and broker records unchanged.

use crate::CryptoError;
use crate::aead::{AeadKey, Nonce};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

/// Nonce, ciphertext and optional session salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Random 24-byte nonce
    #[serde(with = "crate::serde_b64")]
    pub nonce: Vec<u8>,
    /// Ciphertext with appended tag
    #[serde(with = "crate::serde_b64")]
    pub ciphertext: Vec<u8>,
    /// Key-derivation salt (session setup only)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_b64::option"
    )]
    pub salt: Option<Vec<u8>>,
}

impl Envelope {
    /// Seal `plaintext` under `key` with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn seal(key: &AeadKey, plaintext: &[u8], aad: &[u8]) -> Result<Self, CryptoError> {
        let nonce = Nonce::generate(&mut OsRng);
        let ciphertext = key.encrypt(&nonce, plaintext, aad)?;
        Ok(Self {
            nonce: nonce.as_bytes().to_vec(),
            ciphertext,
            salt: None,
        })
    }

    /// Seal and attach the salt the key was derived with.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn seal_with_salt(
        key: &AeadKey,
        plaintext: &[u8],
        aad: &[u8],
        salt: &[u8],
    ) -> Result<Self, CryptoError> {
        let mut envelope = Self::seal(key, plaintext, aad)?;
        envelope.salt = Some(salt.to_vec());
        Ok(envelope)
    }

    /// Open the envelope.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidNonceLength` for a malformed nonce and
    /// `CryptoError::DecryptionFailed` on authentication failure.
    pub fn open(&self, key: &AeadKey, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(&self.nonce).ok_or(CryptoError::InvalidNonceLength)?;
        key.decrypt(&nonce, &self.ciphertext, aad)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::InvalidMessage(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` if the bytes are not an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::InvalidMessage(e.to_string()))
    }
}
