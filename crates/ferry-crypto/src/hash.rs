//! BLAKE3 hashing and key derivation.
//!
//! Provides:
//! - Plain hashing
//! - Context-specific KDF (keyed BLAKE3)
//! - Transfer key, room token and lane token derivation

use crate::aead::AeadKey;

/// BLAKE3 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// Length in bytes of relay tokens before hex encoding.
const TOKEN_BYTES: usize = 16;

/// Compute BLAKE3 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 Key Derivation Function with context.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kdf = Kdf::new("ferry transfer key");
    /// let key = kdf.derive_key(&session_key);
    /// ```
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive output from input key material.
    pub fn derive(&self, ikm: &[u8], output: &mut [u8]) {
        let key_hash = hash(ikm);
        let mut hasher = blake3::Hasher::new_keyed(&key_hash);
        hasher.update(self.context.as_bytes());

        let mut reader = hasher.finalize_xof();
        reader.fill(output);
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        let mut output = [0u8; 32];
        self.derive(ikm, &mut output);
        output
    }
}

/// Derive the block/metadata encryption key from the PAKE session key and
/// the salt chosen by the sender.
#[must_use]
pub fn derive_transfer_key(session_key: &[u8; 32], salt: &[u8]) -> AeadKey {
    let mut ikm = Vec::with_capacity(session_key.len() + salt.len());
    ikm.extend_from_slice(session_key);
    ikm.extend_from_slice(salt);
    let key = AeadKey::new(Kdf::new("ferry transfer key").derive_key(&ikm));
    zeroize::Zeroize::zeroize(&mut ikm);
    key
}

/// Characters of the codephrase that select the relay room.
pub const ROOM_PREFIX_CHARS: usize = 3;

/// Relay room token for the control channel.
///
/// Only the first [`ROOM_PREFIX_CHARS`] characters of the codephrase pick
/// the room, so the relay learns nothing useful about the rest of it.
#[must_use]
pub fn room_token(codephrase: &str) -> String {
    let prefix: String = codephrase.chars().take(ROOM_PREFIX_CHARS).collect();
    let mut out = [0u8; TOKEN_BYTES];
    Kdf::new("ferry room token").derive(prefix.as_bytes(), &mut out);
    hex::encode(out)
}

/// Relay room token for data lane `lane`, bound to the session key.
#[must_use]
pub fn lane_token(session_key: &[u8; 32], lane: u32) -> String {
    let mut ikm = [0u8; 36];
    ikm[..32].copy_from_slice(session_key);
    ikm[32..].copy_from_slice(&lane.to_be_bytes());
    let mut out = [0u8; TOKEN_BYTES];
    Kdf::new("ferry lane token").derive(&ikm, &mut out);
    hex::encode(out)
}
