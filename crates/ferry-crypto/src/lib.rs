//! # Ferry Crypto
//!
//! Cryptographic primitives for the Ferry transfer protocol.
//!
//! This crate provides:
//! - A two-message EC-PAKE that turns a weak codephrase into a session key
//! - `XChaCha20-Poly1305` AEAD and serializable encryption envelopes
//! - BLAKE3 key derivation for transfer keys, room tokens and lane tokens
//! - Codephrase generation from the OS CSPRNG
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | PAKE group | Ristretto255 (default) or P-256 | 128-bit |
//! | PAKE confirmation | Argon2id PHC hash | N/A |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash | BLAKE3 | 128-bit collision |
//! | KDF | keyed BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod codephrase;
pub mod constant_time;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod pake;
pub mod random;
mod serde_b64;

pub use envelope::Envelope;
pub use error::CryptoError;
pub use pake::{Curve, Pake, Role};

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;

/// Size of the salt sent alongside the first encrypted envelope of a session
pub const SESSION_SALT_SIZE: usize = 16;
