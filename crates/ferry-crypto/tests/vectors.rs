//! Known-answer and cross-module tests for ferry-crypto.
//!
//! Covers the BLAKE3 official empty-input vector, AEAD behaviour on large
//! and empty messages, and full PAKE exchanges feeding the transfer key.

use ferry_crypto::aead::{AeadKey, Nonce};
use ferry_crypto::hash;
use ferry_crypto::{CryptoError, Curve, Envelope, Pake, Role};
use rand_core::OsRng;

// ============================================================================
// BLAKE3 Test Vectors
// ============================================================================

#[test]
fn test_blake3_empty() {
    let hash = hash::hash(b"");
    let expected =
        hex::decode("af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262").unwrap();

    assert_eq!(hash.to_vec(), expected);
}

#[test]
fn test_room_token_is_not_the_codephrase() {
    let token = hash::room_token("aaaa1111");
    assert!(!token.contains("aaaa1111"));
}

// ============================================================================
// XChaCha20-Poly1305
// ============================================================================

#[test]
fn test_xchacha_empty_message() {
    let key = AeadKey::generate(&mut OsRng);
    let nonce = Nonce::generate(&mut OsRng);

    let ciphertext = key.encrypt(&nonce, b"", b"").unwrap();
    assert_eq!(ciphertext.len(), 16);
    assert!(key.decrypt(&nonce, &ciphertext, b"").unwrap().is_empty());
}

#[test]
fn test_xchacha_large_message() {
    let key = AeadKey::generate(&mut OsRng);
    let nonce = Nonce::generate(&mut OsRng);
    let plaintext = vec![0xA5u8; 1_048_576];

    let ciphertext = key.encrypt(&nonce, &plaintext, b"").unwrap();
    assert_eq!(key.decrypt(&nonce, &ciphertext, b"").unwrap(), plaintext);
}

// ============================================================================
// PAKE to transfer key
// ============================================================================

fn exchange(curve: Curve) -> ([u8; 32], [u8; 32]) {
    let mut sender = Pake::init(b"aaaa1111", Role::Initiator, curve).unwrap();
    let mut receiver = Pake::init(b"aaaa1111", Role::Responder, curve).unwrap();

    receiver.update(&sender.bytes()).unwrap();
    sender.update(&receiver.bytes()).unwrap();
    receiver.update(&sender.bytes()).unwrap();

    (
        sender.session_key().unwrap(),
        receiver.session_key().unwrap(),
    )
}

#[test]
fn test_full_pipeline_all_curves() {
    for curve in [Curve::Ristretto255, Curve::P256] {
        let (k_send, k_recv) = exchange(curve);
        assert_eq!(k_send, k_recv, "curve {curve}");

        let salt = ferry_crypto::random::session_salt().unwrap();
        let send_key = hash::derive_transfer_key(&k_send, &salt);
        let envelope = Envelope::seal_with_salt(&send_key, b"file metadata", b"", &salt).unwrap();

        let wire = envelope.to_bytes().unwrap();
        let received = Envelope::from_bytes(&wire).unwrap();
        let recv_key = hash::derive_transfer_key(&k_recv, received.salt.as_deref().unwrap());
        assert_eq!(received.open(&recv_key, b"").unwrap(), b"file metadata");
    }
}

#[test]
fn test_independent_sessions_have_independent_keys() {
    let (a, _) = exchange(Curve::Ristretto255);
    let (b, _) = exchange(Curve::Ristretto255);
    assert_ne!(a, b);
}

#[test]
fn test_wrong_codephrase_reported_distinctly() {
    let mut sender = Pake::init(b"pw1", Role::Initiator, Curve::P256).unwrap();
    let mut receiver = Pake::init(b"pw2", Role::Responder, Curve::P256).unwrap();

    receiver.update(&sender.bytes()).unwrap();
    let err = sender.update(&receiver.bytes()).unwrap_err();
    assert!(matches!(err, CryptoError::WrongCodephrase));
    assert_eq!(err.to_string(), "wrong codephrase");

    let err = receiver.update(&sender.bytes()).unwrap_err();
    assert!(matches!(err, CryptoError::WrongCodephrase));
}
