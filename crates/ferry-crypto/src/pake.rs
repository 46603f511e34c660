//! Two-message EC-PAKE with password-hash key confirmation.
//!
//! Both peers share fixed public points `U` and `V`, obtained by hashing
//! fixed labels onto the curve, and a weak password `pw` mapped to a scalar.
//!
//! ```text
//! role 0 (P)                                    role 1 (Q)
//! X = U·pw + G·α          ──── X ────►
//!                                               Y = V·pw + G·β
//!                                               Z = (X − U·pw)·β
//!                                               k = H(pw ‖ X ‖ Y ‖ Z)
//!                         ◄─── Y, H(k) ───
//! Z' = (Y − V·pw)·α
//! k' = H(pw ‖ X ‖ Y ‖ Z')
//! check H(k) against k'
//!                         ──── H(k') ────►
//!                                               check H(k') against k
//! ```
//!
//! `H` is BLAKE3; the confirmation hash is an Argon2id PHC string, so
//! verification runs through the argon2 crate's constant-time comparison.
//! The session key is only released once the peer's confirmation checked
//! out. A failed check yields [`CryptoError::WrongCodephrase`], and the
//! failing side still publishes its own confirmation so the peer fails too.
//!
//! Every received point is decoded and checked for group membership and
//! non-identity before any computation involving `α`, `β` or `pw`.

use crate::CryptoError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Argon2 memory cost for confirmation hashes (KiB).
const CONFIRM_MEMORY_KIB: u32 = 8 * 1024;

/// Argon2 iterations for confirmation hashes.
const CONFIRM_ITERATIONS: u32 = 2;

const LABEL_U: &[u8] = b"ferry pake U";
const LABEL_V: &[u8] = b"ferry pake V";
const LABEL_PW: &[u8] = b"ferry pake password";

/// Elliptic curve used for the exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    /// Ristretto255 prime-order group over Curve25519
    #[default]
    Ristretto255,
    /// NIST P-256
    P256,
}

impl Curve {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ristretto255 => "ristretto255",
            Self::P256 => "p256",
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Curve {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ristretto255" | "ristretto" => Ok(Self::Ristretto255),
            "p256" | "p-256" => Ok(Self::P256),
            other => Err(CryptoError::InvalidParameter(format!(
                "unknown curve: {other}"
            ))),
        }
    }
}

/// PAKE role. The two peers must hold different roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Role 0: sends X first (the file sender)
    Initiator,
    /// Role 1: answers with Y and the first confirmation (the receiver)
    Responder,
}

impl Role {
    /// Numeric role as carried on the wire.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Initiator => 0,
            Self::Responder => 1,
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Initiator),
            1 => Ok(Self::Responder),
            other => Err(CryptoError::InvalidParameter(format!(
                "invalid role: {other}"
            ))),
        }
    }
}

/// Wire form of a session's public state.
#[derive(Debug, Serialize, Deserialize)]
struct PublicState {
    role: u8,
    curve: Curve,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_b64::option"
    )]
    x: Option<Vec<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_b64::option"
    )]
    y: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hk_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hk_b: Option<String>,
}

// ============================================================================
// Group arithmetic
// ============================================================================

trait PakeGroup {
    type Scalar: Copy;
    type Point: Copy;

    fn blinding_points() -> Result<(Self::Point, Self::Point), CryptoError>;
    fn password_scalar(pw: &[u8]) -> Result<Self::Scalar, CryptoError>;
    fn random_scalar() -> Self::Scalar;
    /// `p·pw + G·secret`
    fn blind(p: Self::Point, pw: Self::Scalar, secret: Self::Scalar) -> Self::Point;
    /// `(p − q·pw)·secret`
    fn unblind(
        p: Self::Point,
        q: Self::Point,
        pw: Self::Scalar,
        secret: Self::Scalar,
    ) -> Self::Point;
    fn encode(p: &Self::Point) -> Vec<u8>;
    /// Decode and reject anything that is not a non-identity group element.
    fn decode(bytes: &[u8]) -> Result<Self::Point, CryptoError>;
}

struct Ristretto;

impl PakeGroup for Ristretto {
    type Scalar = curve25519_dalek::Scalar;
    type Point = curve25519_dalek::RistrettoPoint;

    fn blinding_points() -> Result<(Self::Point, Self::Point), CryptoError> {
        Ok((
            Self::Point::hash_from_bytes::<sha2::Sha512>(LABEL_U),
            Self::Point::hash_from_bytes::<sha2::Sha512>(LABEL_V),
        ))
    }

    fn password_scalar(pw: &[u8]) -> Result<Self::Scalar, CryptoError> {
        let mut input = Zeroizing::new(LABEL_PW.to_vec());
        input.extend_from_slice(pw);
        Ok(Self::Scalar::hash_from_bytes::<sha2::Sha512>(&input))
    }

    fn random_scalar() -> Self::Scalar {
        Self::Scalar::random(&mut OsRng)
    }

    fn blind(p: Self::Point, pw: Self::Scalar, secret: Self::Scalar) -> Self::Point {
        p * pw + curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT * secret
    }

    fn unblind(
        p: Self::Point,
        q: Self::Point,
        pw: Self::Scalar,
        secret: Self::Scalar,
    ) -> Self::Point {
        (p - q * pw) * secret
    }

    fn encode(p: &Self::Point) -> Vec<u8> {
        p.compress().to_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self::Point, CryptoError> {
        use curve25519_dalek::traits::IsIdentity;

        let point = curve25519_dalek::ristretto::CompressedRistretto::from_slice(bytes)
            .map_err(|_| CryptoError::InvalidPoint)?
            .decompress()
            .ok_or(CryptoError::InvalidPoint)?;
        if point.is_identity() {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(point)
    }
}

struct NistP256;

impl NistP256 {
    const DST: &'static [u8] = b"FERRY-PAKE-V1-P256_XMD:SHA-256_SSWU_RO_";
}

impl PakeGroup for NistP256 {
    type Scalar = p256::Scalar;
    type Point = p256::ProjectivePoint;

    fn blinding_points() -> Result<(Self::Point, Self::Point), CryptoError> {
        use p256::elliptic_curve::hash2curve::{ExpandMsgXmd, GroupDigest};

        let hash = |label: &[u8]| {
            p256::NistP256::hash_from_bytes::<ExpandMsgXmd<sha2::Sha256>>(&[label], &[Self::DST])
                .map_err(|_| CryptoError::KeyDerivationFailed)
        };
        Ok((hash(LABEL_U)?, hash(LABEL_V)?))
    }

    fn password_scalar(pw: &[u8]) -> Result<Self::Scalar, CryptoError> {
        use p256::elliptic_curve::hash2curve::{ExpandMsgXmd, GroupDigest};

        p256::NistP256::hash_to_scalar::<ExpandMsgXmd<sha2::Sha256>>(
            &[LABEL_PW, pw],
            &[Self::DST],
        )
        .map_err(|_| CryptoError::KeyDerivationFailed)
    }

    fn random_scalar() -> Self::Scalar {
        *p256::NonZeroScalar::random(&mut OsRng)
    }

    fn blind(p: Self::Point, pw: Self::Scalar, secret: Self::Scalar) -> Self::Point {
        use p256::elliptic_curve::group::Group;

        p * pw + Self::Point::generator() * secret
    }

    fn unblind(
        p: Self::Point,
        q: Self::Point,
        pw: Self::Scalar,
        secret: Self::Scalar,
    ) -> Self::Point {
        (p - q * pw) * secret
    }

    fn encode(p: &Self::Point) -> Vec<u8> {
        use p256::elliptic_curve::group::Curve as _;
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        p.to_affine().to_encoded_point(true).as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self::Point, CryptoError> {
        use p256::elliptic_curve::group::Group;
        use p256::elliptic_curve::sec1::FromEncodedPoint;

        let encoded = p256::EncodedPoint::from_bytes(bytes).map_err(|_| CryptoError::InvalidPoint)?;
        let affine: Option<p256::AffinePoint> =
            p256::AffinePoint::from_encoded_point(&encoded).into();
        let point = Self::Point::from(affine.ok_or(CryptoError::InvalidPoint)?);
        if bool::from(point.is_identity()) {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(point)
    }
}

/// Per-curve secret state: the password scalar and this side's blinding scalar.
struct Exchange<G: PakeGroup> {
    pw: G::Scalar,
    secret: G::Scalar,
    u: G::Point,
    v: G::Point,
}

impl<G: PakeGroup> Exchange<G> {
    fn new(pw: &[u8]) -> Result<Self, CryptoError> {
        let (u, v) = G::blinding_points()?;
        Ok(Self {
            pw: G::password_scalar(pw)?,
            secret: G::random_scalar(),
            u,
            v,
        })
    }

    fn first_message(&self) -> Vec<u8> {
        G::encode(&G::blind(self.u, self.pw, self.secret))
    }

    /// Returns `(Y, Z)`.
    fn respond(&self, x: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let x = G::decode(x)?;
        let y = G::blind(self.v, self.pw, self.secret);
        let z = G::unblind(x, self.u, self.pw, self.secret);
        Ok((G::encode(&y), G::encode(&z)))
    }

    /// Returns `Z'`.
    fn finish(&self, y: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let y = G::decode(y)?;
        Ok(G::encode(&G::unblind(y, self.v, self.pw, self.secret)))
    }
}

enum AnyExchange {
    Ristretto(Exchange<Ristretto>),
    P256(Exchange<NistP256>),
}

impl AnyExchange {
    fn new(curve: Curve, pw: &[u8]) -> Result<Self, CryptoError> {
        Ok(match curve {
            Curve::Ristretto255 => Self::Ristretto(Exchange::new(pw)?),
            Curve::P256 => Self::P256(Exchange::new(pw)?),
        })
    }

    fn first_message(&self) -> Vec<u8> {
        match self {
            Self::Ristretto(e) => e.first_message(),
            Self::P256(e) => e.first_message(),
        }
    }

    fn respond(&self, x: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        match self {
            Self::Ristretto(e) => e.respond(x),
            Self::P256(e) => e.respond(x),
        }
    }

    fn finish(&self, y: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Ristretto(e) => e.finish(y),
            Self::P256(e) => e.finish(y),
        }
    }
}

// ============================================================================
// Key confirmation
// ============================================================================

fn confirmation_hasher() -> Result<Argon2<'static>, CryptoError> {
    let params = Params::new(CONFIRM_MEMORY_KIB, CONFIRM_ITERATIONS, 1, None)
        .map_err(|e| CryptoError::InvalidParameter(format!("Argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn confirmation_hash(k: &[u8]) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    confirmation_hasher()?
        .hash_password(k, &salt)
        .map(|h| h.to_string())
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

fn verify_confirmation(k: &[u8], phc: &str) -> Result<bool, CryptoError> {
    let parsed =
        PasswordHash::new(phc).map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
    // The peer picks the cost parameters embedded in the hash; refuse costs
    // above our own so a hostile peer cannot make us burn memory.
    let params =
        Params::try_from(&parsed).map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
    if params.m_cost() > CONFIRM_MEMORY_KIB || params.t_cost() > CONFIRM_ITERATIONS {
        return Err(CryptoError::InvalidMessage(
            "confirmation hash cost too high".into(),
        ));
    }
    Ok(confirmation_hasher()?.verify_password(k, &parsed).is_ok())
}

// ============================================================================
// Session
// ============================================================================

/// One side of a PAKE exchange.
pub struct Pake {
    role: Role,
    curve: Curve,
    pw: Zeroizing<Vec<u8>>,
    exchange: AnyExchange,
    x: Option<Vec<u8>>,
    y: Option<Vec<u8>>,
    hk_a: Option<String>,
    hk_b: Option<String>,
    key: Option<Zeroizing<[u8; 32]>>,
    verified: bool,
}

impl Pake {
    /// Start a session. Role 0 computes `X` immediately; role 1 waits for it.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyDerivationFailed` if the curve's fixed points
    /// or the password scalar cannot be derived.
    pub fn init(weak_secret: &[u8], role: Role, curve: Curve) -> Result<Self, CryptoError> {
        let exchange = AnyExchange::new(curve, weak_secret)?;
        let x = match role {
            Role::Initiator => Some(exchange.first_message()),
            Role::Responder => None,
        };
        Ok(Self {
            role,
            curve,
            pw: Zeroizing::new(weak_secret.to_vec()),
            exchange,
            x,
            y: None,
            hk_a: None,
            hk_b: None,
            key: None,
            verified: false,
        })
    }

    /// This side's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Curve in use.
    #[must_use]
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Feed the peer's public state.
    ///
    /// # Errors
    ///
    /// - `RoleCollision` if the peer holds the same role
    /// - `CurveMismatch` if the peer uses another curve
    /// - `InvalidPoint` if a received point is not a valid group element
    /// - `WrongCodephrase` if key confirmation fails
    /// - `InvalidState` if the message does not fit the current phase
    pub fn update(&mut self, peer_bytes: &[u8]) -> Result<(), CryptoError> {
        let peer: PublicState = serde_json::from_slice(peer_bytes)
            .map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;

        if peer.role == self.role.as_u8() {
            return Err(CryptoError::RoleCollision(peer.role));
        }
        if peer.curve != self.curve {
            return Err(CryptoError::CurveMismatch {
                local: self.curve.to_string(),
                peer: peer.curve.to_string(),
            });
        }

        match self.role {
            Role::Responder => {
                if let Some(hk_a) = peer.hk_a {
                    self.check_final_confirmation(&hk_a)
                } else {
                    let x = peer.x.ok_or_else(|| {
                        CryptoError::InvalidMessage("missing X".into())
                    })?;
                    self.respond(x)
                }
            }
            Role::Initiator => {
                let (Some(y), Some(hk_b)) = (peer.y, peer.hk_b) else {
                    return Err(CryptoError::InvalidMessage("missing Y or H(k)".into()));
                };
                self.finish(y, &hk_b)
            }
        }
    }

    fn respond(&mut self, x: Vec<u8>) -> Result<(), CryptoError> {
        if self.y.is_some() {
            return Err(CryptoError::InvalidState);
        }
        let (y, z) = self.exchange.respond(&x)?;
        let k = self.derive_k(&x, &y, &z);
        self.hk_b = Some(confirmation_hash(k.as_ref())?);
        self.x = Some(x);
        self.y = Some(y);
        self.key = Some(k);
        Ok(())
    }

    fn finish(&mut self, y: Vec<u8>, hk_b: &str) -> Result<(), CryptoError> {
        if self.hk_a.is_some() {
            return Err(CryptoError::InvalidState);
        }
        let x = self.x.clone().ok_or(CryptoError::InvalidState)?;
        let z = self.exchange.finish(&y)?;
        let k = self.derive_k(&x, &y, &z);
        self.hk_a = Some(confirmation_hash(k.as_ref())?);
        self.y = Some(y);

        if !verify_confirmation(k.as_ref(), hk_b)? {
            return Err(CryptoError::WrongCodephrase);
        }
        self.key = Some(k);
        self.verified = true;
        Ok(())
    }

    fn check_final_confirmation(&mut self, hk_a: &str) -> Result<(), CryptoError> {
        if self.verified {
            return Err(CryptoError::InvalidState);
        }
        let k = self.key.as_ref().ok_or(CryptoError::InvalidState)?;
        if !verify_confirmation(k.as_ref(), hk_a)? {
            return Err(CryptoError::WrongCodephrase);
        }
        self.verified = true;
        Ok(())
    }

    fn derive_k(&self, x: &[u8], y: &[u8], z: &[u8]) -> Zeroizing<[u8; 32]> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.pw);
        hasher.update(x);
        hasher.update(y);
        hasher.update(z);
        Zeroizing::new(*hasher.finalize().as_bytes())
    }

    /// Serialized public state for transmission.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        let state = match self.role {
            Role::Initiator => PublicState {
                role: 0,
                curve: self.curve,
                x: self.x.clone(),
                y: None,
                hk_a: self.hk_a.clone(),
                hk_b: None,
            },
            Role::Responder => PublicState {
                role: 1,
                curve: self.curve,
                x: None,
                y: self.y.clone(),
                hk_a: None,
                hk_b: self.hk_b.clone(),
            },
        };
        // Serializing a struct of strings and byte vectors cannot fail.
        serde_json::to_vec(&state).unwrap_or_default()
    }

    /// Public state as base64, for text-oriented transports.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes())
    }

    /// [`Pake::update`] with base64-wrapped peer state.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidMessage` on bad base64, otherwise as
    /// [`Pake::update`].
    pub fn update_base64(&mut self, peer: &str) -> Result<(), CryptoError> {
        let bytes = STANDARD
            .decode(peer)
            .map_err(|e| CryptoError::InvalidMessage(e.to_string()))?;
        self.update(&bytes)
    }

    /// The derived session key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidState` until both confirmations verified.
    pub fn session_key(&self) -> Result<[u8; 32], CryptoError> {
        match (&self.key, self.verified) {
            (Some(k), true) => Ok(**k),
            _ => Err(CryptoError::InvalidState),
        }
    }

    /// Whether the peer's confirmation has been verified.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

impl fmt::Debug for Pake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pake")
            .field("role", &self.role)
            .field("curve", &self.curve)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Outcome = (Pake, Pake, Result<(), CryptoError>, Result<(), CryptoError>);

    fn run_exchange(pw_a: &[u8], pw_b: &[u8], curve: Curve) -> Outcome {
        let mut a = Pake::init(pw_a, Role::Initiator, curve).unwrap();
        let mut b = Pake::init(pw_b, Role::Responder, curve).unwrap();

        b.update(&a.bytes()).unwrap();
        let ra = a.update(&b.bytes());
        let rb = b.update(&a.bytes());
        (a, b, ra, rb)
    }

    #[test]
    fn test_pake_same_password_ristretto() {
        let (a, b, ra, rb) = run_exchange(b"aaaa1111", b"aaaa1111", Curve::Ristretto255);
        ra.unwrap();
        rb.unwrap();
        assert!(a.is_verified());
        assert!(b.is_verified());
        assert_eq!(a.session_key().unwrap(), b.session_key().unwrap());
    }

    #[test]
    fn test_pake_same_password_p256() {
        let (a, b, ra, rb) = run_exchange(b"hunter2", b"hunter2", Curve::P256);
        ra.unwrap();
        rb.unwrap();
        assert_eq!(a.session_key().unwrap(), b.session_key().unwrap());
    }

    #[test]
    fn test_pake_wrong_password_fails_both_sides() {
        let (a, b, ra, rb) = run_exchange(b"pw1", b"pw2", Curve::Ristretto255);
        assert!(matches!(ra, Err(CryptoError::WrongCodephrase)));
        assert!(matches!(rb, Err(CryptoError::WrongCodephrase)));
        assert!(!a.is_verified());
        assert!(!b.is_verified());
        assert!(a.session_key().is_err());
        assert!(b.session_key().is_err());
    }

    #[test]
    fn test_session_key_unavailable_before_verification() {
        let a = Pake::init(b"pw", Role::Initiator, Curve::Ristretto255).unwrap();
        let mut b = Pake::init(b"pw", Role::Responder, Curve::Ristretto255).unwrap();
        assert!(a.session_key().is_err());

        b.update(&a.bytes()).unwrap();
        // Responder has k but has not seen the initiator's confirmation.
        assert!(!b.is_verified());
        assert!(b.session_key().is_err());
    }

    #[test]
    fn test_role_collision() {
        let a = Pake::init(b"pw", Role::Initiator, Curve::Ristretto255).unwrap();
        let mut a2 = Pake::init(b"pw", Role::Initiator, Curve::Ristretto255).unwrap();
        assert!(matches!(
            a2.update(&a.bytes()),
            Err(CryptoError::RoleCollision(0))
        ));
    }

    #[test]
    fn test_curve_mismatch() {
        let a = Pake::init(b"pw", Role::Initiator, Curve::P256).unwrap();
        let mut b = Pake::init(b"pw", Role::Responder, Curve::Ristretto255).unwrap();
        assert!(matches!(
            b.update(&a.bytes()),
            Err(CryptoError::CurveMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_point_rejected() {
        let mut b = Pake::init(b"pw", Role::Responder, Curve::Ristretto255).unwrap();
        let bogus = serde_json::json!({
            "role": 0,
            "curve": "ristretto255",
            "x": STANDARD.encode([0xFFu8; 32]),
        });
        let result = b.update(&serde_json::to_vec(&bogus).unwrap());
        assert!(matches!(result, Err(CryptoError::InvalidPoint)));
        assert!(b.bytes().len() < 40, "no Y may be produced");
    }

    #[test]
    fn test_identity_point_rejected() {
        let mut b = Pake::init(b"pw", Role::Responder, Curve::Ristretto255).unwrap();
        let identity = serde_json::json!({
            "role": 0,
            "curve": "ristretto255",
            "x": STANDARD.encode([0u8; 32]),
        });
        assert!(matches!(
            b.update(&serde_json::to_vec(&identity).unwrap()),
            Err(CryptoError::InvalidPoint)
        ));
    }

    #[test]
    fn test_invalid_p256_point_rejected() {
        let mut b = Pake::init(b"pw", Role::Responder, Curve::P256).unwrap();
        let mut bad = vec![0x02u8];
        bad.extend_from_slice(&[0xFFu8; 32]);
        let msg = serde_json::json!({ "role": 0, "curve": "p256", "x": STANDARD.encode(bad) });
        assert!(matches!(
            b.update(&serde_json::to_vec(&msg).unwrap()),
            Err(CryptoError::InvalidPoint)
        ));
    }

    #[test]
    fn test_replayed_first_message_rejected() {
        let a = Pake::init(b"pw", Role::Initiator, Curve::Ristretto255).unwrap();
        let mut b = Pake::init(b"pw", Role::Responder, Curve::Ristretto255).unwrap();
        b.update(&a.bytes()).unwrap();
        assert!(matches!(b.update(&a.bytes()), Err(CryptoError::InvalidState)));
    }

    #[test]
    fn test_base64_roundtrip_exchange() {
        let mut a = Pake::init(b"aaaa1111", Role::Initiator, Curve::Ristretto255).unwrap();
        let mut b = Pake::init(b"aaaa1111", Role::Responder, Curve::Ristretto255).unwrap();
        b.update_base64(&a.to_base64()).unwrap();
        a.update_base64(&b.to_base64()).unwrap();
        b.update_base64(&a.to_base64()).unwrap();
        assert!(a.is_verified() && b.is_verified());
    }

    #[test]
    fn test_curve_parse_and_display() {
        assert_eq!("p256".parse::<Curve>().unwrap(), Curve::P256);
        assert_eq!("Ristretto255".parse::<Curve>().unwrap(), Curve::Ristretto255);
        assert!("siec".parse::<Curve>().is_err());
        assert_eq!(Curve::P256.to_string(), "p256");
        assert_eq!(Curve::default(), Curve::Ristretto255);
    }

    #[test]
    fn test_role_try_from() {
        assert_eq!(Role::try_from(0).unwrap(), Role::Initiator);
        assert_eq!(Role::try_from(1).unwrap(), Role::Responder);
        assert!(Role::try_from(2).is_err());
    }
}
