//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::CryptoError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a fresh session salt.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn session_salt() -> Result<[u8; crate::SESSION_SALT_SIZE], CryptoError> {
    let mut buf = [0u8; crate::SESSION_SALT_SIZE];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Uniform random index in `0..bound` without modulo bias.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails,
/// or [`CryptoError::InvalidParameter`] if `bound` is zero.
pub fn random_index(bound: u32) -> Result<u32, CryptoError> {
    if bound == 0 {
        return Err(CryptoError::InvalidParameter("bound must be non-zero".into()));
    }
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let mut buf = [0u8; 4];
        fill_random(&mut buf)?;
        let v = u32::from_le_bytes(buf);
        if v < zone {
            return Ok(v % bound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_salt_random() {
        assert_ne!(session_salt().unwrap(), session_salt().unwrap());
    }

    #[test]
    fn test_random_index_bounds() {
        for _ in 0..1000 {
            assert!(random_index(7).unwrap() < 7);
        }
        assert_eq!(random_index(1).unwrap(), 0);
        assert!(random_index(0).is_err());
    }
}
