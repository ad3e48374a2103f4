//! Low-level cryptographic operations.
//!
//! This module is the only place in the crate that imports `ring` or
//! `subtle` directly. Credential hashing, constant-time comparison and
//! random material for token generation and secure erase all go through the
//! functions exposed here.
//!
//! Primitive choices:
//! - **Digest**: SHA-256 (256-bit output)
//! - **Comparison**: `subtle::ConstantTimeEq`, no early exit on mismatch
//! - **Randomness**: `ring::rand::SystemRandom`

use ring::digest::{self, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CustosError;

/// Size of a token digest in bytes (256 bits).
pub const DIGEST_LEN: usize = 32;

/// Number of random bytes behind a freshly generated token.
pub const TOKEN_BYTES: usize = 32;

/// Compute the SHA-256 digest of `input`.
pub fn sha256(input: &[u8]) -> [u8; DIGEST_LEN] {
    let d = digest::digest(&SHA256, input);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(d.as_ref());
    out
}

/// Compare two byte strings in time independent of their contents.
///
/// Lengths are not secret: slices of different length compare unequal
/// immediately. For equal lengths every byte is examined regardless of
/// where the first difference lies.
pub fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Fill a buffer of `len` bytes from the system RNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CustosError> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf).map_err(|_| CustosError::RandomnessFailure)?;
    Ok(buf)
}

/// Generate a fresh bearer token: `TOKEN_BYTES` random bytes, hex encoded.
///
/// The intermediate buffer and the returned string are wiped on drop.
pub fn generate_token() -> Result<Zeroizing<String>, CustosError> {
    let rng = SystemRandom::new();
    let mut raw = Zeroizing::new([0u8; TOKEN_BYTES]);
    rng.fill(&mut *raw).map_err(|_| CustosError::RandomnessFailure)?;
    Ok(Zeroizing::new(hex::encode(&*raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        let got = hex::encode(sha256(b"abc"));
        assert_eq!(
            got,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fixed_time_eq_rejects_any_difference() {
        let a = [7u8; DIGEST_LEN];
        let mut first = a;
        first[0] ^= 1;
        let mut last = a;
        last[DIGEST_LEN - 1] ^= 1;

        assert!(fixed_time_eq(&a, &a));
        assert!(!fixed_time_eq(&a, &first));
        assert!(!fixed_time_eq(&a, &last));
        assert!(!fixed_time_eq(&a, &a[..DIGEST_LEN - 1]));
    }

    #[test]
    fn generated_tokens_are_unique_hex() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(*a, *b);
    }
}
