// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hashed Message Authentication Code (HMAC)-based key derivation function (HKDF) using
//! "hash-mode" with SHA256.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Derives `N` bytes of output key material.
///
/// A missing salt is equivalent to a salt of 32 zero bytes.
pub fn hkdf<const N: usize>(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<[u8; N], HkdfError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidArguments)?;
    Ok(okm)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("arguments too large for hkdf")]
    InvalidArguments,
}

#[cfg(test)]
mod tests {
    use super::hkdf;

    #[test]
    fn info_needs_to_match() {
        let result_1: [u8; 64] = hkdf(None, b"ikm", b"WhisperText").unwrap();
        let result_2: [u8; 64] = hkdf(None, b"ikm", b"WhisperText").unwrap();
        let result_3: [u8; 64] = hkdf(None, b"ikm", b"WhisperRatchet").unwrap();
        assert_eq!(result_1, result_2);
        assert_ne!(result_2, result_3);
    }

    #[test]
    fn empty_salt_is_zero_salt() {
        let result_1: [u8; 32] = hkdf(None, b"ikm", b"info").unwrap();
        let result_2: [u8; 32] = hkdf(Some(&[0u8; 32]), b"ikm", b"info").unwrap();
        assert_eq!(result_1, result_2);
    }

    #[test]
    fn rfc5869_test_case_1() {
        let ikm = [0x0b; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();
        let okm: [u8; 42] = hkdf(Some(&salt), &ikm, &info).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn output_too_long() {
        assert!(hkdf::<{ 255 * 32 + 1 }>(None, b"ikm", b"info").is_err());
    }
}
