// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-SHA256 message authentication.
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const HMAC_SHA256_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA256 over the concatenation of all given parts.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; HMAC_SHA256_SIZE] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Compares a (possibly truncated) MAC against the first bytes of the expected one in constant
/// time.
pub fn verify_truncated_mac(expected: &[u8; HMAC_SHA256_SIZE], their_mac: &[u8]) -> bool {
    if their_mac.is_empty() || their_mac.len() > HMAC_SHA256_SIZE {
        return false;
    }
    bool::from(expected[..their_mac.len()].ct_eq(their_mac))
}
