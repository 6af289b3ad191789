// SPDX-License-Identifier: MIT OR Apache-2.0

//! XEdDSA signatures computed directly with X25519 key pairs, so identity keys can both agree on
//! secrets and sign pre-keys, certificates and sender key messages.
//!
//! <https://signal.org/docs/specifications/xeddsa/>
use std::fmt;

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::{EdwardsPoint, MontgomeryPoint, Scalar};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::sha2::sha2_512;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};

/// 512-bit signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Domain separation for the nonce hash, `hash1` of the XEdDSA paper.
const HASH_1_PREFIX: [u8; 32] = {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFE;
    prefix
};

/// XEdDSA signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XSignature(#[serde(with = "serde_bytes")] [u8; SIGNATURE_SIZE]);

impl XSignature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, XEdDSAError> {
        let bytes: [u8; SIGNATURE_SIZE] =
            bytes.try_into().map_err(|_| XEdDSAError::InvalidArgument)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for XSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Edwards public key `A` with sign bit forced to zero, together with the matching private scalar
/// `a`.
fn calculate_key_pair(secret_key: &SecretKey) -> (CompressedEdwardsY, Scalar) {
    let k = Scalar::from_bytes_mod_order(*secret_key.as_bytes());
    let cap_e = &k * ED25519_BASEPOINT_TABLE;
    let mut cap_a = cap_e.compress();
    let sign_bit = cap_a.0[31] >> 7;
    cap_a.0[31] &= 0b0111_1111_u8;
    let a = if sign_bit == 1 { -k } else { k };
    (cap_a, a)
}

/// Signs `message` with the X25519 secret key.
pub fn xeddsa_sign(
    message: &[u8],
    secret_key: &SecretKey,
    rng: &Rng,
) -> Result<XSignature, XEdDSAError> {
    let cap_z: [u8; SIGNATURE_SIZE] = rng.random_array()?;
    let (cap_a, a) = calculate_key_pair(secret_key);

    // r = hash1(a || M || Z) (mod q)
    let r = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        &HASH_1_PREFIX,
        a.as_bytes(),
        message,
        &cap_z,
    ]));

    // R = rB
    let cap_r = (&r * ED25519_BASEPOINT_TABLE).compress();

    // h = hash(R || A || M) (mod q)
    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[
        cap_r.as_bytes(),
        cap_a.as_bytes(),
        message,
    ]));

    // s = r + ha (mod q)
    let s = r + (h * a);

    let mut signature = [0u8; SIGNATURE_SIZE];
    signature[..32].copy_from_slice(cap_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    Ok(XSignature::from_bytes(signature))
}

/// Verifies an XEdDSA signature over `message` with the X25519 public key of the signer.
pub fn xeddsa_verify(
    message: &[u8],
    their_public_key: &PublicKey,
    signature: &XSignature,
) -> Result<(), XEdDSAError> {
    let (cap_r, s) = signature.as_bytes().split_at(32);
    let mut s: [u8; 32] = s.try_into().map_err(|_| XEdDSAError::InvalidArgument)?;
    s[31] &= 0b0111_1111_u8;
    if (s[31] & 0b1110_0000_u8) != 0 {
        return Err(XEdDSAError::InvalidArgument);
    }

    // Convert the Montgomery u-coordinate into an Edwards point with sign bit zero.
    let a = MontgomeryPoint(their_public_key.to_bytes())
        .to_edwards(0)
        .ok_or(XEdDSAError::InvalidArgument)?;
    let cap_a = a.compress();

    // h = hash(R || A || M) (mod q)
    let h = Scalar::from_bytes_mod_order_wide(&sha2_512(&[cap_r, cap_a.as_bytes(), message]));

    // Rcheck = sB - hA
    let cap_r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
        &h,
        &(-a),
        &Scalar::from_bytes_mod_order(s),
    )
    .compress();

    if bool::from(cap_r_check.as_bytes()[..].ct_eq(cap_r)) {
        Ok(())
    } else {
        Err(XEdDSAError::VerificationFailed)
    }
}

#[derive(Debug, Error)]
pub enum XEdDSAError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("invalid xeddsa public key or signature")]
    InvalidArgument,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;

    use super::{XEdDSAError, XSignature, xeddsa_sign, xeddsa_verify};

    #[test]
    fn sign_and_verify() {
        let rng = Rng::from_seed([1; 32]);
        let key_pair = KeyPair::generate(&rng).unwrap();

        let signature = xeddsa_sign(b"signed pre-key", &key_pair.secret_key, &rng).unwrap();
        assert!(xeddsa_verify(b"signed pre-key", &key_pair.public_key, &signature).is_ok());
    }

    #[test]
    fn failed_verify() {
        let rng = Rng::from_seed([1; 32]);
        let key_pair = KeyPair::generate(&rng).unwrap();
        let signature = xeddsa_sign(b"signed pre-key", &key_pair.secret_key, &rng).unwrap();

        let other = KeyPair::generate(&rng).unwrap();
        let other_signature = xeddsa_sign(b"signed pre-key", &other.secret_key, &rng).unwrap();

        assert!(matches!(
            xeddsa_verify(b"other bytes", &key_pair.public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"signed pre-key", &other.public_key, &signature),
            Err(XEdDSAError::VerificationFailed)
        ));
        assert!(matches!(
            xeddsa_verify(b"signed pre-key", &key_pair.public_key, &other_signature),
            Err(XEdDSAError::VerificationFailed)
        ));
    }

    #[test]
    fn signature_length_is_checked() {
        assert!(XSignature::from_slice(&[0; 63]).is_err());
        assert!(XSignature::from_slice(&[0; 64]).is_ok());
    }
}
