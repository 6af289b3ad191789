// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term identity keys.
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::x25519::{KeyPair, PublicKey, SERIALIZED_PUBLIC_KEY_SIZE, SecretKey};
use crate::crypto::xeddsa::{XEdDSAError, XSignature, xeddsa_sign, xeddsa_verify};
use crate::crypto::{Rng, RngError};
use crate::error::Result;

/// Public identity of an account, used both for key agreement and for verifying signatures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey(PublicKey);

impl IdentityKey {
    pub fn new(public_key: PublicKey) -> Self {
        Self(public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_SIZE] {
        self.0.serialize()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self(PublicKey::deserialize(bytes)?))
    }

    /// Returns true if `signature` is a valid XEdDSA signature over `message` by this identity.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = XSignature::from_slice(signature) else {
            return false;
        };
        xeddsa_verify(message, &self.0, &signature).is_ok()
    }
}

impl From<PublicKey> for IdentityKey {
    fn from(public_key: PublicKey) -> Self {
        Self(public_key)
    }
}

impl ConstantTimeEq for IdentityKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity key with its secret half, owned by the local account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    secret_key: SecretKey,
}

impl IdentityKeyPair {
    pub fn new(identity_key: IdentityKey, secret_key: SecretKey) -> Self {
        Self {
            identity_key,
            secret_key,
        }
    }

    pub fn generate(rng: &Rng) -> std::result::Result<Self, RngError> {
        let key_pair = KeyPair::generate(rng)?;
        Ok(Self {
            identity_key: IdentityKey::new(key_pair.public_key),
            secret_key: key_pair.secret_key,
        })
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity_key.public_key()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn sign(&self, message: &[u8], rng: &Rng) -> std::result::Result<XSignature, XEdDSAError> {
        xeddsa_sign(message, &self.secret_key, rng)
    }

    pub fn serialize(&self) -> std::result::Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

impl From<IdentityKeyPair> for KeyPair {
    fn from(value: IdentityKeyPair) -> Self {
        KeyPair {
            public_key: *value.identity_key.public_key(),
            secret_key: value.secret_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{IdentityKey, IdentityKeyPair};

    #[test]
    fn signatures_verify_with_identity() {
        let rng = Rng::from_seed([1; 32]);
        let identity = IdentityKeyPair::generate(&rng).unwrap();

        let signature = identity.sign(b"certificate", &rng).unwrap();
        assert!(identity
            .identity_key()
            .verify_signature(b"certificate", signature.as_bytes()));
        assert!(!identity
            .identity_key()
            .verify_signature(b"other", signature.as_bytes()));
        assert!(!identity.identity_key().verify_signature(b"certificate", &[0; 12]));
    }

    #[test]
    fn serialize_key_pair() {
        let rng = Rng::from_seed([1; 32]);
        let identity = IdentityKeyPair::generate(&rng).unwrap();
        let bytes = identity.serialize().unwrap();
        assert_eq!(IdentityKeyPair::deserialize(&bytes).unwrap(), identity);

        let public = identity.identity_key().serialize();
        assert_eq!(
            IdentityKey::deserialize(&public).unwrap(),
            *identity.identity_key()
        );
    }
}
