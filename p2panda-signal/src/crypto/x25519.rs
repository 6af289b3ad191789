// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie–Hellman (ECDH) key agreement scheme (X25519).
//!
//! Public keys travel on the wire with a one-byte type prefix (`0x05`, "DJB" keys), giving a
//! 33-byte serialization. The bare 32-byte form is used inside sealed sender v2.
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

use crate::crypto::{Rng, RngError, Secret};

/// 256-bit secret key size.
pub const SECRET_KEY_SIZE: usize = 32;

/// 256-bit public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Type prefix of serialized Curve25519 public keys.
pub const DJB_KEY_TYPE: u8 = 0x05;

/// Size of a type-prefixed public key.
pub const SERIALIZED_PUBLIC_KEY_SIZE: usize = PUBLIC_KEY_SIZE + 1;

/// Secret Curve25519 key used for ECDH key agreement and XEdDSA signatures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        let mut bytes = bytes;
        bytes[0] &= 248u8;
        bytes[31] &= 127u8;
        bytes[31] |= 64u8;
        SecretKey(Secret::from_bytes(bytes))
    }

    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_bytes(rng.random_array()?))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(*self.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// Computes the shared secret with the given public key.
    ///
    /// Low-order public keys lead to an all-zero shared secret and are rejected.
    pub fn calculate_agreement(
        &self,
        their_public: &PublicKey,
    ) -> Result<[u8; SECRET_KEY_SIZE], X25519Error> {
        let secret = x25519_dalek::StaticSecret::from(*self.as_bytes());
        let shared_secret = secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public.0));
        if !shared_secret.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(shared_secret.to_bytes())
    }
}

/// Public Curve25519 key used for ECDH key agreement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(public_key)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Type-prefixed 33-byte encoding.
    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_SIZE] {
        let mut out = [0u8; SERIALIZED_PUBLIC_KEY_SIZE];
        out[0] = DJB_KEY_TYPE;
        out[1..].copy_from_slice(&self.0);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, X25519Error> {
        let Some((key_type, key)) = bytes.split_first() else {
            return Err(X25519Error::NoKeyType);
        };
        if *key_type != DJB_KEY_TYPE {
            return Err(X25519Error::BadKeyType(*key_type));
        }
        let key: [u8; PUBLIC_KEY_SIZE] = key
            .try_into()
            .map_err(|_| X25519Error::BadKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl ConstantTimeEq for PublicKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Secret key together with its public counterpart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_secret_key(SecretKey::generate(rng)?))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn calculate_agreement(
        &self,
        their_public: &PublicKey,
    ) -> Result<[u8; SECRET_KEY_SIZE], X25519Error> {
        self.secret_key.calculate_agreement(their_public)
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("public key is missing its type byte")]
    NoKeyType,

    #[error("unknown public key type {0:#04x}")]
    BadKeyType(u8),

    #[error("invalid public key length {0}")]
    BadKeyLength(usize),

    #[error("key agreement with low-order public key")]
    NonContributory,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{KeyPair, PublicKey, SecretKey, X25519Error};

    #[test]
    fn diffie_hellmann() {
        let rng = Rng::from_seed([1; 32]);

        let alice = KeyPair::generate(&rng).unwrap();
        let bob = KeyPair::generate(&rng).unwrap();

        let alice_shared_secret = alice.calculate_agreement(&bob.public_key).unwrap();
        let bob_shared_secret = bob.calculate_agreement(&alice.public_key).unwrap();
        assert_eq!(alice_shared_secret, bob_shared_secret);
    }

    #[test]
    fn rfc7748_vector() {
        let alice_secret: [u8; 32] =
            hex::decode("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .unwrap()
                .try_into()
                .unwrap();
        let bob_public: [u8; 32] =
            hex::decode("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f")
                .unwrap()
                .try_into()
                .unwrap();

        let alice = SecretKey::from_bytes(alice_secret);
        assert_eq!(
            alice.public_key().to_hex(),
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
        );
        let shared = alice
            .calculate_agreement(&PublicKey::from_bytes(bob_public))
            .unwrap();
        assert_eq!(
            hex::encode(shared),
            "4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742"
        );
    }

    #[test]
    fn serialization_carries_type_byte() {
        let rng = Rng::from_seed([1; 32]);
        let key_pair = KeyPair::generate(&rng).unwrap();

        let bytes = key_pair.public_key.serialize();
        assert_eq!(bytes[0], 0x05);
        assert_eq!(PublicKey::deserialize(&bytes).unwrap(), key_pair.public_key);

        let mut wrong_type = bytes;
        wrong_type[0] = 0x06;
        assert!(matches!(
            PublicKey::deserialize(&wrong_type),
            Err(X25519Error::BadKeyType(0x06))
        ));
        assert!(matches!(
            PublicKey::deserialize(&bytes[..20]),
            Err(X25519Error::BadKeyLength(20))
        ));
        assert!(matches!(
            PublicKey::deserialize(&[]),
            Err(X25519Error::NoKeyType)
        ));
    }

    #[test]
    fn low_order_points_are_rejected() {
        let rng = Rng::from_seed([1; 32]);
        let key_pair = KeyPair::generate(&rng).unwrap();
        assert!(matches!(
            key_pair.calculate_agreement(&PublicKey::from_bytes([0; 32])),
            Err(X25519Error::NonContributory)
        ));
    }
}
