// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric key chains of the Double Ratchet.
use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::crypto::hkdf::hkdf;
use crate::crypto::hmac::hmac_sha256;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::error::Result;

const MESSAGE_KEY_SEED: [u8; 1] = [0x01];

const CHAIN_KEY_SEED: [u8; 1] = [0x02];

const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

const ROOT_CHAIN_INFO: &[u8] = b"WhisperRatchet";

/// Keys protecting exactly one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKeys {
    cipher_key: Secret<32>,
    mac_key: Secret<32>,
    iv: Secret<16>,
    counter: u32,
}

impl MessageKeys {
    /// Expands a message key seed into cipher key, MAC key and IV.
    pub fn derive_keys(seed: &[u8; 32], counter: u32) -> Result<Self> {
        let okm: [u8; 80] = hkdf(None, seed, MESSAGE_KEYS_INFO)?;
        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[0..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..80]);
        Ok(Self {
            cipher_key: Secret::from_bytes(cipher_key),
            mac_key: Secret::from_bytes(mac_key),
            iv: Secret::from_bytes(iv),
            counter,
        })
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        self.cipher_key.as_bytes()
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        self.mac_key.as_bytes()
    }

    pub fn iv(&self) -> &[u8; 16] {
        self.iv.as_bytes()
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Position in a sending or receiving chain.
///
/// Chain keys are never mutated. Advancing returns the next key and the old one is dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainKey {
    key: Secret<32>,
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self {
            key: Secret::from_bytes(key),
            index,
        }
    }

    pub fn key(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn next_chain_key(&self) -> Self {
        Self {
            key: Secret::from_bytes(hmac_sha256(self.key(), &[&CHAIN_KEY_SEED])),
            index: self.index + 1,
        }
    }

    pub fn message_keys(&self) -> Result<MessageKeys> {
        let seed = Secret::from_bytes(hmac_sha256(self.key(), &[&MESSAGE_KEY_SEED]));
        MessageKeys::derive_keys(seed.as_bytes(), self.index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootKey {
    key: Secret<32>,
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Secret::from_bytes(key),
        }
    }

    pub fn key(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// DH ratchet step: mixes a fresh agreement into the root key, yielding the next root key and
    /// a new chain starting at index 0.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &SecretKey,
    ) -> Result<(RootKey, ChainKey)> {
        let shared_secret =
            Secret::from_bytes(our_ratchet_key.calculate_agreement(their_ratchet_key)?);
        let derived: [u8; 64] = hkdf(Some(self.key()), shared_secret.as_bytes(), ROOT_CHAIN_INFO)?;
        let (root_key, chain_key) = split_derived(derived);
        Ok((
            RootKey { key: root_key },
            ChainKey {
                key: chain_key,
                index: 0,
            },
        ))
    }
}

/// Splits 64 bytes of derived key material into two 32-byte secrets.
pub(crate) fn split_derived(derived: [u8; 64]) -> (Secret<32>, Secret<32>) {
    let derived = Secret::from_bytes(derived);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&derived.as_bytes()[..32]);
    second.copy_from_slice(&derived.as_bytes()[32..]);
    (Secret::from_bytes(first), Secret::from_bytes(second))
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;

    use super::{ChainKey, RootKey};

    #[test]
    fn chain_advances_one_way() {
        let chain_key = ChainKey::new([1; 32], 0);
        let next = chain_key.next_chain_key();
        assert_eq!(next.index(), 1);
        assert_ne!(next.key(), chain_key.key());

        // Deterministic derivation.
        assert_eq!(chain_key.next_chain_key(), next);

        let keys_0 = chain_key.message_keys().unwrap();
        let keys_1 = next.message_keys().unwrap();
        assert_eq!(keys_0.counter(), 0);
        assert_eq!(keys_1.counter(), 1);
        assert_ne!(keys_0.cipher_key(), keys_1.cipher_key());
        assert_ne!(keys_0.cipher_key(), keys_0.mac_key());
    }

    #[test]
    fn both_sides_create_the_same_chain() {
        let rng = Rng::from_seed([1; 32]);
        let alice = KeyPair::generate(&rng).unwrap();
        let bob = KeyPair::generate(&rng).unwrap();
        let root_key = RootKey::new([9; 32]);

        let (alice_root, alice_chain) = root_key
            .create_chain(&bob.public_key, &alice.secret_key)
            .unwrap();
        let (bob_root, bob_chain) = root_key
            .create_chain(&alice.public_key, &bob.secret_key)
            .unwrap();

        assert_eq!(alice_root, bob_root);
        assert_eq!(alice_chain, bob_chain);
        assert_eq!(alice_chain.index(), 0);
        assert_ne!(alice_root.key(), root_key.key());
    }
}
