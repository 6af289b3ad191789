// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::DeviceId;
use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::Rng;
use crate::crypto::x25519::{KeyPair, PublicKey};
use crate::crypto::xeddsa::{XSignature, xeddsa_verify};
use crate::error::{Result, SignalProtocolError};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::timestamp::Timestamp;

/// Identifier of a one-time pre-key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PreKeyId(u32);

impl PreKeyId {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PreKeyId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PreKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a signed pre-key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignedPreKeyId(u32);

impl SignedPreKeyId {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SignedPreKeyId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SignedPreKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-time pre-key with its secret, to be used for exactly one handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyRecord {
    id: PreKeyId,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: PreKeyId, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn generate(id: PreKeyId, rng: &Rng) -> Result<Self> {
        Ok(Self::new(id, KeyPair::generate(rng)?))
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn serialize(&self) -> std::result::Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

/// Medium-term pre-key signed by the identity key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    id: SignedPreKeyId,
    timestamp: Timestamp,
    key_pair: KeyPair,
    signature: XSignature,
}

impl SignedPreKeyRecord {
    pub fn new(
        id: SignedPreKeyId,
        timestamp: Timestamp,
        key_pair: KeyPair,
        signature: XSignature,
    ) -> Self {
        Self {
            id,
            timestamp,
            key_pair,
            signature,
        }
    }

    /// Generates a key pair and signs its serialized public key with the identity key.
    pub fn generate(
        id: SignedPreKeyId,
        timestamp: Timestamp,
        identity_key_pair: &IdentityKeyPair,
        rng: &Rng,
    ) -> Result<Self> {
        let key_pair = KeyPair::generate(rng)?;
        let signature = identity_key_pair.sign(&key_pair.public_key.serialize(), rng)?;
        Ok(Self::new(id, timestamp, key_pair, signature))
    }

    pub fn id(&self) -> SignedPreKeyId {
        self.id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn signature(&self) -> &XSignature {
        &self.signature
    }

    pub fn serialize(&self) -> std::result::Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

/// Public keys a party publishes so others can start a session with them while offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: DeviceId,
    pre_key: Option<(PreKeyId, PublicKey)>,
    signed_pre_key_id: SignedPreKeyId,
    signed_pre_key: PublicKey,
    signed_pre_key_signature: XSignature,
    identity_key: IdentityKey,
}

impl PreKeyBundle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: u32,
        device_id: DeviceId,
        pre_key: Option<(PreKeyId, PublicKey)>,
        signed_pre_key_id: SignedPreKeyId,
        signed_pre_key: PublicKey,
        signed_pre_key_signature: XSignature,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id,
            signed_pre_key,
            signed_pre_key_signature,
            identity_key,
        }
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key.map(|(id, _)| id)
    }

    pub fn pre_key_public(&self) -> Option<&PublicKey> {
        self.pre_key.as_ref().map(|(_, key)| key)
    }

    pub fn signed_pre_key_id(&self) -> SignedPreKeyId {
        self.signed_pre_key_id
    }

    pub fn signed_pre_key_public(&self) -> &PublicKey {
        &self.signed_pre_key
    }

    pub fn signed_pre_key_signature(&self) -> &XSignature {
        &self.signed_pre_key_signature
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Checks the identity's signature over the signed pre-key.
    pub fn verify(&self) -> Result<()> {
        xeddsa_verify(
            &self.signed_pre_key.serialize(),
            self.identity_key.public_key(),
            &self.signed_pre_key_signature,
        )
        .map_err(|_| SignalProtocolError::SignatureValidationFailed)
    }
}
