// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-recipient sealed sender.
//!
//! An ephemeral agreement with the recipient's identity key encrypts the sender's identity key.
//! A second agreement between both identity keys, salted with the first chain key and the
//! encrypted identity, encrypts the message content. The recipient learns the sender's identity
//! only from the first layer and checks it against the certificate inside the second.
use prost::Message;
use subtle::ConstantTimeEq;

use crate::crypto::aes::{aes_256_ctr_hmac_decrypt, aes_256_ctr_hmac_encrypt};
use crate::crypto::hkdf::hkdf;
use crate::crypto::x25519::{KeyPair, PublicKey};
use crate::crypto::{Rng, Secret};
use crate::error::{Result, SignalProtocolError};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::proto;
use crate::sealed_sender::UnidentifiedSenderMessageContent;
use crate::traits::Direction;

pub(crate) const SEALED_SENDER_V1_FULL_VERSION: u8 = 0x11;

const SALT_PREFIX: &[u8] = b"UnidentifiedDelivery";

struct EphemeralKeys {
    chain_key: Secret<32>,
    cipher_key: Secret<32>,
    mac_key: Secret<32>,
}

impl EphemeralKeys {
    /// The salt always orders the keys as recipient identity, then ephemeral key.
    fn calculate(our_keys: &KeyPair, their_public: &PublicKey, direction: Direction) -> Result<Self> {
        let our_public = our_keys.public_key.serialize();
        let their_public_serialized = their_public.serialize();
        let salt = match direction {
            Direction::Sending => [SALT_PREFIX, &their_public_serialized[..], &our_public[..]].concat(),
            Direction::Receiving => [SALT_PREFIX, &our_public[..], &their_public_serialized[..]].concat(),
        };

        let shared_secret = Secret::from_bytes(our_keys.calculate_agreement(their_public)?);
        let derived = Secret::from_bytes(hkdf::<96>(Some(&salt), shared_secret.as_bytes(), &[])?);
        let (chain_key, cipher_key, mac_key) = split_96(derived.as_bytes());

        Ok(Self {
            chain_key,
            cipher_key,
            mac_key,
        })
    }
}

struct StaticKeys {
    cipher_key: Secret<32>,
    mac_key: Secret<32>,
}

impl StaticKeys {
    fn calculate(
        our_keys: &KeyPair,
        their_key: &PublicKey,
        chain_key: &Secret<32>,
        encrypted_static: &[u8],
    ) -> Result<Self> {
        let salt = [&chain_key.as_bytes()[..], encrypted_static].concat();
        let shared_secret = Secret::from_bytes(our_keys.calculate_agreement(their_key)?);
        let derived = Secret::from_bytes(hkdf::<96>(Some(&salt), shared_secret.as_bytes(), &[])?);

        // First 32 bytes are unused.
        let (_, cipher_key, mac_key) = split_96(derived.as_bytes());

        Ok(Self {
            cipher_key,
            mac_key,
        })
    }
}

fn split_96(derived: &[u8; 96]) -> (Secret<32>, Secret<32>, Secret<32>) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    let mut third = [0u8; 32];
    first.copy_from_slice(&derived[0..32]);
    second.copy_from_slice(&derived[32..64]);
    third.copy_from_slice(&derived[64..96]);
    (
        Secret::from_bytes(first),
        Secret::from_bytes(second),
        Secret::from_bytes(third),
    )
}

pub(crate) fn encrypt(
    usmc: &UnidentifiedSenderMessageContent,
    our_identity: &IdentityKeyPair,
    their_identity: &IdentityKey,
    rng: &Rng,
) -> Result<Vec<u8>> {
    let our_identity = KeyPair::from(our_identity.clone());
    let ephemeral = KeyPair::generate(rng)?;

    let ephemeral_keys =
        EphemeralKeys::calculate(&ephemeral, their_identity.public_key(), Direction::Sending)?;
    let encrypted_static = aes_256_ctr_hmac_encrypt(
        &our_identity.public_key.serialize(),
        ephemeral_keys.cipher_key.as_bytes(),
        ephemeral_keys.mac_key.as_bytes(),
    )?;

    let static_keys = StaticKeys::calculate(
        &our_identity,
        their_identity.public_key(),
        &ephemeral_keys.chain_key,
        &encrypted_static,
    )?;
    let encrypted_message = aes_256_ctr_hmac_encrypt(
        usmc.serialized(),
        static_keys.cipher_key.as_bytes(),
        static_keys.mac_key.as_bytes(),
    )?;

    let message = proto::UnidentifiedSenderMessage {
        ephemeral_public: Some(ephemeral.public_key.serialize().to_vec()),
        encrypted_static: Some(encrypted_static),
        encrypted_message: Some(encrypted_message),
    };
    let mut serialized = Vec::with_capacity(1 + message.encoded_len());
    serialized.push(SEALED_SENDER_V1_FULL_VERSION);
    serialized.extend_from_slice(&message.encode_to_vec());
    Ok(serialized)
}

/// Decrypts the envelope following the version byte.
pub(crate) fn decrypt(
    body: &[u8],
    our_identity: &IdentityKeyPair,
) -> Result<UnidentifiedSenderMessageContent> {
    let message = proto::UnidentifiedSenderMessage::decode(body)?;
    let ephemeral_public = PublicKey::deserialize(
        &message
            .ephemeral_public
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
    )?;
    let encrypted_static = message
        .encrypted_static
        .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
    let encrypted_message = message
        .encrypted_message
        .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

    let our_identity = KeyPair::from(our_identity.clone());

    let ephemeral_keys =
        EphemeralKeys::calculate(&our_identity, &ephemeral_public, Direction::Receiving)?;
    let static_key_bytes = aes_256_ctr_hmac_decrypt(
        &encrypted_static,
        ephemeral_keys.cipher_key.as_bytes(),
        ephemeral_keys.mac_key.as_bytes(),
    )?;
    let static_key = PublicKey::deserialize(&static_key_bytes)?;

    let static_keys = StaticKeys::calculate(
        &our_identity,
        &static_key,
        &ephemeral_keys.chain_key,
        &encrypted_static,
    )?;
    let message_bytes = aes_256_ctr_hmac_decrypt(
        &encrypted_message,
        static_keys.cipher_key.as_bytes(),
        static_keys.mac_key.as_bytes(),
    )?;

    let usmc = UnidentifiedSenderMessageContent::deserialize(&message_bytes)?;

    if !bool::from(
        static_key_bytes[..].ct_eq(&usmc.sender().key().serialize()[..]),
    ) {
        return Err(SignalProtocolError::InvalidSealedSenderMessage(
            "sender certificate key does not match message key".into(),
        ));
    }

    Ok(usmc)
}
