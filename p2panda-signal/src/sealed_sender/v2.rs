// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-recipient sealed sender.
//!
//! The content is encrypted once under a key derived from a random message key `M`. Every
//! recipient gets `M` masked with an agreement between a derived ephemeral key `E` and their
//! identity key, plus an authentication tag binding the sender's identity to that recipient.
//!
//! A sent message addresses many recipients at once. The server splits it into one received
//! message per recipient device, see [`SealedSenderV2SentMessage`].
//!
//! [`SealedSenderV2SentMessage`]: crate::sealed_sender::SealedSenderV2SentMessage
use std::collections::HashSet;

use curve25519_dalek::Scalar;
use prost::encoding::encode_varint;
use subtle::ConstantTimeEq;

use crate::address::{DeviceId, ProtocolAddress, ServiceId};
use crate::crypto::aes::{aes_256_gcm_siv_decrypt, aes_256_gcm_siv_encrypt};
use crate::crypto::hkdf::hkdf;
use crate::crypto::x25519::{KeyPair, PUBLIC_KEY_SIZE, PublicKey, SecretKey};
use crate::crypto::{Rng, Secret};
use crate::error::{Result, SignalProtocolError};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::sealed_sender::UnidentifiedSenderMessageContent;
use crate::traits::Direction;

/// Version byte of the form delivered to a single recipient.
pub(crate) const SEALED_SENDER_V2_RECEIVED_VERSION: u8 = 0x22;

/// Version byte of the form uploaded by the sender, addressing recipients by service id.
pub(crate) const SEALED_SENDER_V2_SENT_VERSION: u8 = 0x23;

pub(crate) const MESSAGE_KEY_LEN: usize = 32;

pub(crate) const AUTH_TAG_LEN: usize = 16;

/// Highest registration id that fits next to the "has more devices" flag.
pub(crate) const MAX_REGISTRATION_ID: u32 = 0x3FFF;

const LABEL_R: &[u8] = b"Sealed Sender v2: r (2023-08)";
const LABEL_K: &[u8] = b"Sealed Sender v2: K";
const LABEL_DH: &[u8] = b"Sealed Sender v2: DH";
const LABEL_DH_S: &[u8] = b"Sealed Sender v2: DH-sender";

const ZERO_NONCE: [u8; 12] = [0u8; 12];

/// Ephemeral key pair `E` derived from the message key.
fn derive_e(message_key: &Secret<MESSAGE_KEY_LEN>) -> Result<KeyPair> {
    let r = Secret::from_bytes(hkdf::<64>(None, message_key.as_bytes(), LABEL_R)?);
    let scalar = Scalar::from_bytes_mod_order_wide(r.as_bytes());
    Ok(KeyPair::from_secret_key(SecretKey::from_bytes(
        scalar.to_bytes(),
    )))
}

/// Content encryption key `K` derived from the message key.
fn derive_k(message_key: &Secret<MESSAGE_KEY_LEN>) -> Result<Secret<32>> {
    Ok(Secret::from_bytes(hkdf(None, message_key.as_bytes(), LABEL_K)?))
}

/// XORs `input` with a key derived from the agreement between `E` and the recipient identity.
///
/// Both directions hash the keys in the order `E`, recipient.
fn apply_agreement_xor(
    our_keys: &KeyPair,
    their_key: &PublicKey,
    direction: Direction,
    input: &[u8; MESSAGE_KEY_LEN],
) -> Result<[u8; MESSAGE_KEY_LEN]> {
    let agreement = Secret::from_bytes(our_keys.calculate_agreement(their_key)?);
    let our_public = our_keys.public_key.serialize();
    let their_public = their_key.serialize();
    let agreement_key_input = match direction {
        Direction::Sending => [&agreement.as_bytes()[..], &our_public[..], &their_public[..]],
        Direction::Receiving => [&agreement.as_bytes()[..], &their_public[..], &our_public[..]],
    }
    .concat();

    let mut result: [u8; MESSAGE_KEY_LEN] = hkdf(None, &agreement_key_input, LABEL_DH)?;
    result
        .iter_mut()
        .zip(input)
        .for_each(|(result_byte, input_byte)| *result_byte ^= input_byte);
    Ok(result)
}

/// Authentication tag binding the sender identity, `E` and the masked message key to one
/// recipient.
///
/// Both directions hash the identities in the order sender, recipient.
fn compute_authentication_tag(
    our_keys: &KeyPair,
    their_key: &PublicKey,
    direction: Direction,
    ephemeral_public: &PublicKey,
    encrypted_message_key: &[u8; MESSAGE_KEY_LEN],
) -> Result<[u8; AUTH_TAG_LEN]> {
    let agreement = Secret::from_bytes(our_keys.calculate_agreement(their_key)?);
    let our_public = our_keys.public_key.serialize();
    let their_public = their_key.serialize();
    let mut agreement_key_input = [
        &agreement.as_bytes()[..],
        &ephemeral_public.serialize()[..],
        &encrypted_message_key[..],
    ]
    .concat();
    match direction {
        Direction::Sending => {
            agreement_key_input.extend_from_slice(&our_public);
            agreement_key_input.extend_from_slice(&their_public);
        }
        Direction::Receiving => {
            agreement_key_input.extend_from_slice(&their_public);
            agreement_key_input.extend_from_slice(&our_public);
        }
    }

    Ok(hkdf(None, &agreement_key_input, LABEL_DH_S)?)
}

/// Recipient of a multi-recipient message with all devices that should receive it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiRecipient {
    service_id: ServiceId,
    identity_key: IdentityKey,
    devices: Vec<(DeviceId, u32)>,
}

impl MultiRecipient {
    /// Devices are given with their registration ids.
    pub fn new(
        service_id: ServiceId,
        identity_key: IdentityKey,
        devices: Vec<(DeviceId, u32)>,
    ) -> Self {
        Self {
            service_id,
            identity_key,
            devices,
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn devices(&self) -> &[(DeviceId, u32)] {
        &self.devices
    }

    pub(crate) fn add_device(&mut self, device_id: DeviceId, registration_id: u32) {
        self.devices.push((device_id, registration_id));
    }
}

/// Encrypts `usmc` once for all `recipients` into the sent form.
///
/// `excluded_recipients` are listed without devices or key material, so the server learns they
/// were considered without any of them being able to decrypt.
pub fn sealed_sender_v2_encrypt(
    recipients: &[MultiRecipient],
    excluded_recipients: &[ServiceId],
    usmc: &UnidentifiedSenderMessageContent,
    our_identity: &IdentityKeyPair,
    rng: &Rng,
) -> Result<Vec<u8>> {
    // Receivers reject sent messages listing a service id more than once.
    let mut seen = HashSet::with_capacity(recipients.len() + excluded_recipients.len());
    for service_id in recipients
        .iter()
        .map(MultiRecipient::service_id)
        .chain(excluded_recipients.iter().copied())
    {
        if !seen.insert(service_id) {
            return Err(SignalProtocolError::InvalidArgument(format!(
                "recipient {service_id} listed more than once"
            )));
        }
    }

    let message_key = Secret::from_bytes(rng.random_array::<MESSAGE_KEY_LEN>()?);
    let ephemeral = derive_e(&message_key)?;
    let content_key = derive_k(&message_key)?;
    let ciphertext = aes_256_gcm_siv_encrypt(usmc.serialized(), content_key.as_bytes(), &ZERO_NONCE)?;

    let our_identity = KeyPair::from(our_identity.clone());

    let mut serialized = vec![SEALED_SENDER_V2_SENT_VERSION];
    encode_varint(
        (recipients.len() + excluded_recipients.len()) as u64,
        &mut serialized,
    );

    for recipient in recipients {
        if recipient.devices.is_empty() {
            return Err(SignalProtocolError::InvalidArgument(format!(
                "recipient {} has no devices",
                recipient.service_id
            )));
        }

        serialized.extend_from_slice(&recipient.service_id.service_id_fixed_width_binary());

        for (index, (device_id, registration_id)) in recipient.devices.iter().enumerate() {
            let device_byte = u8::try_from(device_id.id())
                .ok()
                .filter(|id| *id != 0)
                .ok_or_else(|| {
                    SignalProtocolError::InvalidArgument(format!(
                        "device id {device_id} of {} cannot be encoded",
                        recipient.service_id
                    ))
                })?;
            if *registration_id > MAX_REGISTRATION_ID {
                return Err(SignalProtocolError::InvalidRegistrationId(
                    ProtocolAddress::new(
                        recipient.service_id.service_id_string(),
                        *device_id,
                    ),
                    *registration_id,
                ));
            }

            let has_more = index + 1 < recipient.devices.len();
            let mut registration_id = *registration_id as u16;
            if has_more {
                registration_id |= 0x8000;
            }
            serialized.push(device_byte);
            serialized.extend_from_slice(&registration_id.to_be_bytes());
        }

        let their_identity = recipient.identity_key.public_key();
        let encrypted_message_key = apply_agreement_xor(
            &ephemeral,
            their_identity,
            Direction::Sending,
            message_key.as_bytes(),
        )?;
        let authentication_tag = compute_authentication_tag(
            &our_identity,
            their_identity,
            Direction::Sending,
            &ephemeral.public_key,
            &encrypted_message_key,
        )?;
        serialized.extend_from_slice(&encrypted_message_key);
        serialized.extend_from_slice(&authentication_tag);
    }

    for excluded in excluded_recipients {
        serialized.extend_from_slice(&excluded.service_id_fixed_width_binary());
        serialized.push(0);
    }

    serialized.extend_from_slice(ephemeral.public_key.as_bytes());
    serialized.extend_from_slice(&ciphertext);

    Ok(serialized)
}

/// Decrypts the received form following the version byte: `C || AT || E || ciphertext`.
pub(crate) fn decrypt_received(
    body: &[u8],
    our_identity: &IdentityKeyPair,
) -> Result<UnidentifiedSenderMessageContent> {
    if body.len() < MESSAGE_KEY_LEN + AUTH_TAG_LEN + PUBLIC_KEY_SIZE {
        return Err(SignalProtocolError::InvalidSealedSenderMessage(
            "message too short".into(),
        ));
    }
    let (encrypted_message_key, rest) = body.split_at(MESSAGE_KEY_LEN);
    let (authentication_tag, rest) = rest.split_at(AUTH_TAG_LEN);
    let (ephemeral_public, ciphertext) = rest.split_at(PUBLIC_KEY_SIZE);

    let encrypted_message_key: &[u8; MESSAGE_KEY_LEN] = encrypted_message_key
        .try_into()
        .expect("split at message key length");
    let ephemeral_public = PublicKey::from_bytes(
        ephemeral_public
            .try_into()
            .expect("split at public key length"),
    );

    let our_identity = KeyPair::from(our_identity.clone());

    let message_key = Secret::from_bytes(apply_agreement_xor(
        &our_identity,
        &ephemeral_public,
        Direction::Receiving,
        encrypted_message_key,
    )?);

    let ephemeral = derive_e(&message_key)?;
    if !bool::from(ephemeral.public_key.ct_eq(&ephemeral_public)) {
        return Err(SignalProtocolError::InvalidSealedSenderMessage(
            "derived ephemeral key did not match key provided in message".into(),
        ));
    }

    let content_key = derive_k(&message_key)?;
    let plaintext = aes_256_gcm_siv_decrypt(ciphertext, content_key.as_bytes(), &ZERO_NONCE)?;
    let usmc = UnidentifiedSenderMessageContent::deserialize(&plaintext)?;

    let expected_tag = compute_authentication_tag(
        &our_identity,
        usmc.sender().key(),
        Direction::Receiving,
        &ephemeral_public,
        encrypted_message_key,
    )?;
    if !bool::from(expected_tag[..].ct_eq(authentication_tag)) {
        return Err(SignalProtocolError::InvalidSealedSenderMessage(
            "sender certificate key does not match authentication tag".into(),
        ));
    }

    Ok(usmc)
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::Secret;
    use crate::crypto::x25519::KeyPair;
    use crate::traits::Direction;

    use super::{apply_agreement_xor, compute_authentication_tag, derive_e};

    #[test]
    fn masked_message_key_unmasks() {
        let rng = Rng::from_seed([1; 32]);
        let message_key = Secret::from_bytes([7u8; 32]);
        let ephemeral = derive_e(&message_key).unwrap();
        let recipient = KeyPair::generate(&rng).unwrap();

        let masked = apply_agreement_xor(
            &ephemeral,
            &recipient.public_key,
            Direction::Sending,
            message_key.as_bytes(),
        )
        .unwrap();
        assert_ne!(&masked, message_key.as_bytes());

        let unmasked = apply_agreement_xor(
            &recipient,
            &ephemeral.public_key,
            Direction::Receiving,
            &masked,
        )
        .unwrap();
        assert_eq!(&unmasked, message_key.as_bytes());
        assert_eq!(derive_e(&Secret::from_bytes(unmasked)).unwrap(), ephemeral);
    }

    #[test]
    fn tags_agree_between_directions() {
        let rng = Rng::from_seed([2; 32]);
        let sender = KeyPair::generate(&rng).unwrap();
        let recipient = KeyPair::generate(&rng).unwrap();
        let other = KeyPair::generate(&rng).unwrap();
        let ephemeral = KeyPair::generate(&rng).unwrap();

        let sent = compute_authentication_tag(
            &sender,
            &recipient.public_key,
            Direction::Sending,
            &ephemeral.public_key,
            &[1; 32],
        )
        .unwrap();
        let received = compute_authentication_tag(
            &recipient,
            &sender.public_key,
            Direction::Receiving,
            &ephemeral.public_key,
            &[1; 32],
        )
        .unwrap();
        assert_eq!(sent, received);

        let forged = compute_authentication_tag(
            &recipient,
            &other.public_key,
            Direction::Receiving,
            &ephemeral.public_key,
            &[1; 32],
        )
        .unwrap();
        assert_ne!(sent, forged);
    }
}
