// SPDX-License-Identifier: MIT OR Apache-2.0

use prost::Message;

use crate::crypto::hmac::{hmac_sha256, verify_truncated_mac};
use crate::crypto::x25519::PublicKey;
use crate::error::{Result, SignalProtocolError};
use crate::identity::IdentityKey;
use crate::proto;
use crate::protocol::{parse_version_byte, version_byte};
use crate::state::{PreKeyId, SignedPreKeyId};

/// Ratchet-encrypted message: `[version][protobuf][8-byte MAC]`.
#[derive(Clone, Debug)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SignalMessage {
    pub const MAC_LENGTH: usize = 8;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: &[u8],
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
    ) -> Self {
        let message = proto::SignalMessage {
            ratchet_key: Some(sender_ratchet_key.serialize().to_vec()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.to_vec()),
        };
        let mut serialized = Vec::with_capacity(1 + message.encoded_len() + Self::MAC_LENGTH);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&message.encode_to_vec());
        let mac = compute_mac(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &serialized,
        );
        serialized.extend_from_slice(&mac[..Self::MAC_LENGTH]);

        Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.into(),
            serialized: serialized.into_boxed_slice(),
        }
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Recomputes the MAC over everything but the trailing MAC and compares in constant time.
    pub fn verify_mac(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> bool {
        let boundary = self.serialized.len() - Self::MAC_LENGTH;
        let our_mac = compute_mac(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &self.serialized[..boundary],
        );
        verify_truncated_mac(&our_mac, &self.serialized[boundary..])
    }
}

fn compute_mac(
    sender_identity_key: &IdentityKey,
    receiver_identity_key: &IdentityKey,
    mac_key: &[u8; 32],
    message: &[u8],
) -> [u8; 32] {
    hmac_sha256(
        mac_key,
        &[
            &sender_identity_key.serialize(),
            &receiver_identity_key.serialize(),
            message,
        ],
    )
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() < 1 + SignalMessage::MAC_LENGTH {
            return Err(SignalProtocolError::CiphertextMessageTooShort(value.len()));
        }
        let message_version = parse_version_byte(value[0])?;
        let message =
            proto::SignalMessage::decode(&value[1..value.len() - SignalMessage::MAC_LENGTH])?;

        let sender_ratchet_key = message
            .ratchet_key
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let sender_ratchet_key = PublicKey::deserialize(&sender_ratchet_key)?;
        let counter = message
            .counter
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let previous_counter = message.previous_counter.unwrap_or(0);
        let ciphertext = message
            .ciphertext
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.into_boxed_slice(),
            serialized: value.into(),
        })
    }
}

/// First message(s) of a session, carrying everything the responder needs to run X3DH.
#[derive(Clone, Debug)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: SignedPreKeyId,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Box<[u8]>,
}

impl PreKeySignalMessage {
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<PreKeyId>,
        signed_pre_key_id: SignedPreKeyId,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Self {
        let proto_message = proto::PreKeySignalMessage {
            registration_id: Some(registration_id),
            pre_key_id: pre_key_id.map(|id| id.id()),
            signed_pre_key_id: Some(signed_pre_key_id.id()),
            base_key: Some(base_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            message: Some(message.serialized().to_vec()),
        };
        let mut serialized = Vec::with_capacity(1 + proto_message.encoded_len());
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&proto_message.encode_to_vec());

        Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: serialized.into_boxed_slice(),
        }
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> SignedPreKeyId {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let Some((version, body)) = value.split_first() else {
            return Err(SignalProtocolError::CiphertextMessageTooShort(0));
        };
        let message_version = parse_version_byte(*version)?;
        let message = proto::PreKeySignalMessage::decode(body)?;

        let base_key = message
            .base_key
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let identity_key = message
            .identity_key
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let inner = message
            .message
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let signed_pre_key_id = message
            .signed_pre_key_id
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            message_version,
            registration_id: message.registration_id.unwrap_or(0),
            pre_key_id: message.pre_key_id.map(PreKeyId::from),
            signed_pre_key_id: SignedPreKeyId::from(signed_pre_key_id),
            base_key: PublicKey::deserialize(&base_key)?,
            identity_key: IdentityKey::deserialize(&identity_key)?,
            message: SignalMessage::try_from(inner.as_ref())?,
            serialized: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;
    use crate::error::SignalProtocolError;
    use crate::identity::IdentityKeyPair;
    use crate::state::{PreKeyId, SignedPreKeyId};

    use super::{PreKeySignalMessage, SignalMessage};

    fn signal_message(rng: &Rng) -> (SignalMessage, IdentityKeyPair, IdentityKeyPair, [u8; 32]) {
        let sender = IdentityKeyPair::generate(rng).unwrap();
        let receiver = IdentityKeyPair::generate(rng).unwrap();
        let ratchet_key = KeyPair::generate(rng).unwrap();
        let mac_key = rng.random_array().unwrap();
        let message = SignalMessage::new(
            3,
            &mac_key,
            ratchet_key.public_key,
            42,
            41,
            &[1; 32],
            sender.identity_key(),
            receiver.identity_key(),
        );
        (message, sender, receiver, mac_key)
    }

    #[test]
    fn signal_message_layout() {
        let rng = Rng::from_seed([1; 32]);
        let (message, sender, receiver, mac_key) = signal_message(&rng);

        assert_eq!(message.serialized()[0], 0x33);
        assert!(message.verify_mac(sender.identity_key(), receiver.identity_key(), &mac_key));
        // MAC binds the direction of the identities.
        assert!(!message.verify_mac(receiver.identity_key(), sender.identity_key(), &mac_key));

        let parsed = SignalMessage::try_from(message.serialized()).unwrap();
        assert_eq!(parsed.counter(), 42);
        assert_eq!(parsed.previous_counter(), 41);
        assert_eq!(parsed.sender_ratchet_key(), message.sender_ratchet_key());
        assert_eq!(parsed.body(), &[1; 32]);
        assert!(parsed.verify_mac(sender.identity_key(), receiver.identity_key(), &mac_key));
    }

    #[test]
    fn flipped_mac_fails_verification() {
        let rng = Rng::from_seed([2; 32]);
        let (message, sender, receiver, mac_key) = signal_message(&rng);

        let len = message.serialized().len();
        for index in len - SignalMessage::MAC_LENGTH..len {
            let mut bytes = message.serialized().to_vec();
            bytes[index] ^= 0x01;
            let parsed = SignalMessage::try_from(bytes.as_slice()).unwrap();
            assert!(!parsed.verify_mac(sender.identity_key(), receiver.identity_key(), &mac_key));
        }
    }

    #[test]
    fn malformed_signal_messages() {
        assert!(matches!(
            SignalMessage::try_from(&[0x33, 1, 2][..]),
            Err(SignalProtocolError::CiphertextMessageTooShort(3))
        ));
        assert!(matches!(
            SignalMessage::try_from(&[0x22; 20][..]),
            Err(SignalProtocolError::LegacyCiphertextVersion(2))
        ));
        assert!(matches!(
            SignalMessage::try_from(&[0x33, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0, 0][..]),
            Err(SignalProtocolError::InvalidProtobufEncoding)
        ));
    }

    #[test]
    fn pre_key_message_layout() {
        let rng = Rng::from_seed([3; 32]);
        let (message, sender, _, _) = signal_message(&rng);
        let base_key = KeyPair::generate(&rng).unwrap();

        let pre_key_message = PreKeySignalMessage::new(
            3,
            1234,
            Some(PreKeyId::from(7)),
            SignedPreKeyId::from(9),
            base_key.public_key,
            *sender.identity_key(),
            message.clone(),
        );
        assert_eq!(pre_key_message.serialized()[0], 0x33);

        let parsed = PreKeySignalMessage::try_from(pre_key_message.serialized()).unwrap();
        assert_eq!(parsed.registration_id(), 1234);
        assert_eq!(parsed.pre_key_id(), Some(PreKeyId::from(7)));
        assert_eq!(parsed.signed_pre_key_id(), SignedPreKeyId::from(9));
        assert_eq!(parsed.base_key(), &base_key.public_key);
        assert_eq!(parsed.identity_key(), sender.identity_key());
        assert_eq!(parsed.message().serialized(), message.serialized());

        assert!(matches!(
            PreKeySignalMessage::try_from(&[][..]),
            Err(SignalProtocolError::CiphertextMessageTooShort(0))
        ));
    }
}
