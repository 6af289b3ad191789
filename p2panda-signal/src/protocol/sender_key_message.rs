// SPDX-License-Identifier: MIT OR Apache-2.0

use prost::Message;

use crate::address::{UUID_SIZE, Uuid};
use crate::crypto::Rng;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::xeddsa::{SIGNATURE_SIZE, XSignature, xeddsa_sign, xeddsa_verify};
use crate::error::{Result, SignalProtocolError};
use crate::proto;
use crate::protocol::{parse_version_byte, version_byte};

/// Group message signed by the sender's chain signing key.
///
/// Only the message format is provided here: `[version][protobuf][64-byte signature]`. Group
/// session state is managed elsewhere.
#[derive(Clone, Debug)]
pub struct SenderKeyMessage {
    message_version: u8,
    distribution_id: Uuid,
    chain_id: u32,
    iteration: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SenderKeyMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        distribution_id: Uuid,
        chain_id: u32,
        iteration: u32,
        ciphertext: &[u8],
        signature_key: &SecretKey,
        rng: &Rng,
    ) -> Result<Self> {
        let message = proto::SenderKeyMessage {
            distribution_uuid: Some(distribution_id.as_bytes().to_vec()),
            chain_id: Some(chain_id),
            iteration: Some(iteration),
            ciphertext: Some(ciphertext.to_vec()),
        };
        let mut serialized = Vec::with_capacity(1 + message.encoded_len() + SIGNATURE_SIZE);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&message.encode_to_vec());
        let signature = xeddsa_sign(&serialized, signature_key, rng)?;
        serialized.extend_from_slice(signature.as_bytes());

        Ok(Self {
            message_version,
            distribution_id,
            chain_id,
            iteration,
            ciphertext: ciphertext.into(),
            serialized: serialized.into_boxed_slice(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn distribution_id(&self) -> Uuid {
        self.distribution_id
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    pub fn verify_signature(&self, signature_key: &PublicKey) -> bool {
        let boundary = self.serialized.len() - SIGNATURE_SIZE;
        let Ok(signature) = XSignature::from_slice(&self.serialized[boundary..]) else {
            return false;
        };
        xeddsa_verify(&self.serialized[..boundary], signature_key, &signature).is_ok()
    }
}

impl TryFrom<&[u8]> for SenderKeyMessage {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() < 1 + SIGNATURE_SIZE {
            return Err(SignalProtocolError::CiphertextMessageTooShort(value.len()));
        }
        let message_version = parse_version_byte(value[0])?;
        let message = proto::SenderKeyMessage::decode(&value[1..value.len() - SIGNATURE_SIZE])?;

        let distribution_id: [u8; UUID_SIZE] = message
            .distribution_uuid
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let chain_id = message
            .chain_id
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let iteration = message
            .iteration
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let ciphertext = message
            .ciphertext
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            message_version,
            distribution_id: Uuid::from_bytes(distribution_id),
            chain_id,
            iteration,
            ciphertext: ciphertext.into_boxed_slice(),
            serialized: value.into(),
        })
    }
}
