// SPDX-License-Identifier: MIT OR Apache-2.0

use prost::Message;
use tracing::error;

use crate::address::DeviceId;
use crate::crypto::Rng;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::xeddsa::{XSignature, xeddsa_sign, xeddsa_verify};
use crate::error::{Result, SignalProtocolError};
use crate::proto;
use crate::timestamp::Timestamp;

/// Certificate of a server signing key, signed by the trust root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerCertificate {
    key_id: u32,
    key: PublicKey,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl ServerCertificate {
    pub fn new(key_id: u32, key: PublicKey, trust_root: &SecretKey, rng: &Rng) -> Result<Self> {
        let certificate = proto::ServerCertificateInner {
            id: Some(key_id),
            key: Some(key.serialize().to_vec()),
        }
        .encode_to_vec();
        let signature = xeddsa_sign(&certificate, trust_root, rng)?
            .to_bytes()
            .to_vec();
        let serialized = proto::ServerCertificate {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            key_id,
            key,
            certificate,
            signature,
            serialized,
        })
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let outer = proto::ServerCertificate::decode(data)?;
        Self::from_proto(outer, data.to_vec())
    }

    fn from_proto(outer: proto::ServerCertificate, serialized: Vec<u8>) -> Result<Self> {
        let certificate = outer
            .certificate
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let signature = outer
            .signature
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let inner = proto::ServerCertificateInner::decode(certificate.as_ref())?;
        let key = PublicKey::deserialize(
            &inner
                .key
                .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
        )?;
        let key_id = inner.id.ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            key_id,
            key,
            certificate,
            signature,
            serialized,
        })
    }

    /// Returns true if the trust root signed this certificate.
    pub fn validate(&self, trust_root: &PublicKey) -> bool {
        verify_signature(&self.certificate, &self.signature, trust_root)
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Binds a sender's identity key and address to an expiry, signed by a server key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderCertificate {
    signer: ServerCertificate,
    key: PublicKey,
    sender_device_id: DeviceId,
    sender_uuid: String,
    sender_e164: Option<String>,
    expiration: Timestamp,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl SenderCertificate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender_uuid: String,
        sender_e164: Option<String>,
        key: PublicKey,
        sender_device_id: DeviceId,
        expiration: Timestamp,
        signer: ServerCertificate,
        signer_key: &SecretKey,
        rng: &Rng,
    ) -> Result<Self> {
        let certificate = proto::SenderCertificateInner {
            sender_e164: sender_e164.clone(),
            sender_device: Some(sender_device_id.id()),
            expires: Some(expiration.epoch_millis()),
            identity_key: Some(key.serialize().to_vec()),
            signer: Some(proto::ServerCertificate {
                certificate: Some(signer.certificate.clone()),
                signature: Some(signer.signature.clone()),
            }),
            sender_uuid: Some(sender_uuid.clone()),
        }
        .encode_to_vec();
        let signature = xeddsa_sign(&certificate, signer_key, rng)?
            .to_bytes()
            .to_vec();
        let serialized = proto::SenderCertificate {
            certificate: Some(certificate.clone()),
            signature: Some(signature.clone()),
        }
        .encode_to_vec();

        Ok(Self {
            signer,
            key,
            sender_device_id,
            sender_uuid,
            sender_e164,
            expiration,
            certificate,
            signature,
            serialized,
        })
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let outer = proto::SenderCertificate::decode(data)?;
        let certificate = outer
            .certificate
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let signature = outer
            .signature
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let inner = proto::SenderCertificateInner::decode(certificate.as_ref())?;

        let sender_device_id = DeviceId::new(
            inner
                .sender_device
                .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
        );
        let expiration = Timestamp::from_epoch_millis(
            inner
                .expires
                .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
        );
        let signer = inner
            .signer
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let signer_serialized = signer.encode_to_vec();
        let signer = ServerCertificate::from_proto(signer, signer_serialized)?;
        let key = PublicKey::deserialize(
            &inner
                .identity_key
                .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
        )?;
        let sender_uuid = inner
            .sender_uuid
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;

        Ok(Self {
            signer,
            key,
            sender_device_id,
            sender_uuid,
            sender_e164: inner.sender_e164,
            expiration,
            certificate,
            signature,
            serialized: data.to_vec(),
        })
    }

    /// Returns true if the certificate chains up to `trust_root` and has not expired at
    /// `validation_time`.
    pub fn validate(&self, trust_root: &PublicKey, validation_time: Timestamp) -> bool {
        if !self.signer.validate(trust_root) {
            error!(
                key_id = self.signer.key_id(),
                "sender certificate signed by untrusted server certificate"
            );
            return false;
        }

        if !verify_signature(&self.certificate, &self.signature, self.signer.public_key()) {
            error!(
                key_id = self.signer.key_id(),
                "sender certificate not signed by server"
            );
            return false;
        }

        if validation_time > self.expiration {
            error!(
                expiration = %self.expiration,
                %validation_time,
                "sender certificate is expired"
            );
            return false;
        }

        true
    }

    pub fn signer(&self) -> &ServerCertificate {
        &self.signer
    }

    /// Identity key of the sender.
    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn sender_device_id(&self) -> DeviceId {
        self.sender_device_id
    }

    pub fn sender_uuid(&self) -> &str {
        &self.sender_uuid
    }

    pub fn sender_e164(&self) -> Option<&str> {
        self.sender_e164.as_deref()
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

fn verify_signature(message: &[u8], signature: &[u8], key: &PublicKey) -> bool {
    let Ok(signature) = XSignature::from_slice(signature) else {
        return false;
    };
    xeddsa_verify(message, key, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use crate::address::DeviceId;
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;
    use crate::timestamp::Timestamp;

    use super::{SenderCertificate, ServerCertificate};

    const UUID: &str = "9d0652a3-dcc3-4d11-975f-74d61598733f";

    fn certificates(rng: &Rng) -> (KeyPair, KeyPair, SenderCertificate) {
        let trust_root = KeyPair::generate(rng).unwrap();
        let server_key = KeyPair::generate(rng).unwrap();
        let sender_key = KeyPair::generate(rng).unwrap();
        let server_certificate =
            ServerCertificate::new(1, server_key.public_key, &trust_root.secret_key, rng).unwrap();
        let sender_certificate = SenderCertificate::new(
            UUID.to_string(),
            Some("+14151111111".to_string()),
            sender_key.public_key,
            DeviceId::new(3),
            Timestamp::from_epoch_millis(1_000),
            server_certificate,
            &server_key.secret_key,
            rng,
        )
        .unwrap();
        (trust_root, server_key, sender_certificate)
    }

    #[test]
    fn validate_against_trust_root() {
        let rng = Rng::from_seed([1; 32]);
        let (trust_root, server_key, certificate) = certificates(&rng);

        assert!(certificate.validate(&trust_root.public_key, Timestamp::from_epoch_millis(1_000)));
        assert!(!certificate.validate(&server_key.public_key, Timestamp::from_epoch_millis(1)));

        let decoded = SenderCertificate::deserialize(certificate.serialized()).unwrap();
        assert_eq!(decoded, certificate);
        assert_eq!(decoded.sender_e164(), Some("+14151111111"));
        assert_eq!(decoded.sender_device_id(), DeviceId::new(3));
        assert!(decoded.validate(&trust_root.public_key, Timestamp::from_epoch_millis(500)));
    }

    #[test]
    fn expired_certificate() {
        let rng = Rng::from_seed([2; 32]);
        let (trust_root, _, certificate) = certificates(&rng);

        assert!(certificate.signer().validate(&trust_root.public_key));
        assert!(!certificate.validate(&trust_root.public_key, Timestamp::from_epoch_millis(1_001)));
    }

    #[test]
    fn forged_signature() {
        let rng = Rng::from_seed([3; 32]);
        let (trust_root, _, certificate) = certificates(&rng);
        let impostor = KeyPair::generate(&rng).unwrap();

        let forged = SenderCertificate::new(
            certificate.sender_uuid().to_string(),
            None,
            *certificate.key(),
            certificate.sender_device_id(),
            certificate.expiration(),
            certificate.signer().clone(),
            &impostor.secret_key,
            &rng,
        )
        .unwrap();
        assert!(!forged.validate(&trust_root.public_key, Timestamp::from_epoch_millis(1)));
    }
}
