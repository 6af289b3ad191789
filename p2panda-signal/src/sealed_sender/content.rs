// SPDX-License-Identifier: MIT OR Apache-2.0

use prost::Message;

use crate::error::{Result, SignalProtocolError};
use crate::proto;
use crate::protocol::CiphertextMessageType;
use crate::sealed_sender::SenderCertificate;

/// How the recipient should treat a message it fails to decrypt.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentHint {
    /// Show an error to the user.
    #[default]
    Default,

    /// Ask the sender to send the message again.
    Resendable,

    /// Do not show an error, the message can be dropped silently.
    Implicit,

    Unknown(u32),
}

impl ContentHint {
    pub fn to_u32(self) -> u32 {
        match self {
            ContentHint::Default => 0,
            ContentHint::Resendable => 1,
            ContentHint::Implicit => 2,
            ContentHint::Unknown(value) => value,
        }
    }
}

impl From<u32> for ContentHint {
    fn from(value: u32) -> Self {
        match value {
            0 => ContentHint::Default,
            1 => ContentHint::Resendable,
            2 => ContentHint::Implicit,
            other => ContentHint::Unknown(other),
        }
    }
}

/// Inner payload of both sealed sender versions: the encrypted message together with the
/// certificate identifying its sender.
#[derive(Clone, Debug)]
pub struct UnidentifiedSenderMessageContent {
    message_type: CiphertextMessageType,
    sender: SenderCertificate,
    contents: Vec<u8>,
    content_hint: ContentHint,
    group_id: Option<Vec<u8>>,
    serialized: Vec<u8>,
}

impl UnidentifiedSenderMessageContent {
    pub fn new(
        message_type: CiphertextMessageType,
        sender: SenderCertificate,
        contents: Vec<u8>,
        content_hint: ContentHint,
        group_id: Option<Vec<u8>>,
    ) -> Self {
        let group_id = group_id.filter(|group_id| !group_id.is_empty());
        let serialized = proto::UnidentifiedSenderMessageContent {
            r#type: Some(message_type.sealed_sender_type()),
            sender_certificate: Some(sender.serialized().to_vec()),
            content: Some(contents.clone()),
            content_hint: match content_hint {
                ContentHint::Default => None,
                other => Some(other.to_u32()),
            },
            group_id: group_id.clone(),
        }
        .encode_to_vec();

        Self {
            message_type,
            sender,
            contents,
            content_hint,
            group_id,
            serialized,
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let message = proto::UnidentifiedSenderMessageContent::decode(data)?;

        let message_type = message
            .r#type
            .and_then(CiphertextMessageType::from_sealed_sender_type)
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let sender = SenderCertificate::deserialize(
            &message
                .sender_certificate
                .ok_or(SignalProtocolError::InvalidProtobufEncoding)?,
        )?;
        let contents = message
            .content
            .ok_or(SignalProtocolError::InvalidProtobufEncoding)?;
        let content_hint = message
            .content_hint
            .map(ContentHint::from)
            .unwrap_or_default();

        Ok(Self {
            message_type,
            sender,
            contents,
            content_hint,
            group_id: message.group_id,
            serialized: data.to_vec(),
        })
    }

    pub fn message_type(&self) -> CiphertextMessageType {
        self.message_type
    }

    pub fn sender(&self) -> &SenderCertificate {
        &self.sender
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn content_hint(&self) -> ContentHint {
        self.content_hint
    }

    pub fn group_id(&self) -> Option<&[u8]> {
        self.group_id.as_deref()
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use crate::address::DeviceId;
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;
    use crate::protocol::CiphertextMessageType;
    use crate::sealed_sender::{SenderCertificate, ServerCertificate};
    use crate::timestamp::Timestamp;

    use super::{ContentHint, UnidentifiedSenderMessageContent};

    fn sender_certificate(rng: &Rng) -> SenderCertificate {
        let trust_root = KeyPair::generate(rng).unwrap();
        let server_key = KeyPair::generate(rng).unwrap();
        let server_certificate =
            ServerCertificate::new(1, server_key.public_key, &trust_root.secret_key, rng).unwrap();
        SenderCertificate::new(
            "9d0652a3-dcc3-4d11-975f-74d61598733f".to_string(),
            None,
            KeyPair::generate(rng).unwrap().public_key,
            DeviceId::new(1),
            Timestamp::from_epoch_millis(1),
            server_certificate,
            &server_key.secret_key,
            rng,
        )
        .unwrap()
    }

    #[test]
    fn default_fields_are_omitted() {
        let rng = Rng::from_seed([1; 32]);
        let usmc = UnidentifiedSenderMessageContent::new(
            CiphertextMessageType::Whisper,
            sender_certificate(&rng),
            b"payload".to_vec(),
            ContentHint::Default,
            Some(Vec::new()),
        );

        // Field 1 carries the sealed sender code of the message type.
        assert_eq!(&usmc.serialized()[..2], &[0x08, 0x02]);

        let decoded = UnidentifiedSenderMessageContent::deserialize(usmc.serialized()).unwrap();
        assert_eq!(decoded.message_type(), CiphertextMessageType::Whisper);
        assert_eq!(decoded.content_hint(), ContentHint::Default);
        assert_eq!(decoded.group_id(), None);
        assert_eq!(decoded.contents(), b"payload");
        assert_eq!(decoded.sender(), usmc.sender());
    }

    #[test]
    fn hint_and_group() {
        let rng = Rng::from_seed([2; 32]);
        let usmc = UnidentifiedSenderMessageContent::new(
            CiphertextMessageType::PreKey,
            sender_certificate(&rng),
            b"payload".to_vec(),
            ContentHint::Unknown(9),
            Some(vec![7; 16]),
        );

        let decoded = UnidentifiedSenderMessageContent::deserialize(usmc.serialized()).unwrap();
        assert_eq!(decoded.message_type(), CiphertextMessageType::PreKey);
        assert_eq!(decoded.content_hint(), ContentHint::Unknown(9));
        assert_eq!(decoded.group_id(), Some(&[7u8; 16][..]));
    }

    #[test]
    fn reject_missing_fields() {
        assert!(UnidentifiedSenderMessageContent::deserialize(&[0x08, 0x02]).is_err());
        assert!(UnidentifiedSenderMessageContent::deserialize(&[0x08, 0x03]).is_err());
    }
}
