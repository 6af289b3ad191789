// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::ops::Range;

use prost::encoding::decode_varint;

use crate::address::{DeviceId, SERVICE_ID_FIXED_WIDTH_SIZE, ServiceId};
use crate::crypto::x25519::PUBLIC_KEY_SIZE;
use crate::error::{Result, SignalProtocolError};
use crate::sealed_sender::v2::{
    AUTH_TAG_LEN, MESSAGE_KEY_LEN, SEALED_SENDER_V2_RECEIVED_VERSION,
    SEALED_SENDER_V2_SENT_VERSION,
};

/// Length of the GCM-SIV tag, the shortest possible ciphertext.
const MIN_CIPHERTEXT_LEN: usize = 16;

/// Recipient entry of a parsed sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentRecipient {
    service_id: ServiceId,
    devices: Vec<(DeviceId, u16)>,
    c_and_at: Range<usize>,
}

impl SentRecipient {
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Devices with their registration ids, empty for excluded recipients.
    pub fn devices(&self) -> &[(DeviceId, u16)] {
        &self.devices
    }

    pub fn is_excluded(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Multi-recipient message as uploaded by the sender, parsed without copying its payload.
#[derive(Clone, Debug)]
pub struct SealedSenderV2SentMessage<'a> {
    full_message: &'a [u8],
    recipients: Vec<SentRecipient>,
    shared_bytes_offset: usize,
}

impl<'a> SealedSenderV2SentMessage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let (&version_byte, _) = data.split_first().ok_or_else(|| {
            SignalProtocolError::InvalidSealedSenderMessage("message was empty".into())
        })?;
        let version = version_byte >> 4;
        if version != 2 {
            return Err(SignalProtocolError::UnknownSealedSenderVersion(version));
        }
        if version_byte != SEALED_SENDER_V2_SENT_VERSION {
            return Err(invalid("not a sent multi-recipient message"));
        }

        let mut remaining = &data[1..];
        let count = decode_varint(&mut remaining).map_err(|_| invalid("invalid recipient count"))?;
        // Every recipient takes at least its service id and one device byte.
        let count = usize::try_from(count)
            .ok()
            .filter(|count| *count <= remaining.len() / (SERVICE_ID_FIXED_WIDTH_SIZE + 1))
            .ok_or_else(|| invalid("recipient count exceeds message length"))?;

        let mut recipients = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);

        for _ in 0..count {
            let service_id = ServiceId::parse_from_service_id_fixed_width_binary(take(
                &mut remaining,
                SERVICE_ID_FIXED_WIDTH_SIZE,
            )?)
            .ok_or_else(|| invalid("invalid service id"))?;
            if !seen.insert(service_id) {
                return Err(invalid("recipient listed more than once"));
            }

            let mut devices = Vec::new();
            loop {
                let device_id = take(&mut remaining, 1)?[0];
                if device_id == 0 {
                    if !devices.is_empty() {
                        return Err(invalid("device id 0 inside device list"));
                    }
                    break;
                }

                let registration_id = take(&mut remaining, 2)?;
                let registration_id = u16::from_be_bytes([registration_id[0], registration_id[1]]);
                devices.push((DeviceId::new(device_id as u32), registration_id & 0x7FFF));
                if registration_id & 0x8000 == 0 {
                    break;
                }
            }

            let c_and_at = if devices.is_empty() {
                0..0
            } else {
                let start = data.len() - remaining.len();
                take(&mut remaining, MESSAGE_KEY_LEN + AUTH_TAG_LEN)?;
                start..start + MESSAGE_KEY_LEN + AUTH_TAG_LEN
            };

            recipients.push(SentRecipient {
                service_id,
                devices,
                c_and_at,
            });
        }

        if remaining.len() < PUBLIC_KEY_SIZE + MIN_CIPHERTEXT_LEN {
            return Err(invalid("message too short"));
        }

        Ok(Self {
            full_message: data,
            recipients,
            shared_bytes_offset: data.len() - remaining.len(),
        })
    }

    /// All recipients in the order they were encoded, including excluded ones.
    pub fn recipients(&self) -> &[SentRecipient] {
        &self.recipients
    }

    pub fn recipient(&self, service_id: &ServiceId) -> Option<&SentRecipient> {
        self.recipients
            .iter()
            .find(|recipient| &recipient.service_id == service_id)
    }

    /// Ephemeral key followed by the ciphertext, identical for all recipients.
    pub fn shared_bytes(&self) -> &'a [u8] {
        &self.full_message[self.shared_bytes_offset..]
    }

    /// Builds the message to deliver to every device of `recipient`.
    pub fn recipient_message(&self, recipient: &SentRecipient) -> Result<Vec<u8>> {
        if recipient.is_excluded() {
            return Err(SignalProtocolError::InvalidArgument(format!(
                "recipient {} was excluded",
                recipient.service_id
            )));
        }

        let c_and_at = self
            .full_message
            .get(recipient.c_and_at.clone())
            .ok_or_else(|| {
                SignalProtocolError::InvalidArgument(format!(
                    "recipient {} is not part of this message",
                    recipient.service_id
                ))
            })?;

        let shared_bytes = self.shared_bytes();
        let mut message = Vec::with_capacity(1 + c_and_at.len() + shared_bytes.len());
        message.push(SEALED_SENDER_V2_RECEIVED_VERSION);
        message.extend_from_slice(c_and_at);
        message.extend_from_slice(shared_bytes);
        Ok(message)
    }
}

fn take<'a>(remaining: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if remaining.len() < len {
        return Err(invalid("message too short"));
    }
    let (head, tail) = remaining.split_at(len);
    *remaining = tail;
    Ok(head)
}

fn invalid(reason: &str) -> SignalProtocolError {
    SignalProtocolError::InvalidSealedSenderMessage(reason.to_string())
}

#[cfg(test)]
mod tests {
    use crate::address::{ServiceId, Uuid};
    use crate::error::SignalProtocolError;

    use super::SealedSenderV2SentMessage;

    fn service_id(byte: u8) -> ServiceId {
        ServiceId::aci(Uuid::from_bytes([byte; 16]))
    }

    fn sent_message() -> Vec<u8> {
        let mut message = vec![0x23, 0x02];
        // Two devices of the first recipient, the first flagged with "has more".
        message.extend_from_slice(&service_id(1).service_id_fixed_width_binary());
        message.extend_from_slice(&[1, 0x80, 0x05]);
        message.extend_from_slice(&[2, 0x3F, 0xFF]);
        message.extend_from_slice(&[0xAA; 48]);
        // Excluded recipient.
        message.extend_from_slice(&service_id(2).service_id_fixed_width_binary());
        message.push(0);
        message.extend_from_slice(&[0xEE; 32]);
        message.extend_from_slice(&[0xCC; 20]);
        message
    }

    #[test]
    fn parse_devices_and_exclusions() {
        let data = sent_message();
        let message = SealedSenderV2SentMessage::parse(&data).unwrap();

        assert_eq!(message.recipients().len(), 2);
        let first = message.recipient(&service_id(1)).unwrap();
        assert_eq!(
            first
                .devices()
                .iter()
                .map(|(device_id, registration_id)| (device_id.id(), *registration_id))
                .collect::<Vec<_>>(),
            vec![(1, 5), (2, 0x3FFF)]
        );
        assert!(message.recipient(&service_id(2)).unwrap().is_excluded());
        assert_eq!(message.shared_bytes().len(), 52);

        let received = message.recipient_message(first).unwrap();
        assert_eq!(received[0], 0x22);
        assert_eq!(&received[1..49], &[0xAA; 48]);
        assert_eq!(&received[49..81], &[0xEE; 32]);
        assert_eq!(received.len(), 1 + 48 + 52);

        let excluded = message.recipient(&service_id(2)).unwrap();
        assert!(message.recipient_message(excluded).is_err());
    }

    #[test]
    fn reject_malformed_messages() {
        assert!(matches!(
            SealedSenderV2SentMessage::parse(&[]),
            Err(SignalProtocolError::InvalidSealedSenderMessage(_))
        ));
        assert!(matches!(
            SealedSenderV2SentMessage::parse(&[0x33, 0x00]),
            Err(SignalProtocolError::UnknownSealedSenderVersion(3))
        ));

        let mut duplicate = sent_message();
        duplicate[1] = 0x02;
        let second_id = 2 + 17 + 6 + 48;
        duplicate[second_id + 1..second_id + 17].copy_from_slice(&[1; 16]);
        assert!(matches!(
            SealedSenderV2SentMessage::parse(&duplicate),
            Err(SignalProtocolError::InvalidSealedSenderMessage(_))
        ));

        let data = sent_message();
        assert!(SealedSenderV2SentMessage::parse(&data[..data.len() - 40]).is_err());
    }
}
