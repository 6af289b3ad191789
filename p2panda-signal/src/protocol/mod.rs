// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire messages produced by the session cipher.
//!
//! Every message starts with a version byte. Its high nibble is the message version, the low
//! nibble the highest version the sender supports.
mod plaintext;
mod sender_key_message;
mod signal_message;

pub use plaintext::PlaintextContent;
pub use sender_key_message::SenderKeyMessage;
pub use signal_message::{PreKeySignalMessage, SignalMessage};

use crate::error::{Result, SignalProtocolError};

/// Protocol version negotiated by all sessions created by this crate.
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 3;

/// Oldest message version this crate can still parse.
pub(crate) const CIPHERTEXT_MESSAGE_OLDEST_VERSION: u8 = 3;

/// Checks the high nibble of a version byte and returns it.
pub(crate) fn parse_version_byte(byte: u8) -> Result<u8> {
    let message_version = byte >> 4;
    if message_version < CIPHERTEXT_MESSAGE_OLDEST_VERSION {
        return Err(SignalProtocolError::LegacyCiphertextVersion(message_version));
    }
    if message_version > CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(SignalProtocolError::UnrecognizedCiphertextVersion(
            message_version,
        ));
    }
    Ok(message_version)
}

pub(crate) fn version_byte(message_version: u8) -> u8 {
    ((message_version & 0xF) << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

/// Type tag of a ciphertext as transported next to its bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CiphertextMessageType {
    Whisper = 2,
    PreKey = 3,
    SenderKey = 7,
    Plaintext = 8,
}

impl CiphertextMessageType {
    /// Numeric code used in the `type` field of sealed sender content.
    pub(crate) fn sealed_sender_type(&self) -> i32 {
        match self {
            CiphertextMessageType::PreKey => 1,
            CiphertextMessageType::Whisper => 2,
            CiphertextMessageType::SenderKey => 7,
            CiphertextMessageType::Plaintext => 8,
        }
    }

    pub(crate) fn from_sealed_sender_type(value: i32) -> Option<Self> {
        match value {
            1 => Some(CiphertextMessageType::PreKey),
            2 => Some(CiphertextMessageType::Whisper),
            7 => Some(CiphertextMessageType::SenderKey),
            8 => Some(CiphertextMessageType::Plaintext),
            _ => None,
        }
    }
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = SignalProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(CiphertextMessageType::Whisper),
            3 => Ok(CiphertextMessageType::PreKey),
            7 => Ok(CiphertextMessageType::SenderKey),
            8 => Ok(CiphertextMessageType::Plaintext),
            _ => Err(SignalProtocolError::InvalidArgument(format!(
                "unknown ciphertext message type {value}"
            ))),
        }
    }
}

/// Any message the protocol puts on the wire.
#[derive(Clone, Debug)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
    SenderKeyMessage(SenderKeyMessage),
    PlaintextContent(PlaintextContent),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            CiphertextMessage::SignalMessage(_) => CiphertextMessageType::Whisper,
            CiphertextMessage::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
            CiphertextMessage::SenderKeyMessage(_) => CiphertextMessageType::SenderKey,
            CiphertextMessage::PlaintextContent(_) => CiphertextMessageType::Plaintext,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            CiphertextMessage::SignalMessage(message) => message.serialized(),
            CiphertextMessage::PreKeySignalMessage(message) => message.serialized(),
            CiphertextMessage::SenderKeyMessage(message) => message.serialized(),
            CiphertextMessage::PlaintextContent(message) => message.serialized(),
        }
    }

    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match message_type {
            CiphertextMessageType::Whisper => Self::SignalMessage(SignalMessage::try_from(bytes)?),
            CiphertextMessageType::PreKey => {
                Self::PreKeySignalMessage(PreKeySignalMessage::try_from(bytes)?)
            }
            CiphertextMessageType::SenderKey => {
                Self::SenderKeyMessage(SenderKeyMessage::try_from(bytes)?)
            }
            CiphertextMessageType::Plaintext => {
                Self::PlaintextContent(PlaintextContent::try_from(bytes)?)
            }
        })
    }
}
