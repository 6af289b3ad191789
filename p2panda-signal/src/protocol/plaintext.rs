// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{Result, SignalProtocolError};
use crate::protocol::CiphertextMessageType;

/// Marker byte that can never start a versioned ciphertext.
pub const PLAINTEXT_CONTEXT_IDENTIFIER_BYTE: u8 = 0xC0;

/// Unencrypted content sent where a ciphertext is expected, for example to report a decryption
/// error back to the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaintextContent {
    serialized: Box<[u8]>,
}

impl PlaintextContent {
    pub fn new(body: &[u8]) -> Self {
        let mut serialized = Vec::with_capacity(body.len() + 1);
        serialized.push(PLAINTEXT_CONTEXT_IDENTIFIER_BYTE);
        serialized.extend_from_slice(body);
        Self {
            serialized: serialized.into_boxed_slice(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.serialized[1..]
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PlaintextContent {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        match value.first() {
            Some(&PLAINTEXT_CONTEXT_IDENTIFIER_BYTE) => Ok(Self {
                serialized: value.into(),
            }),
            Some(_) => Err(SignalProtocolError::InvalidMessage(
                CiphertextMessageType::Plaintext,
                "plaintext content must begin with 0xC0",
            )),
            None => Err(SignalProtocolError::CiphertextMessageTooShort(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PlaintextContent;

    #[test]
    fn marker_byte() {
        let content = PlaintextContent::new(b"decryption error");
        assert_eq!(content.serialized()[0], 0xC0);
        assert_eq!(content.body(), b"decryption error");

        let parsed = PlaintextContent::try_from(content.serialized()).unwrap();
        assert_eq!(parsed, content);
        assert!(PlaintextContent::try_from(&b"\x33hello"[..]).is_err());
        assert!(PlaintextContent::try_from(&[][..]).is_err());
    }
}
