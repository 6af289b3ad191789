// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::address::ProtocolAddress;
use crate::cbor::{DecodeError, EncodeError};
use crate::crypto::RngError;
use crate::crypto::aes::CipherError;
use crate::crypto::hkdf::HkdfError;
use crate::crypto::x25519::X25519Error;
use crate::crypto::xeddsa::XEdDSAError;
use crate::protocol::CiphertextMessageType;
use crate::traits::StoreError;

pub type Result<T> = std::result::Result<T, SignalProtocolError>;

/// Errors returned by the session cipher, the handshake and sealed sender.
#[derive(Debug, Error)]
pub enum SignalProtocolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state for call to {0} to succeed: {1}")]
    InvalidState(&'static str, String),

    #[error("protobuf encoding was invalid")]
    InvalidProtobufEncoding,

    #[error("ciphertext serialized bytes were too short <{0}>")]
    CiphertextMessageTooShort(usize),

    #[error("ciphertext version was too old <{0}>")]
    LegacyCiphertextVersion(u8),

    #[error("ciphertext version was unrecognized <{0}>")]
    UnrecognizedCiphertextVersion(u8),

    #[error("unrecognized message version <{0}>")]
    UnrecognizedMessageVersion(u32),

    #[error("bad key type <{0:#04x}>")]
    BadKeyType(u8),

    #[error("bad key length <{0}>")]
    BadKeyLength(usize),

    #[error("signature validation failed")]
    SignatureValidationFailed,

    #[error("untrusted identity for address {0}")]
    UntrustedIdentity(ProtocolAddress),

    #[error("invalid pre-key id")]
    InvalidPreKeyId,

    #[error("invalid signed pre-key id")]
    InvalidSignedPreKeyId,

    #[error("invalid registration id {1:#x} for {0}")]
    InvalidRegistrationId(ProtocolAddress, u32),

    #[error("session with {0} not found")]
    SessionNotFound(ProtocolAddress),

    #[error("invalid session structure: {0}")]
    InvalidSessionStructure(&'static str),

    #[error("message with old counter {0} / {1}")]
    DuplicatedMessage(u32, u32),

    #[error("invalid {0:?} message: {1}")]
    InvalidMessage(CiphertextMessageType, &'static str),

    #[error("invalid sealed sender message: {0}")]
    InvalidSealedSenderMessage(String),

    #[error("unknown sealed sender message version {0}")]
    UnknownSealedSenderVersion(u8),

    #[error("self send of a sealed sender message")]
    SealedSenderSelfSend,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    XEdDSA(#[from] XEdDSAError),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<prost::DecodeError> for SignalProtocolError {
    fn from(_: prost::DecodeError) -> Self {
        Self::InvalidProtobufEncoding
    }
}

impl From<X25519Error> for SignalProtocolError {
    fn from(value: X25519Error) -> Self {
        match value {
            X25519Error::NoKeyType => Self::BadKeyLength(0),
            X25519Error::BadKeyType(key_type) => Self::BadKeyType(key_type),
            X25519Error::BadKeyLength(len) => Self::BadKeyLength(len),
            X25519Error::NonContributory => {
                Self::InvalidArgument("key agreement with low-order public key".into())
            }
        }
    }
}
