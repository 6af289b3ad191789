// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encode and decode persisted records in [CBOR] format.
//!
//! Session records, pre-keys and signed pre-keys are handed to stores as opaque CBOR bytes. Wire
//! messages use protobuf instead, see [`crate::proto`].
//!
//! [CBOR]: https://cbor.io/
use std::io::Read;

use ciborium::de::Error as DeserializeError;
use ciborium::ser::Error as SerializeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(Into::<EncodeError>::into)?;
    Ok(bytes)
}

pub fn decode_cbor<T: for<'a> Deserialize<'a>, R: Read>(reader: R) -> Result<T, DecodeError> {
    let value = ciborium::from_reader::<T, R>(reader).map_err(Into::<DecodeError>::into)?;
    Ok(value)
}

/// A record could not be serialized.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("an error occurred while writing record bytes: {0}")]
    Io(std::io::Error),

    #[error("an error occurred while serializing record: {0}")]
    Value(String),
}

impl From<SerializeError<std::io::Error>> for EncodeError {
    fn from(value: SerializeError<std::io::Error>) -> Self {
        match value {
            SerializeError::Io(err) => EncodeError::Io(err),
            SerializeError::Value(err) => EncodeError::Value(err),
        }
    }
}

/// Stored record bytes could not be deserialized.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("an error occurred while reading record bytes: {0}")]
    Io(std::io::Error),

    #[error("an error occurred while parsing record bytes at position {0}")]
    Syntax(usize),

    #[error("an error occurred while processing record value at position {0:?}: {1}")]
    Semantic(Option<usize>, String),

    #[error("recursion limit exceeded while decoding record")]
    RecursionLimitExceeded,
}

impl From<DeserializeError<std::io::Error>> for DecodeError {
    fn from(value: DeserializeError<std::io::Error>) -> Self {
        match value {
            DeserializeError::Io(err) => DecodeError::Io(err),
            DeserializeError::Syntax(offset) => DecodeError::Syntax(offset),
            DeserializeError::Semantic(offset, description) => {
                DecodeError::Semantic(offset, description)
            }
            DeserializeError::RecursionLimitExceeded => DecodeError::RecursionLimitExceeded,
        }
    }
}
