// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::address::ProtocolAddress;
use crate::cbor::{DecodeError, EncodeError};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::state::{PreKeyId, PreKeyRecord, SessionRecord, SignedPreKeyId, SignedPreKeyRecord};

/// Whether an identity is checked because we send to it or because it sent to us.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Our own identity and the identities we have seen for remote addresses.
///
/// Identity keys held in hardware stay behind this interface, the protocol only asks for the key
/// pair when it needs to agree on secrets or sign.
pub trait IdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, StoreError>;

    fn local_registration_id(&self) -> Result<u32, StoreError>;

    /// Records the identity of a remote address. Returns true if a different identity was
    /// replaced.
    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, StoreError>;

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool, StoreError>;

    fn identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, StoreError>;
}

pub trait PreKeyStore {
    fn load_pre_key(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>, StoreError>;

    fn store_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<(), StoreError>;

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<(), StoreError>;
}

pub trait SignedPreKeyStore {
    fn load_signed_pre_key(
        &self,
        id: SignedPreKeyId,
    ) -> Result<Option<SignedPreKeyRecord>, StoreError>;

    fn store_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<(), StoreError>;
}

pub trait SessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError>;

    fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError>;
}

/// Everything a party needs to run sessions.
pub trait ProtocolStore: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}

impl<T> ProtocolStore for T where T: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore {}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error occurred in store backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
