// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use tracing::debug;

use crate::address::ProtocolAddress;
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::state::{PreKeyId, PreKeyRecord, SessionRecord, SignedPreKeyId, SignedPreKeyRecord};
use crate::traits::{
    Direction, IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore, StoreError,
};

/// In-memory implementation of all protocol stores.
///
/// Records are kept in their serialized form, so every load hands out an independent copy, as a
/// persistent backend would. Remote identities are trusted on first use.
#[derive(Debug)]
pub struct MemoryStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    identities: HashMap<ProtocolAddress, IdentityKey>,
    pre_keys: HashMap<PreKeyId, Vec<u8>>,
    signed_pre_keys: HashMap<SignedPreKeyId, Vec<u8>>,
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
}

impl MemoryStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            identities: Default::default(),
            pre_keys: Default::default(),
            signed_pre_keys: Default::default(),
            sessions: Default::default(),
        }
    }

    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.len()
    }
}

impl IdentityKeyStore for MemoryStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, StoreError> {
        Ok(self.identity_key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<u32, StoreError> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, StoreError> {
        match self.identities.insert(address.clone(), *identity) {
            Some(previous) if previous != *identity => {
                debug!(%address, "replaced identity key");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool, StoreError> {
        match self.identities.get(address) {
            None => Ok(true),
            Some(known) => Ok(known == identity),
        }
    }

    fn identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, StoreError> {
        Ok(self.identities.get(address).copied())
    }
}

impl PreKeyStore for MemoryStore {
    fn load_pre_key(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>, StoreError> {
        self.pre_keys
            .get(&id)
            .map(|bytes| PreKeyRecord::deserialize(bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn store_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<(), StoreError> {
        self.pre_keys.insert(id, record.serialize()?);
        Ok(())
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<(), StoreError> {
        self.pre_keys.remove(&id);
        Ok(())
    }
}

impl SignedPreKeyStore for MemoryStore {
    fn load_signed_pre_key(
        &self,
        id: SignedPreKeyId,
    ) -> Result<Option<SignedPreKeyRecord>, StoreError> {
        self.signed_pre_keys
            .get(&id)
            .map(|bytes| SignedPreKeyRecord::deserialize(bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn store_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<(), StoreError> {
        self.signed_pre_keys.insert(id, record.serialize()?);
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError> {
        self.sessions
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        self.sessions.insert(address.clone(), record.serialize()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::address::{DeviceId, ProtocolAddress};
    use crate::crypto::Rng;
    use crate::identity::IdentityKeyPair;
    use crate::state::{PreKeyId, PreKeyRecord};
    use crate::traits::{Direction, IdentityKeyStore, PreKeyStore, SessionStore};

    use super::MemoryStore;

    #[test]
    fn trust_on_first_use() {
        let rng = Rng::from_seed([1; 32]);
        let mut store = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 1);
        let address = ProtocolAddress::new("bob", DeviceId::new(1));
        let bob = IdentityKeyPair::generate(&rng).unwrap();
        let mallory = IdentityKeyPair::generate(&rng).unwrap();

        assert!(store
            .is_trusted_identity(&address, bob.identity_key(), Direction::Sending)
            .unwrap());
        assert!(!store.save_identity(&address, bob.identity_key()).unwrap());
        assert!(!store.save_identity(&address, bob.identity_key()).unwrap());
        assert!(!store
            .is_trusted_identity(&address, mallory.identity_key(), Direction::Receiving)
            .unwrap());
        assert_eq!(store.identity(&address).unwrap(), Some(*bob.identity_key()));

        assert!(store.save_identity(&address, mallory.identity_key()).unwrap());
    }

    #[test]
    fn pre_keys_and_sessions() {
        let rng = Rng::from_seed([2; 32]);
        let mut store = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 1);

        let record = PreKeyRecord::generate(PreKeyId::from(3), &rng).unwrap();
        store.store_pre_key(record.id(), &record).unwrap();
        assert_eq!(store.load_pre_key(PreKeyId::from(3)).unwrap(), Some(record));
        store.remove_pre_key(PreKeyId::from(3)).unwrap();
        assert!(store.load_pre_key(PreKeyId::from(3)).unwrap().is_none());

        let address = ProtocolAddress::new("bob", DeviceId::new(1));
        assert!(store.load_session(&address).unwrap().is_none());
    }
}
