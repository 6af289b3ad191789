// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialized access to sessions from concurrent tasks.
//!
//! Encrypting and decrypting both read, modify and write the session record of one remote
//! address. [`SessionManager`] holds one lock per address for the whole operation, so calls for
//! the same address never interleave while different addresses proceed in parallel.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use crate::address::ProtocolAddress;
use crate::config::SessionConfig;
use crate::crypto::Rng;
use crate::crypto::x25519::PublicKey;
use crate::error::Result;
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::protocol::CiphertextMessage;
use crate::sealed_sender::{
    LocalAddress, SealedSenderDecryptionResult, decrypt_sealed_contents, open_sealed_sender,
    sender_address,
};
use crate::session::process_prekey_bundle;
use crate::session_cipher::SessionCipher;
use crate::state::{
    PreKeyBundle, PreKeyId, PreKeyRecord, SessionRecord, SignedPreKeyId, SignedPreKeyRecord,
};
use crate::timestamp::Timestamp;
use crate::traits::{
    Direction, IdentityKeyStore, PreKeyStore, ProtocolStore, SessionStore, SignedPreKeyStore,
    StoreError,
};

type LockMap = HashMap<ProtocolAddress, Arc<tokio::sync::Mutex<()>>>;

/// Registry handing out one lock per remote address.
///
/// An address is only tracked while a guard for it is alive or awaited.
#[derive(Clone, Debug, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `address` is alive.
    pub async fn lock(&self, address: &ProtocolAddress) -> SessionGuard {
        let lock = lock_map(&self.inner)
            .entry(address.clone())
            .or_default()
            .clone();

        trace!(%address, "wait for session lock");
        let guard = lock.lock_owned().await;
        SessionGuard {
            address: address.clone(),
            locks: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of addresses currently locked or waited for.
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_map(&self.inner).is_empty()
    }
}

// The map is never left half-updated, so a poisoned lock is still usable.
fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to the sessions of one address, released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    address: ProtocolAddress,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn address(&self) -> &ProtocolAddress {
        &self.address
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Tasks waiting for this address hold a reference as well.
        let mut locks = lock_map(&self.locks);
        if locks
            .get(&self.address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.address);
        }
    }
}

/// Cloneable handle over a store shared between tasks.
///
/// Every store call is serialized on its own. Consistency across the calls of one operation is
/// the job of [`SessionLocks`].
#[derive(Debug)]
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, S>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: IdentityKeyStore> IdentityKeyStore for SharedStore<S> {
    fn identity_key_pair(&self) -> std::result::Result<IdentityKeyPair, StoreError> {
        self.lock()?.identity_key_pair()
    }

    fn local_registration_id(&self) -> std::result::Result<u32, StoreError> {
        self.lock()?.local_registration_id()
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> std::result::Result<bool, StoreError> {
        self.lock()?.save_identity(address, identity)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> std::result::Result<bool, StoreError> {
        self.lock()?.is_trusted_identity(address, identity, direction)
    }

    fn identity(
        &self,
        address: &ProtocolAddress,
    ) -> std::result::Result<Option<IdentityKey>, StoreError> {
        self.lock()?.identity(address)
    }
}

impl<S: PreKeyStore> PreKeyStore for SharedStore<S> {
    fn load_pre_key(&self, id: PreKeyId) -> std::result::Result<Option<PreKeyRecord>, StoreError> {
        self.lock()?.load_pre_key(id)
    }

    fn store_pre_key(
        &mut self,
        id: PreKeyId,
        record: &PreKeyRecord,
    ) -> std::result::Result<(), StoreError> {
        self.lock()?.store_pre_key(id, record)
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> std::result::Result<(), StoreError> {
        self.lock()?.remove_pre_key(id)
    }
}

impl<S: SignedPreKeyStore> SignedPreKeyStore for SharedStore<S> {
    fn load_signed_pre_key(
        &self,
        id: SignedPreKeyId,
    ) -> std::result::Result<Option<SignedPreKeyRecord>, StoreError> {
        self.lock()?.load_signed_pre_key(id)
    }

    fn store_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> std::result::Result<(), StoreError> {
        self.lock()?.store_signed_pre_key(id, record)
    }
}

impl<S: SessionStore> SessionStore for SharedStore<S> {
    fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> std::result::Result<Option<SessionRecord>, StoreError> {
        self.lock()?.load_session(address)
    }

    fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> std::result::Result<(), StoreError> {
        self.lock()?.store_session(address, record)
    }
}

/// Runs the session cipher for many remote addresses from concurrent tasks.
#[derive(Debug)]
pub struct SessionManager<S> {
    store: SharedStore<S>,
    locks: SessionLocks,
    cipher: SessionCipher,
    rng: Arc<Rng>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
            cipher: self.cipher.clone(),
            rng: self.rng.clone(),
        }
    }
}

impl<S> SessionManager<S>
where
    S: ProtocolStore,
{
    pub fn new(store: S, config: SessionConfig, rng: Rng) -> Self {
        Self {
            store: SharedStore::new(store),
            locks: SessionLocks::new(),
            cipher: SessionCipher::new(config),
            rng: Arc::new(rng),
        }
    }

    /// Handle to the underlying store, for provisioning keys and inspecting sessions.
    pub fn store(&self) -> SharedStore<S> {
        self.store.clone()
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    pub async fn process_prekey_bundle(
        &self,
        remote_address: &ProtocolAddress,
        bundle: &PreKeyBundle,
        now: Timestamp,
    ) -> Result<()> {
        let _guard = self.locks.lock(remote_address).await;
        let mut store = self.store.clone();
        process_prekey_bundle(
            remote_address,
            &mut store,
            bundle,
            now,
            &self.rng,
            self.cipher.config(),
        )
    }

    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        remote_address: &ProtocolAddress,
        now: Timestamp,
    ) -> Result<CiphertextMessage> {
        let _guard = self.locks.lock(remote_address).await;
        let mut store = self.store.clone();
        self.cipher.encrypt(plaintext, remote_address, &mut store, now)
    }

    pub async fn decrypt(
        &self,
        ciphertext: &CiphertextMessage,
        remote_address: &ProtocolAddress,
    ) -> Result<Vec<u8>> {
        let _guard = self.locks.lock(remote_address).await;
        let mut store = self.store.clone();
        self.cipher.decrypt(ciphertext, remote_address, &mut store, &self.rng)
    }

    /// Unwraps a sealed sender message and decrypts its contents under the lock of the sending
    /// address.
    ///
    /// The sender is only known after unwrapping, which does not touch any session.
    pub async fn sealed_sender_decrypt(
        &self,
        ciphertext: &[u8],
        trust_root: &PublicKey,
        timestamp: Timestamp,
        local_address: &LocalAddress,
    ) -> Result<SealedSenderDecryptionResult> {
        let usmc =
            open_sealed_sender(ciphertext, trust_root, timestamp, local_address, &self.store)?;

        let _guard = self.locks.lock(&sender_address(&usmc)).await;
        let mut store = self.store.clone();
        decrypt_sealed_contents(usmc, &mut store, &self.cipher, &self.rng)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::address::{DeviceId, ProtocolAddress};

    use super::SessionLocks;

    #[tokio::test]
    async fn same_address_is_exclusive() {
        let locks = SessionLocks::new();
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));
        let carol = ProtocolAddress::new("carol", DeviceId::new(1));

        let guard = locks.lock(&bob).await;
        assert_eq!(guard.address(), &bob);

        // Other addresses never contend.
        let carol_guard = tokio::time::timeout(Duration::from_millis(50), locks.lock(&carol)).await;
        assert!(carol_guard.is_ok());

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock(&bob)).await;
        assert!(blocked.is_err());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.lock(&bob)).await;
        assert!(reacquired.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_addresses_are_forgotten() {
        let locks = SessionLocks::new();
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));

        let guard = locks.lock(&bob).await;
        let waiting = {
            let locks = locks.clone();
            let bob = bob.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&bob).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiting task keeps the address alive.
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiting.await.unwrap();
        assert!(locks.is_empty());
    }
}
