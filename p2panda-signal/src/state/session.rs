// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::x25519::{KeyPair, PublicKey, SecretKey};
use crate::error::{Result, SignalProtocolError};
use crate::identity::IdentityKey;
use crate::ratchet::{ChainKey, MessageKeys, RootKey};
use crate::state::{PreKeyId, SignedPreKeyId};
use crate::timestamp::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

/// Receiving chain for one ratchet key of the remote party, with the keys of messages skipped on
/// this chain. Newest skipped keys are kept at the front.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ReceiverChain {
    ratchet_key: PublicKey,
    chain_key: ChainKey,
    message_keys: VecDeque<MessageKeys>,
}

/// Handshake data repeated in every message until the remote party answers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: SignedPreKeyId,
    base_key: PublicKey,
    timestamp: Timestamp,
}

impl PendingPreKey {
    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> SignedPreKeyId {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// One ratchet epoch with a remote party.
///
/// Holds at most one sending chain and a bounded list of receiving chains, oldest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u8,
    local_identity_key: IdentityKey,
    remote_identity_key: IdentityKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: PublicKey,
}

impl SessionState {
    pub(crate) fn new(
        session_version: u8,
        local_identity_key: IdentityKey,
        remote_identity_key: IdentityKey,
        root_key: RootKey,
        alice_base_key: PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity_key,
            remote_identity_key,
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id: 0,
            remote_registration_id: 0,
            alice_base_key,
        }
    }

    pub(crate) fn with_receiver_chain(mut self, ratchet_key: PublicKey, chain_key: ChainKey) -> Self {
        self.receiver_chains.push_back(ReceiverChain {
            ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        });
        self
    }

    pub(crate) fn with_sender_chain(mut self, ratchet_key: KeyPair, chain_key: ChainKey) -> Self {
        self.set_sender_chain(ratchet_key, chain_key);
        self
    }

    pub fn session_version(&self) -> u8 {
        self.session_version
    }

    pub fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity_key
    }

    pub fn remote_identity_key(&self) -> &IdentityKey {
        &self.remote_identity_key
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub(crate) fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub(crate) fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    /// Base key of the X3DH run that created this state, identifying the handshake.
    pub fn alice_base_key(&self) -> &PublicKey {
        &self.alice_base_key
    }

    pub(crate) fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(crate) fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.ratchet_key.public_key)
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing sender chain"))
    }

    pub(crate) fn sender_ratchet_secret_key(&self) -> Result<&SecretKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| &chain.ratchet_key.secret_key)
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing sender chain"))
    }

    pub(crate) fn sender_chain_key(&self) -> Result<ChainKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.chain_key.clone())
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing sender chain"))
    }

    pub(crate) fn set_sender_chain(&mut self, ratchet_key: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key,
            chain_key,
        });
    }

    pub(crate) fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing sender chain"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    fn receiver_chain(&self, ratchet_key: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.ratchet_key == ratchet_key)
    }

    fn receiver_chain_mut(&mut self, ratchet_key: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == ratchet_key)
    }

    pub(crate) fn receiver_chain_key(&self, ratchet_key: &PublicKey) -> Option<ChainKey> {
        self.receiver_chain(ratchet_key)
            .map(|chain| chain.chain_key.clone())
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Adds a receiving chain, evicting the oldest chains beyond `max_chains`.
    pub(crate) fn add_receiver_chain(
        &mut self,
        ratchet_key: PublicKey,
        chain_key: ChainKey,
        max_chains: usize,
    ) {
        self.receiver_chains.push_back(ReceiverChain {
            ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        });
        while self.receiver_chains.len() > max_chains.max(1) {
            if let Some(evicted) = self.receiver_chains.pop_front() {
                debug!(
                    ratchet_key = %evicted.ratchet_key,
                    skipped_keys = evicted.message_keys.len(),
                    "evict oldest receiver chain"
                );
            }
        }
    }

    pub(crate) fn set_receiver_chain_key(
        &mut self,
        ratchet_key: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(ratchet_key)
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing receiver chain"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Removes and returns the skipped message keys for `counter` on the given chain.
    pub(crate) fn take_message_keys(
        &mut self,
        ratchet_key: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        let chain = self.receiver_chain_mut(ratchet_key)?;
        let position = chain
            .message_keys
            .iter()
            .position(|keys| keys.counter() == counter)?;
        chain.message_keys.remove(position)
    }

    /// Caches skipped message keys, dropping the oldest ones beyond `max_keys`.
    pub(crate) fn store_message_keys(
        &mut self,
        ratchet_key: &PublicKey,
        message_keys: MessageKeys,
        max_keys: usize,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(ratchet_key)
            .ok_or(SignalProtocolError::InvalidSessionStructure("missing receiver chain"))?;
        chain.message_keys.push_front(message_keys);
        if chain.message_keys.len() > max_keys {
            chain.message_keys.truncate(max_keys);
        }
        Ok(())
    }

    pub fn skipped_message_key_count(&self) -> usize {
        self.receiver_chains
            .iter()
            .map(|chain| chain.message_keys.len())
            .sum()
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn set_pending_pre_key(
        &mut self,
        pre_key_id: Option<PreKeyId>,
        signed_pre_key_id: SignedPreKeyId,
        base_key: PublicKey,
        timestamp: Timestamp,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
            timestamp,
        });
    }

    pub(crate) fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;
    use crate::identity::IdentityKeyPair;
    use crate::ratchet::{ChainKey, RootKey};

    use super::SessionState;

    fn state(rng: &Rng) -> SessionState {
        let local = IdentityKeyPair::generate(rng).unwrap();
        let remote = IdentityKeyPair::generate(rng).unwrap();
        let base_key = KeyPair::generate(rng).unwrap();
        SessionState::new(
            3,
            *local.identity_key(),
            *remote.identity_key(),
            RootKey::new([1; 32]),
            base_key.public_key,
        )
    }

    #[test]
    fn receiver_chains_are_bounded() {
        let rng = Rng::from_seed([1; 32]);
        let mut state = state(&rng);

        let keys: Vec<_> = (0..7).map(|_| KeyPair::generate(&rng).unwrap()).collect();
        for key in &keys {
            state.add_receiver_chain(key.public_key, ChainKey::new([2; 32], 0), 5);
        }

        assert_eq!(state.receiver_chain_count(), 5);
        assert!(state.receiver_chain_key(&keys[0].public_key).is_none());
        assert!(state.receiver_chain_key(&keys[1].public_key).is_none());
        assert!(state.receiver_chain_key(&keys[6].public_key).is_some());
    }

    #[test]
    fn skipped_keys_are_bounded_and_single_use() {
        let rng = Rng::from_seed([2; 32]);
        let their_key = KeyPair::generate(&rng).unwrap().public_key;
        let mut state = state(&rng).with_receiver_chain(their_key, ChainKey::new([3; 32], 0));

        let mut chain_key = ChainKey::new([3; 32], 0);
        for _ in 0..10 {
            state
                .store_message_keys(&their_key, chain_key.message_keys().unwrap(), 4)
                .unwrap();
            chain_key = chain_key.next_chain_key();
        }

        // Only the four newest skipped keys survive.
        assert_eq!(state.skipped_message_key_count(), 4);
        assert!(state.take_message_keys(&their_key, 5).is_none());
        assert_eq!(
            state.take_message_keys(&their_key, 7).unwrap().counter(),
            7
        );
        assert!(state.take_message_keys(&their_key, 7).is_none());
        assert_eq!(state.skipped_message_key_count(), 3);
    }

    #[test]
    fn missing_sender_chain() {
        let rng = Rng::from_seed([3; 32]);
        let state = state(&rng);
        assert!(!state.has_sender_chain());
        assert!(state.sender_ratchet_key().is_err());
        assert!(state.sender_chain_key().is_err());
    }
}
