// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypting and decrypting messages on established sessions.
//!
//! Every call loads the session record of the remote address, works on a copy of the relevant
//! session state and only writes the record back to the store when the operation succeeded. A
//! failed decryption therefore never leaves a half-advanced chain behind.
//!
//! Calls for the same remote address must not interleave, see [`SessionManager`] for a wrapper
//! enforcing this.
//!
//! [`SessionManager`]: crate::manager::SessionManager
use tracing::{debug, error, info, warn};

use crate::address::ProtocolAddress;
use crate::config::SessionConfig;
use crate::crypto::Rng;
use crate::crypto::aes::{aes_256_cbc_decrypt, aes_256_cbc_encrypt};
use crate::crypto::x25519::{KeyPair, PublicKey};
use crate::error::{Result, SignalProtocolError};
use crate::protocol::{
    CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, SignalMessage,
};
use crate::ratchet::{ChainKey, MessageKeys};
use crate::session::process_prekey;
use crate::state::{SessionRecord, SessionState};
use crate::timestamp::Timestamp;
use crate::traits::{Direction, IdentityKeyStore, ProtocolStore, SessionStore};

/// Session cipher with explicit resource bounds.
#[derive(Clone, Debug, Default)]
pub struct SessionCipher {
    config: SessionConfig,
}

impl SessionCipher {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encrypts `plaintext` on the current session with `remote_address`.
    ///
    /// Returns a [`PreKeySignalMessage`] as long as the remote party has not answered yet, a
    /// [`SignalMessage`] otherwise. Fails with `SessionNotFound` when there is no session or the
    /// handshake went unanswered for too long.
    pub fn encrypt<S>(
        &self,
        plaintext: &[u8],
        remote_address: &ProtocolAddress,
        store: &mut S,
        now: Timestamp,
    ) -> Result<CiphertextMessage>
    where
        S: IdentityKeyStore + SessionStore,
    {
        let mut session_record = store
            .load_session(remote_address)?
            .ok_or_else(|| SignalProtocolError::SessionNotFound(remote_address.clone()))?;
        let session_state = session_record
            .session_state_mut()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(remote_address.clone()))?;

        let chain_key = session_state.sender_chain_key()?;
        let message_keys = chain_key.message_keys()?;

        let sender_ratchet_key = session_state.sender_ratchet_key()?;
        let previous_counter = session_state.previous_counter();
        let session_version = session_state.session_version();
        let local_identity_key = *session_state.local_identity_key();
        let their_identity_key = *session_state.remote_identity_key();

        let ciphertext =
            aes_256_cbc_encrypt(plaintext, message_keys.cipher_key(), message_keys.iv())?;

        let message = SignalMessage::new(
            session_version,
            message_keys.mac_key(),
            sender_ratchet_key,
            chain_key.index(),
            previous_counter,
            &ciphertext,
            &local_identity_key,
            &their_identity_key,
        );

        let message = match session_state.pending_pre_key().cloned() {
            Some(pending) => {
                let expires_at = pending
                    .timestamp()
                    .saturating_add(self.config.max_unacknowledged_session_age);
                if expires_at < now {
                    warn!(
                        %remote_address,
                        created_at = %pending.timestamp(),
                        "unacknowledged session expired"
                    );
                    return Err(SignalProtocolError::SessionNotFound(
                        remote_address.clone(),
                    ));
                }

                CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                    session_version,
                    session_state.local_registration_id(),
                    pending.pre_key_id(),
                    pending.signed_pre_key_id(),
                    *pending.base_key(),
                    local_identity_key,
                    message,
                ))
            }
            None => CiphertextMessage::SignalMessage(message),
        };

        session_state.set_sender_chain_key(chain_key.next_chain_key())?;

        if !store.is_trusted_identity(remote_address, &their_identity_key, Direction::Sending)? {
            warn!(%remote_address, "untrusted identity on encrypt");
            return Err(SignalProtocolError::UntrustedIdentity(
                remote_address.clone(),
            ));
        }

        store.save_identity(remote_address, &their_identity_key)?;
        store.store_session(remote_address, &session_record)?;

        Ok(message)
    }

    /// Decrypts a message of the session cipher, dispatching on its type.
    pub fn decrypt<S>(
        &self,
        ciphertext: &CiphertextMessage,
        remote_address: &ProtocolAddress,
        store: &mut S,
        rng: &Rng,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore,
    {
        match ciphertext {
            CiphertextMessage::SignalMessage(message) => {
                self.decrypt_signal(message, remote_address, store, rng)
            }
            CiphertextMessage::PreKeySignalMessage(message) => {
                self.decrypt_prekey(message, remote_address, store, rng)
            }
            other => Err(SignalProtocolError::InvalidMessage(
                other.message_type(),
                "not a session cipher message",
            )),
        }
    }

    /// Completes the handshake carried by `message` and decrypts its payload on the resulting
    /// session state. The sender's identity is saved and the consumed one-time pre-key removed
    /// only after the payload decrypted.
    pub fn decrypt_prekey<S>(
        &self,
        message: &PreKeySignalMessage,
        remote_address: &ProtocolAddress,
        store: &mut S,
        rng: &Rng,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore,
    {
        let mut session_record = store
            .load_session(remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);

        let pre_key_used = process_prekey(
            message,
            remote_address,
            &mut session_record,
            store,
            &self.config,
        )?;

        let plaintext = self.decrypt_message_with_record(
            remote_address,
            &mut session_record,
            message.message(),
            CiphertextMessageType::PreKey,
            rng,
        )?;

        store.save_identity(remote_address, message.identity_key())?;
        store.store_session(remote_address, &session_record)?;

        if let Some(pre_key_id) = pre_key_used {
            debug!(%remote_address, %pre_key_id, "remove consumed one-time pre-key");
            store.remove_pre_key(pre_key_id)?;
        }

        Ok(plaintext)
    }

    pub fn decrypt_signal<S>(
        &self,
        message: &SignalMessage,
        remote_address: &ProtocolAddress,
        store: &mut S,
        rng: &Rng,
    ) -> Result<Vec<u8>>
    where
        S: IdentityKeyStore + SessionStore,
    {
        let mut session_record = store
            .load_session(remote_address)?
            .ok_or_else(|| SignalProtocolError::SessionNotFound(remote_address.clone()))?;

        let plaintext = self.decrypt_message_with_record(
            remote_address,
            &mut session_record,
            message,
            CiphertextMessageType::Whisper,
            rng,
        )?;

        let their_identity_key = *session_record
            .session_state()
            .ok_or(SignalProtocolError::InvalidSessionStructure(
                "decryption succeeded without current session state",
            ))?
            .remote_identity_key();

        if !store.is_trusted_identity(remote_address, &their_identity_key, Direction::Receiving)? {
            warn!(%remote_address, "untrusted identity on decrypt");
            return Err(SignalProtocolError::UntrustedIdentity(
                remote_address.clone(),
            ));
        }

        store.save_identity(remote_address, &their_identity_key)?;
        store.store_session(remote_address, &session_record)?;

        Ok(plaintext)
    }

    /// Tries the current session state and then every archived state, newest first.
    ///
    /// Pre-key messages only ever target the current state. A duplicate is decisive and is never
    /// retried on another state.
    fn decrypt_message_with_record(
        &self,
        remote_address: &ProtocolAddress,
        record: &mut SessionRecord,
        ciphertext: &SignalMessage,
        message_type: CiphertextMessageType,
        rng: &Rng,
    ) -> Result<Vec<u8>> {
        let mut errors = Vec::new();

        if let Some(current_state) = record.session_state() {
            let mut current_state = current_state.clone();
            match self.decrypt_message_with_state(
                &mut current_state,
                ciphertext,
                message_type,
                remote_address,
                rng,
            ) {
                Ok(plaintext) => {
                    record.set_session_state(current_state);
                    return Ok(plaintext);
                }
                Err(err @ SignalProtocolError::DuplicatedMessage(_, _)) => return Err(err),
                Err(err) => {
                    if message_type == CiphertextMessageType::PreKey {
                        return Err(err);
                    }
                    errors.push(err);
                }
            }
        }

        let mut promoted = None;
        for (index, previous_state) in record.previous_session_states().enumerate() {
            let mut previous_state = previous_state.clone();
            match self.decrypt_message_with_state(
                &mut previous_state,
                ciphertext,
                message_type,
                remote_address,
                rng,
            ) {
                Ok(plaintext) => {
                    promoted = Some((index, previous_state, plaintext));
                    break;
                }
                Err(err @ SignalProtocolError::DuplicatedMessage(_, _)) => return Err(err),
                Err(err) => errors.push(err),
            }
        }

        if let Some((index, state, plaintext)) = promoted {
            info!(%remote_address, index, "decrypted with archived session state");
            record.promote_old_session(index, state, self.config.archived_states_max_length);
            return Ok(plaintext);
        }

        error!(
            %remote_address,
            ?message_type,
            attempts = errors.len(),
            previous_states = record.previous_session_count(),
            "message decryption failed"
        );
        for err in errors {
            debug!(%remote_address, %err, "session state rejected message");
        }

        Err(SignalProtocolError::InvalidMessage(
            message_type,
            "decryption failed",
        ))
    }

    fn decrypt_message_with_state(
        &self,
        state: &mut SessionState,
        ciphertext: &SignalMessage,
        message_type: CiphertextMessageType,
        remote_address: &ProtocolAddress,
        rng: &Rng,
    ) -> Result<Vec<u8>> {
        if !state.has_sender_chain() {
            return Err(SignalProtocolError::InvalidMessage(
                message_type,
                "no session available to decrypt",
            ));
        }

        if ciphertext.message_version() != state.session_version() {
            return Err(SignalProtocolError::UnrecognizedMessageVersion(
                ciphertext.message_version() as u32,
            ));
        }

        let their_ratchet_key = ciphertext.sender_ratchet_key();
        let counter = ciphertext.counter();
        let chain_key = self.get_or_create_chain_key(state, their_ratchet_key, remote_address, rng)?;
        let message_keys = self.get_or_create_message_key(
            state,
            their_ratchet_key,
            remote_address,
            message_type,
            &chain_key,
            counter,
        )?;

        if !ciphertext.verify_mac(
            state.remote_identity_key(),
            state.local_identity_key(),
            message_keys.mac_key(),
        ) {
            return Err(SignalProtocolError::InvalidMessage(
                message_type,
                "MAC verification failed",
            ));
        }

        let plaintext =
            aes_256_cbc_decrypt(ciphertext.body(), message_keys.cipher_key(), message_keys.iv())
                .map_err(|_| {
                    SignalProtocolError::InvalidMessage(
                        message_type,
                        "failed to decrypt",
                    )
                })?;

        state.clear_pending_pre_key();

        Ok(plaintext)
    }

    /// Returns the receiving chain for `their_ratchet_key`, performing a DH ratchet step if the
    /// key is new.
    fn get_or_create_chain_key(
        &self,
        state: &mut SessionState,
        their_ratchet_key: &PublicKey,
        remote_address: &ProtocolAddress,
        rng: &Rng,
    ) -> Result<ChainKey> {
        if let Some(chain_key) = state.receiver_chain_key(their_ratchet_key) {
            return Ok(chain_key);
        }

        debug!(%remote_address, ratchet_key = %their_ratchet_key, "new remote ratchet key");

        let (receiver_root_key, receiver_chain_key) = state
            .root_key()
            .create_chain(their_ratchet_key, state.sender_ratchet_secret_key()?)?;

        let our_new_ratchet_key = KeyPair::generate(rng)?;
        let (sender_root_key, sender_chain_key) =
            receiver_root_key.create_chain(their_ratchet_key, &our_new_ratchet_key.secret_key)?;

        let current_index = state.sender_chain_key()?.index();

        state.add_receiver_chain(
            *their_ratchet_key,
            receiver_chain_key.clone(),
            self.config.max_receiver_chains,
        );
        state.set_previous_counter(current_index.saturating_sub(1));
        state.set_sender_chain(our_new_ratchet_key, sender_chain_key);
        state.set_root_key(sender_root_key);

        Ok(receiver_chain_key)
    }

    /// Returns the keys for message `counter`, caching the keys of all skipped messages on the
    /// way.
    fn get_or_create_message_key(
        &self,
        state: &mut SessionState,
        their_ratchet_key: &PublicKey,
        remote_address: &ProtocolAddress,
        message_type: CiphertextMessageType,
        chain_key: &ChainKey,
        counter: u32,
    ) -> Result<MessageKeys> {
        let chain_index = chain_key.index();

        if chain_index > counter {
            return match state.take_message_keys(their_ratchet_key, counter) {
                Some(message_keys) => Ok(message_keys),
                None => {
                    info!(%remote_address, chain_index, counter, "duplicate message");
                    Err(SignalProtocolError::DuplicatedMessage(chain_index, counter))
                }
            };
        }

        let jump = counter - chain_index;
        if jump > self.config.max_forward_jumps {
            error!(
                %remote_address,
                jump,
                max_forward_jumps = self.config.max_forward_jumps,
                "message from too far into the future"
            );
            return Err(SignalProtocolError::InvalidMessage(
                message_type,
                "message from too far into the future",
            ));
        }

        let mut chain_key = chain_key.clone();
        while chain_key.index() < counter {
            state.store_message_keys(
                their_ratchet_key,
                chain_key.message_keys()?,
                self.config.max_message_keys,
            )?;
            chain_key = chain_key.next_chain_key();
        }

        state.set_receiver_chain_key(their_ratchet_key, chain_key.next_chain_key())?;
        chain_key.message_keys()
    }
}

/// Encrypts with [`SessionConfig::default`], see [`SessionCipher::encrypt`].
pub fn message_encrypt<S>(
    plaintext: &[u8],
    remote_address: &ProtocolAddress,
    store: &mut S,
    now: Timestamp,
) -> Result<CiphertextMessage>
where
    S: IdentityKeyStore + SessionStore,
{
    SessionCipher::default().encrypt(plaintext, remote_address, store, now)
}

/// Decrypts with [`SessionConfig::default`], see [`SessionCipher::decrypt`].
pub fn message_decrypt<S>(
    ciphertext: &CiphertextMessage,
    remote_address: &ProtocolAddress,
    store: &mut S,
    rng: &Rng,
) -> Result<Vec<u8>>
where
    S: ProtocolStore,
{
    SessionCipher::default().decrypt(ciphertext, remote_address, store, rng)
}

#[cfg(test)]
mod tests {
    use crate::address::{DeviceId, ProtocolAddress};
    use crate::crypto::Rng;
    use crate::error::SignalProtocolError;
    use crate::identity::IdentityKeyPair;
    use crate::memory_store::MemoryStore;
    use crate::protocol::{CiphertextMessage, PlaintextContent};
    use crate::timestamp::Timestamp;

    use super::{message_decrypt, message_encrypt};

    #[test]
    fn encrypt_without_session() {
        let rng = Rng::from_seed([1; 32]);
        let mut store = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 1);
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));

        let result = message_encrypt(b"hello", &bob, &mut store, Timestamp::from_epoch_millis(1));
        assert!(matches!(
            result,
            Err(SignalProtocolError::SessionNotFound(address)) if address == bob
        ));
    }

    #[test]
    fn reject_non_session_messages() {
        let rng = Rng::from_seed([2; 32]);
        let mut store = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 1);
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));

        let message = CiphertextMessage::PlaintextContent(PlaintextContent::new(b"hello"));
        assert!(matches!(
            message_decrypt(&message, &bob, &mut store, &rng),
            Err(SignalProtocolError::InvalidMessage(_, _))
        ));
    }
}
