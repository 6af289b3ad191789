// SPDX-License-Identifier: MIT OR Apache-2.0

//! Establishing sessions with X3DH, from either side of the handshake.
use tracing::{debug, warn};

use crate::address::ProtocolAddress;
use crate::config::SessionConfig;
use crate::crypto::Rng;
use crate::crypto::x25519::KeyPair;
use crate::error::{Result, SignalProtocolError};
use crate::protocol::PreKeySignalMessage;
use crate::ratchet::{
    AliceParameters, BobParameters, initialize_alice_session, initialize_bob_session,
};
use crate::state::{PreKeyBundle, PreKeyId, SessionRecord};
use crate::timestamp::Timestamp;
use crate::traits::{Direction, IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore};

/// Handles the handshake part of an incoming pre-key message and makes the resulting session
/// state current in `session_record`.
///
/// Returns the one-time pre-key consumed by the handshake. It is not removed here, the caller
/// removes it from the store once the updated session record was persisted. A replay of a
/// handshake we already processed reuses the existing state and consumes nothing.
///
/// The sender's identity key is not saved either. Nothing in the handshake authenticates it
/// until the enclosed message was decrypted.
pub fn process_prekey<S>(
    message: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    session_record: &mut SessionRecord,
    store: &mut S,
    config: &SessionConfig,
) -> Result<Option<PreKeyId>>
where
    S: IdentityKeyStore + PreKeyStore + SignedPreKeyStore,
{
    let their_identity_key = message.identity_key();

    if !store.is_trusted_identity(remote_address, their_identity_key, Direction::Receiving)? {
        warn!(%remote_address, "untrusted identity in pre-key message");
        return Err(SignalProtocolError::UntrustedIdentity(
            remote_address.clone(),
        ));
    }

    if session_record.promote_matching_session(
        message.message_version(),
        message.base_key(),
        config.archived_states_max_length,
    ) {
        debug!(%remote_address, "pre-key message for known handshake");
        return Ok(None);
    }

    let our_signed_pre_key = store
        .load_signed_pre_key(message.signed_pre_key_id())?
        .ok_or(SignalProtocolError::InvalidSignedPreKeyId)?;

    let our_one_time_pre_key = match message.pre_key_id() {
        Some(pre_key_id) => Some(
            store
                .load_pre_key(pre_key_id)?
                .ok_or(SignalProtocolError::InvalidPreKeyId)?
                .key_pair()
                .clone(),
        ),
        None => {
            warn!(%remote_address, "pre-key message without one-time pre-key");
            None
        }
    };

    let parameters = BobParameters::new(
        store.identity_key_pair()?,
        our_signed_pre_key.key_pair().clone(),
        our_one_time_pre_key,
        our_signed_pre_key.key_pair().clone(),
        *their_identity_key,
        *message.base_key(),
    );

    let mut new_state = initialize_bob_session(&parameters)?;
    new_state.set_local_registration_id(store.local_registration_id()?);
    new_state.set_remote_registration_id(message.registration_id());

    session_record.promote_state(new_state, config.archived_states_max_length);

    Ok(message.pre_key_id())
}

/// Starts a session with the owner of `bundle` and stores it.
///
/// Every message sent on the new session carries the handshake data until the remote party
/// answers for the first time.
pub fn process_prekey_bundle<S>(
    remote_address: &ProtocolAddress,
    store: &mut S,
    bundle: &PreKeyBundle,
    now: Timestamp,
    rng: &Rng,
    config: &SessionConfig,
) -> Result<()>
where
    S: IdentityKeyStore + SessionStore,
{
    let their_identity_key = bundle.identity_key();

    if !store.is_trusted_identity(remote_address, their_identity_key, Direction::Sending)? {
        warn!(%remote_address, "untrusted identity in pre-key bundle");
        return Err(SignalProtocolError::UntrustedIdentity(
            remote_address.clone(),
        ));
    }

    bundle.verify()?;

    let mut session_record = store
        .load_session(remote_address)?
        .unwrap_or_else(SessionRecord::new_fresh);

    let our_base_key_pair = KeyPair::generate(rng)?;
    let their_signed_pre_key = *bundle.signed_pre_key_public();

    let parameters = AliceParameters::new(
        store.identity_key_pair()?,
        our_base_key_pair.clone(),
        *their_identity_key,
        their_signed_pre_key,
        their_signed_pre_key,
    )
    .with_their_one_time_pre_key(bundle.pre_key_public().copied());

    let mut session = initialize_alice_session(&parameters, rng)?;

    debug!(
        %remote_address,
        pre_key_id = ?bundle.pre_key_id(),
        signed_pre_key_id = %bundle.signed_pre_key_id(),
        "set up session from pre-key bundle"
    );

    session.set_pending_pre_key(
        bundle.pre_key_id(),
        bundle.signed_pre_key_id(),
        our_base_key_pair.public_key,
        now,
    );
    session.set_local_registration_id(store.local_registration_id()?);
    session.set_remote_registration_id(bundle.registration_id());

    store.save_identity(remote_address, their_identity_key)?;

    session_record.promote_state(session, config.archived_states_max_length);
    store.store_session(remote_address, &session_record)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::address::{DeviceId, ProtocolAddress};
    use crate::config::SessionConfig;
    use crate::crypto::Rng;
    use crate::error::SignalProtocolError;
    use crate::identity::IdentityKeyPair;
    use crate::memory_store::MemoryStore;
    use crate::state::{PreKeyBundle, SignedPreKeyId, SignedPreKeyRecord};
    use crate::timestamp::Timestamp;
    use crate::traits::{IdentityKeyStore, SessionStore};

    use super::process_prekey_bundle;

    #[test]
    fn bundle_creates_pending_session() {
        let rng = Rng::from_seed([1; 32]);
        let mut alice = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 11);
        let bob_identity = IdentityKeyPair::generate(&rng).unwrap();
        let signed_pre_key = SignedPreKeyRecord::generate(
            SignedPreKeyId::from(1),
            Timestamp::from_epoch_millis(1),
            &bob_identity,
            &rng,
        )
        .unwrap();
        let bundle = PreKeyBundle::new(
            22,
            DeviceId::new(1),
            None,
            signed_pre_key.id(),
            *signed_pre_key.public_key(),
            *signed_pre_key.signature(),
            *bob_identity.identity_key(),
        );
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));

        process_prekey_bundle(
            &bob,
            &mut alice,
            &bundle,
            Timestamp::from_epoch_millis(500),
            &rng,
            &SessionConfig::default(),
        )
        .unwrap();

        let record = alice.load_session(&bob).unwrap().unwrap();
        let state = record.session_state().unwrap();
        assert_eq!(state.local_registration_id(), 11);
        assert_eq!(state.remote_registration_id(), 22);
        let pending = state.pending_pre_key().unwrap();
        assert_eq!(pending.pre_key_id(), None);
        assert_eq!(pending.signed_pre_key_id(), SignedPreKeyId::from(1));
        assert_eq!(pending.timestamp(), Timestamp::from_epoch_millis(500));
        assert_eq!(
            alice.identity(&bob).unwrap(),
            Some(*bob_identity.identity_key())
        );
    }

    #[test]
    fn bundle_with_bad_signature() {
        let rng = Rng::from_seed([2; 32]);
        let mut alice = MemoryStore::new(IdentityKeyPair::generate(&rng).unwrap(), 1);
        let bob_identity = IdentityKeyPair::generate(&rng).unwrap();
        let mallory_identity = IdentityKeyPair::generate(&rng).unwrap();
        let signed_pre_key = SignedPreKeyRecord::generate(
            SignedPreKeyId::from(1),
            Timestamp::from_epoch_millis(1),
            &mallory_identity,
            &rng,
        )
        .unwrap();
        let bundle = PreKeyBundle::new(
            2,
            DeviceId::new(1),
            None,
            signed_pre_key.id(),
            *signed_pre_key.public_key(),
            *signed_pre_key.signature(),
            *bob_identity.identity_key(),
        );
        let bob = ProtocolAddress::new("bob", DeviceId::new(1));

        let result = process_prekey_bundle(
            &bob,
            &mut alice,
            &bundle,
            Timestamp::from_epoch_millis(1),
            &rng,
            &SessionConfig::default(),
        );
        assert!(matches!(
            result,
            Err(SignalProtocolError::SignatureValidationFailed)
        ));
        assert!(alice.load_session(&bob).unwrap().is_none());
    }
}
