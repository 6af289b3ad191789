// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extended Triple Diffie-Hellman (X3DH) handshake seeding the Double Ratchet.
//!
//! The initiator ("Alice") fetches a pre-key bundle of the responder ("Bob") and derives the first
//! root and chain key from three or four Diffie-Hellman agreements. Bob mirrors the same
//! agreements with his stored secrets once the first message arrives, ending up with identical
//! keys.
//!
//! Alice immediately performs one DH ratchet step against Bob's signed pre-key, so her first
//! messages already use a fresh ratchet key and Bob's signed pre-key acts as his first ratchet
//! key.
//!
//! <https://signal.org/docs/specifications/x3dh/>
//! <https://signal.org/docs/specifications/doubleratchet/>
mod keys;
mod params;

pub use keys::{ChainKey, MessageKeys, RootKey};
pub use params::{AliceParameters, BobParameters};

use zeroize::Zeroizing;

use keys::split_derived;

use crate::crypto::Rng;
use crate::crypto::hkdf::hkdf;
use crate::crypto::x25519::KeyPair;
use crate::error::Result;
use crate::protocol::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::state::SessionState;

const KDF_INFO: &[u8] = b"WhisperText";

/// Prepended to the agreements to separate them from XEdDSA inputs.
const DISCONTINUITY_BYTES: [u8; 32] = [0xFFu8; 32];

/// Derives the initial root key and chain key from the concatenated agreements.
pub(crate) fn derive_keys(secret_input: &[u8]) -> Result<(RootKey, ChainKey)> {
    let derived: [u8; 64] = hkdf(None, secret_input, KDF_INFO)?;
    let (root_key, chain_key) = split_derived(derived);
    Ok((
        RootKey::new(*root_key.as_bytes()),
        ChainKey::new(*chain_key.as_bytes(), 0),
    ))
}

/// X3DH from the initiator's side, before any ratchet step.
pub(crate) fn alice_initial_keys(parameters: &AliceParameters) -> Result<(RootKey, ChainKey)> {
    let our_base_key = &parameters.our_base_key_pair().secret_key;
    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 5));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);

    // DH1 = DH(IKA, SPKB)
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair()
            .secret_key()
            .calculate_agreement(parameters.their_signed_pre_key())?,
    );

    // DH2 = DH(EKA, IKB)
    secrets.extend_from_slice(
        &our_base_key.calculate_agreement(parameters.their_identity_key().public_key())?,
    );

    // DH3 = DH(EKA, SPKB)
    secrets.extend_from_slice(&our_base_key.calculate_agreement(parameters.their_signed_pre_key())?);

    // DH4 = DH(EKA, OPKB)
    if let Some(their_one_time_pre_key) = parameters.their_one_time_pre_key() {
        secrets.extend_from_slice(&our_base_key.calculate_agreement(their_one_time_pre_key)?);
    }

    derive_keys(&secrets)
}

/// X3DH from the responder's side, mirroring [`alice_initial_keys`].
pub(crate) fn bob_initial_keys(parameters: &BobParameters) -> Result<(RootKey, ChainKey)> {
    let our_signed_pre_key = &parameters.our_signed_pre_key_pair().secret_key;
    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 5));
    secrets.extend_from_slice(&DISCONTINUITY_BYTES);

    // DH1 = DH(SPKB, IKA)
    secrets.extend_from_slice(
        &our_signed_pre_key.calculate_agreement(parameters.their_identity_key().public_key())?,
    );

    // DH2 = DH(IKB, EKA)
    secrets.extend_from_slice(
        &parameters
            .our_identity_key_pair()
            .secret_key()
            .calculate_agreement(parameters.their_base_key())?,
    );

    // DH3 = DH(SPKB, EKA)
    secrets.extend_from_slice(&our_signed_pre_key.calculate_agreement(parameters.their_base_key())?);

    // DH4 = DH(OPKB, EKA)
    if let Some(our_one_time_pre_key) = parameters.our_one_time_pre_key_pair() {
        secrets.extend_from_slice(
            &our_one_time_pre_key
                .secret_key
                .calculate_agreement(parameters.their_base_key())?,
        );
    }

    derive_keys(&secrets)
}

/// Creates the initiator's first session state.
///
/// The X3DH chain key becomes the receiving chain for Bob's ratchet key, a freshly generated
/// ratchet key pair starts the sending chain.
pub fn initialize_alice_session(parameters: &AliceParameters, rng: &Rng) -> Result<SessionState> {
    let (root_key, chain_key) = alice_initial_keys(parameters)?;

    let sending_ratchet_key = KeyPair::generate(rng)?;
    let (sending_chain_root_key, sending_chain_chain_key) =
        root_key.create_chain(parameters.their_ratchet_key(), &sending_ratchet_key.secret_key)?;

    let state = SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        *parameters.our_identity_key_pair().identity_key(),
        *parameters.their_identity_key(),
        sending_chain_root_key,
        parameters.our_base_key_pair().public_key,
    )
    .with_receiver_chain(*parameters.their_ratchet_key(), chain_key)
    .with_sender_chain(sending_ratchet_key, sending_chain_chain_key);

    Ok(state)
}

/// Creates the responder's first session state, sending on the X3DH chain key with the signed
/// pre-key as ratchet key.
pub fn initialize_bob_session(parameters: &BobParameters) -> Result<SessionState> {
    let (root_key, chain_key) = bob_initial_keys(parameters)?;

    let state = SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        *parameters.our_identity_key_pair().identity_key(),
        *parameters.their_identity_key(),
        root_key,
        *parameters.their_base_key(),
    )
    .with_sender_chain(parameters.our_ratchet_key_pair().clone(), chain_key);

    Ok(state)
}
