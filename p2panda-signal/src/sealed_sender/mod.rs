// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealed sender hides the sender of a message from the transport while still authenticating it
//! to the recipient.
//!
//! The sender wraps an already encrypted session message together with a server-issued
//! [`SenderCertificate`] into an [`UnidentifiedSenderMessageContent`] and encrypts it to the
//! recipient's identity key. Two versions exist:
//!
//! - Version 1 encrypts to a single recipient.
//! - Version 2 encrypts the content once and adds a small per-recipient header for every
//!   recipient device. The sender uploads one message, the server fans it out.
//!
//! The version is read from the high nibble of the first byte.
mod certificate;
mod content;
mod multi_recipient;
mod v1;
mod v2;

pub use certificate::{SenderCertificate, ServerCertificate};
pub use content::{ContentHint, UnidentifiedSenderMessageContent};
pub use multi_recipient::{SealedSenderV2SentMessage, SentRecipient};
pub use v2::{MultiRecipient, sealed_sender_v2_encrypt};

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::address::{DeviceId, ProtocolAddress, ServiceId};
use crate::crypto::Rng;
use crate::crypto::x25519::PublicKey;
use crate::error::{Result, SignalProtocolError};
use crate::identity::IdentityKeyPair;
use crate::protocol::{CiphertextMessageType, PreKeySignalMessage, SignalMessage};
use crate::session_cipher::{SessionCipher, message_encrypt};
use crate::state::SessionRecord;
use crate::timestamp::Timestamp;
use crate::traits::{IdentityKeyStore, ProtocolStore, SessionStore};

/// Wraps `usmc` for `destination` with sealed sender version 1.
///
/// The identity key of `destination` must be known to the store.
pub fn sealed_sender_encrypt_from_usmc<S>(
    destination: &ProtocolAddress,
    usmc: &UnidentifiedSenderMessageContent,
    identity_store: &S,
    rng: &Rng,
) -> Result<Vec<u8>>
where
    S: IdentityKeyStore,
{
    let our_identity = identity_store.identity_key_pair()?;
    let their_identity = identity_store.identity(destination)?.ok_or_else(|| {
        SignalProtocolError::InvalidState(
            "sealed_sender_encrypt",
            format!("{destination} does not have a known identity key"),
        )
    })?;

    v1::encrypt(usmc, &our_identity, &their_identity, rng)
}

/// Encrypts `plaintext` on the session with `destination` and wraps the result with sealed
/// sender version 1.
pub fn sealed_sender_encrypt<S>(
    destination: &ProtocolAddress,
    sender_certificate: &SenderCertificate,
    plaintext: &[u8],
    store: &mut S,
    now: Timestamp,
    rng: &Rng,
) -> Result<Vec<u8>>
where
    S: IdentityKeyStore + SessionStore,
{
    let message = message_encrypt(plaintext, destination, store, now)?;
    let usmc = UnidentifiedSenderMessageContent::new(
        message.message_type(),
        sender_certificate.clone(),
        message.serialize().to_vec(),
        ContentHint::Default,
        None,
    );
    sealed_sender_encrypt_from_usmc(destination, &usmc, &*store, rng)
}

/// Encrypts `usmc` with sealed sender version 2 for all `destinations`.
///
/// Destination names are service id strings. Registration ids are taken from the current state
/// of the matching entry in `destination_sessions`, identity keys from the store.
pub fn sealed_sender_multi_recipient_encrypt<S>(
    destinations: &[&ProtocolAddress],
    destination_sessions: &[&SessionRecord],
    excluded_recipients: &[ServiceId],
    usmc: &UnidentifiedSenderMessageContent,
    identity_store: &S,
    rng: &Rng,
) -> Result<Vec<u8>>
where
    S: IdentityKeyStore,
{
    if destinations.len() != destination_sessions.len() {
        return Err(SignalProtocolError::InvalidArgument(
            "must have the same number of destination sessions as addresses".into(),
        ));
    }

    let mut recipients: Vec<MultiRecipient> = Vec::new();
    for (destination, session) in destinations.iter().zip(destination_sessions) {
        let service_id =
            ServiceId::parse_from_service_id_string(destination.name()).ok_or_else(|| {
                SignalProtocolError::InvalidArgument(format!(
                    "{destination} is not addressed by a service id"
                ))
            })?;

        let registration_id = session
            .session_state()
            .ok_or_else(|| {
                SignalProtocolError::InvalidState(
                    "sealed_sender_multi_recipient_encrypt",
                    format!("no current session for {destination}"),
                )
            })?
            .remote_registration_id();

        match recipients
            .iter_mut()
            .find(|recipient| recipient.service_id() == service_id)
        {
            Some(recipient) => recipient.add_device(destination.device_id(), registration_id),
            None => {
                let identity_key = identity_store.identity(destination)?.ok_or_else(|| {
                    SignalProtocolError::InvalidState(
                        "sealed_sender_multi_recipient_encrypt",
                        format!("{destination} does not have a known identity key"),
                    )
                })?;
                recipients.push(MultiRecipient::new(
                    service_id,
                    identity_key,
                    vec![(destination.device_id(), registration_id)],
                ));
            }
        }
    }

    let our_identity = identity_store.identity_key_pair()?;
    sealed_sender_v2_encrypt(&recipients, excluded_recipients, usmc, &our_identity, rng)
}

/// Unwraps a sealed sender message of either version.
///
/// All parsing and cryptographic failures are reported as `InvalidSealedSenderMessage`. Fails
/// with `SealedSenderSelfSend` if the message was sent with our own identity key.
pub fn sealed_sender_decrypt_to_usmc<S>(
    ciphertext: &[u8],
    identity_store: &S,
) -> Result<UnidentifiedSenderMessageContent>
where
    S: IdentityKeyStore,
{
    let our_identity = identity_store.identity_key_pair()?;

    let usmc = decrypt_usmc(ciphertext, &our_identity).map_err(|err| match err {
        err @ (SignalProtocolError::InvalidSealedSenderMessage(_)
        | SignalProtocolError::UnknownSealedSenderVersion(_)) => err,
        err => SignalProtocolError::InvalidSealedSenderMessage(err.to_string()),
    })?;

    if bool::from(usmc.sender().key().ct_eq(our_identity.public_key())) {
        return Err(SignalProtocolError::SealedSenderSelfSend);
    }

    Ok(usmc)
}

fn decrypt_usmc(
    ciphertext: &[u8],
    our_identity: &IdentityKeyPair,
) -> Result<UnidentifiedSenderMessageContent> {
    let (&version_byte, body) = ciphertext.split_first().ok_or_else(|| {
        SignalProtocolError::InvalidSealedSenderMessage("message was empty".into())
    })?;

    match version_byte >> 4 {
        0 | 1 => v1::decrypt(body, our_identity),
        2 if version_byte == v2::SEALED_SENDER_V2_RECEIVED_VERSION => {
            v2::decrypt_received(body, our_identity)
        }
        2 => Err(SignalProtocolError::InvalidSealedSenderMessage(
            "sent multi-recipient messages must be split by the server".into(),
        )),
        version => Err(SignalProtocolError::UnknownSealedSenderVersion(version)),
    }
}

/// Sender and plaintext of a decrypted sealed sender message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedSenderDecryptionResult {
    sender_uuid: String,
    sender_e164: Option<String>,
    device_id: DeviceId,
    message: Vec<u8>,
}

impl SealedSenderDecryptionResult {
    pub fn sender_uuid(&self) -> &str {
        &self.sender_uuid
    }

    pub fn sender_e164(&self) -> Option<&str> {
        self.sender_e164.as_deref()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn into_message(self) -> Vec<u8> {
        self.message
    }
}

/// Identity of the local device, used to detect messages we sent to ourselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalAddress {
    pub uuid: String,
    pub e164: Option<String>,
    pub device_id: DeviceId,
}

/// Unwraps a sealed sender message, validates its sender certificate and decrypts the inner
/// session message.
#[allow(clippy::too_many_arguments)]
pub fn sealed_sender_decrypt<S>(
    ciphertext: &[u8],
    trust_root: &PublicKey,
    timestamp: Timestamp,
    local_address: &LocalAddress,
    store: &mut S,
    session_cipher: &SessionCipher,
    rng: &Rng,
) -> Result<SealedSenderDecryptionResult>
where
    S: ProtocolStore,
{
    let usmc = open_sealed_sender(ciphertext, trust_root, timestamp, local_address, &*store)?;
    decrypt_sealed_contents(usmc, store, session_cipher, rng)
}

/// Unwraps the message and checks its sender without touching any session.
pub(crate) fn open_sealed_sender<S>(
    ciphertext: &[u8],
    trust_root: &PublicKey,
    timestamp: Timestamp,
    local_address: &LocalAddress,
    identity_store: &S,
) -> Result<UnidentifiedSenderMessageContent>
where
    S: IdentityKeyStore,
{
    let usmc = sealed_sender_decrypt_to_usmc(ciphertext, identity_store)?;
    let sender = usmc.sender();

    if !sender.validate(trust_root, timestamp) {
        return Err(SignalProtocolError::InvalidSealedSenderMessage(
            "trust root validation failed".into(),
        ));
    }

    let is_local_uuid = local_address.uuid == sender.sender_uuid();
    let is_local_e164 = match (&local_address.e164, sender.sender_e164()) {
        (Some(local_e164), Some(sender_e164)) => local_e164 == sender_e164,
        _ => false,
    };
    if (is_local_uuid || is_local_e164) && sender.sender_device_id() == local_address.device_id {
        warn!(device_id = %local_address.device_id, "sealed sender message from ourselves");
        return Err(SignalProtocolError::SealedSenderSelfSend);
    }

    Ok(usmc)
}

/// Address of the device which sent `usmc`, according to its certificate.
pub(crate) fn sender_address(usmc: &UnidentifiedSenderMessageContent) -> ProtocolAddress {
    let sender = usmc.sender();
    ProtocolAddress::new(sender.sender_uuid().to_string(), sender.sender_device_id())
}

/// Decrypts the session message inside an unwrapped and validated `usmc`.
pub(crate) fn decrypt_sealed_contents<S>(
    usmc: UnidentifiedSenderMessageContent,
    store: &mut S,
    session_cipher: &SessionCipher,
    rng: &Rng,
) -> Result<SealedSenderDecryptionResult>
where
    S: ProtocolStore,
{
    let remote_address = sender_address(&usmc);
    debug!(%remote_address, message_type = ?usmc.message_type(), "unwrapped sealed sender message");

    let message = match usmc.message_type() {
        CiphertextMessageType::Whisper => {
            let message = SignalMessage::try_from(usmc.contents())?;
            session_cipher.decrypt_signal(&message, &remote_address, store, rng)?
        }
        CiphertextMessageType::PreKey => {
            let message = PreKeySignalMessage::try_from(usmc.contents())?;
            session_cipher.decrypt_prekey(&message, &remote_address, store, rng)?
        }
        message_type => {
            return Err(SignalProtocolError::InvalidMessage(
                message_type,
                "unexpected message type for sealed_sender_decrypt",
            ));
        }
    };

    let sender = usmc.sender();
    Ok(SealedSenderDecryptionResult {
        sender_uuid: sender.sender_uuid().to_string(),
        sender_e164: sender.sender_e164().map(str::to_string),
        device_id: sender.sender_device_id(),
        message,
    })
}
