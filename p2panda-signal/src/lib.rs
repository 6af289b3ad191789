// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-signal` implements the Signal protocol for one-to-one sessions between devices: the
//! X3DH handshake, the Double Ratchet and Sealed Sender. All wire formats are byte-compatible
//! with other Signal protocol implementations.
//!
//! ## Sessions
//!
//! A device publishes a [`PreKeyBundle`] with its identity key, a signed pre-key and optionally a
//! one-time pre-key. Another device starts a session from that bundle with
//! [`process_prekey_bundle`] and can send right away. Until the first answer arrives every
//! message is a [`PreKeySignalMessage`] carrying the handshake, the receiver completes the
//! handshake on the fly while decrypting.
//!
//! From then on the [`SessionCipher`] advances a symmetric chain for every message and a
//! Diffie-Hellman ratchet step whenever the direction of the conversation changes. Old message
//! keys are deleted after use, so a compromised device can not read earlier messages
//! (forward secrecy), and every ratchet step heals the session from an earlier compromise
//! (post-compromise security). Messages may arrive out of order, keys of skipped messages are
//! cached within the bounds of [`SessionConfig`].
//!
//! ## Storage
//!
//! Identity keys, pre-keys and session records are read and written through the traits in
//! [`traits`]. [`MemoryStore`] implements all of them in memory and trusts remote identities on
//! first use. Records are handed to stores as opaque CBOR bytes.
//!
//! Each encryption or decryption reads, modifies and writes the session record of one remote
//! address. Callers running the cipher from several tasks use [`SessionManager`], which
//! serializes all operations per address.
//!
//! ## Sealed sender
//!
//! [`sealed_sender`] hides who sent a message from everyone but the recipient. The sender proves
//! its identity to the recipient with a [`SenderCertificate`] issued by a server whose
//! [`ServerCertificate`] is signed by a trust root both parties know. Version 2 encrypts one
//! message for many recipients at once.
//!
//! ## Security
//!
//! We can not recommend using this technology for high-risk use-cases when you can not guarantee
//! full control over all devices and transport channels. None of the used primitives are secure
//! against harvest-now-decrypt-later quantum adversaries.
mod address;
mod cbor;
mod config;
pub mod crypto;
mod error;
mod identity;
mod manager;
mod memory_store;
mod proto;
pub mod protocol;
pub mod ratchet;
pub mod sealed_sender;
mod session;
mod session_cipher;
pub mod state;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
mod timestamp;
pub mod traits;

pub use address::{
    DeviceId, ProtocolAddress, SERVICE_ID_FIXED_WIDTH_SIZE, ServiceId, ServiceIdKind, Uuid,
};
pub use cbor::{DecodeError, EncodeError};
pub use config::{
    ARCHIVED_STATES_MAX_LENGTH, MAX_FORWARD_JUMPS, MAX_MESSAGE_KEYS, MAX_RECEIVER_CHAINS,
    MAX_UNACKNOWLEDGED_SESSION_AGE, SessionConfig,
};
pub use crypto::{Rng, RngError};
pub use error::{Result, SignalProtocolError};
pub use identity::{IdentityKey, IdentityKeyPair};
pub use manager::{SessionGuard, SessionLocks, SessionManager, SharedStore};
pub use memory_store::MemoryStore;
pub use protocol::{
    CIPHERTEXT_MESSAGE_CURRENT_VERSION, CiphertextMessage, CiphertextMessageType,
    PlaintextContent, PreKeySignalMessage, SenderKeyMessage, SignalMessage,
};
pub use sealed_sender::{
    ContentHint, LocalAddress, SealedSenderDecryptionResult, SenderCertificate, ServerCertificate,
    UnidentifiedSenderMessageContent, sealed_sender_decrypt, sealed_sender_decrypt_to_usmc,
    sealed_sender_encrypt, sealed_sender_encrypt_from_usmc, sealed_sender_multi_recipient_encrypt,
};
pub use session::{process_prekey, process_prekey_bundle};
pub use session_cipher::{SessionCipher, message_decrypt, message_encrypt};
pub use state::{
    PreKeyBundle, PreKeyId, PreKeyRecord, SessionRecord, SessionState, SignedPreKeyId,
    SignedPreKeyRecord,
};
pub use timestamp::Timestamp;
