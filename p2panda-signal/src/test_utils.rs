// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parties with in-memory stores and provisioned keys for tests and fuzzing.
use crate::address::{DeviceId, ProtocolAddress, ServiceId, Uuid};
use crate::crypto::Rng;
use crate::crypto::x25519::KeyPair;
use crate::identity::IdentityKeyPair;
use crate::memory_store::MemoryStore;
use crate::protocol::CiphertextMessage;
use crate::sealed_sender::{SenderCertificate, ServerCertificate};
use crate::session::process_prekey_bundle;
use crate::session_cipher::SessionCipher;
use crate::state::{PreKeyBundle, PreKeyId, PreKeyRecord, SignedPreKeyId, SignedPreKeyRecord};
use crate::timestamp::Timestamp;
use crate::traits::{PreKeyStore, SignedPreKeyStore};

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

pub const SIGNED_PRE_KEY_ID: u32 = 1;

/// One device of an account, addressed by its account uuid.
#[derive(Debug)]
pub struct TestParty {
    pub uuid: Uuid,
    pub address: ProtocolAddress,
    pub identity: IdentityKeyPair,
    pub registration_id: u32,
    pub store: MemoryStore,
    next_pre_key_id: u32,
}

impl TestParty {
    pub fn new(device_id: u32, rng: &Rng) -> Self {
        let uuid = Uuid::from_bytes(rng.random_array().unwrap());
        Self::with_identity(uuid, device_id, IdentityKeyPair::generate(rng).unwrap(), rng)
    }

    /// Another device of the same account, sharing its identity key.
    pub fn linked_device(&self, device_id: u32, rng: &Rng) -> Self {
        Self::with_identity(self.uuid, device_id, self.identity.clone(), rng)
    }

    fn with_identity(uuid: Uuid, device_id: u32, identity: IdentityKeyPair, rng: &Rng) -> Self {
        let registration_id = rng.random_id(0x3FFF).unwrap();
        let mut store = MemoryStore::new(identity.clone(), registration_id);

        let signed_pre_key = SignedPreKeyRecord::generate(
            SignedPreKeyId::from(SIGNED_PRE_KEY_ID),
            Timestamp::from_epoch_millis(0),
            &identity,
            rng,
        )
        .unwrap();
        store
            .store_signed_pre_key(signed_pre_key.id(), &signed_pre_key)
            .unwrap();

        Self {
            uuid,
            address: ProtocolAddress::new(uuid.to_string(), DeviceId::new(device_id)),
            identity,
            registration_id,
            store,
            next_pre_key_id: 1,
        }
    }

    pub fn service_id(&self) -> ServiceId {
        ServiceId::aci(self.uuid)
    }

    /// Publishes a bundle, optionally with a freshly stored one-time pre-key.
    pub fn pre_key_bundle(&mut self, with_one_time_pre_key: bool, rng: &Rng) -> PreKeyBundle {
        let pre_key = if with_one_time_pre_key {
            let record = PreKeyRecord::generate(PreKeyId::from(self.next_pre_key_id), rng).unwrap();
            self.next_pre_key_id += 1;
            self.store.store_pre_key(record.id(), &record).unwrap();
            Some((record.id(), *record.public_key()))
        } else {
            None
        };

        let signed_pre_key = self
            .store
            .load_signed_pre_key(SignedPreKeyId::from(SIGNED_PRE_KEY_ID))
            .unwrap()
            .unwrap();

        PreKeyBundle::new(
            self.registration_id,
            self.address.device_id(),
            pre_key,
            signed_pre_key.id(),
            *signed_pre_key.public_key(),
            *signed_pre_key.signature(),
            *self.identity.identity_key(),
        )
    }

    pub fn encrypt(&mut self, cipher: &SessionCipher, to: &ProtocolAddress, plaintext: &[u8]) -> CiphertextMessage {
        cipher
            .encrypt(plaintext, to, &mut self.store, Timestamp::from_epoch_millis(1))
            .unwrap()
    }

    pub fn decrypt(
        &mut self,
        cipher: &SessionCipher,
        from: &ProtocolAddress,
        message: &CiphertextMessage,
        rng: &Rng,
    ) -> Vec<u8> {
        cipher.decrypt(message, from, &mut self.store, rng).unwrap()
    }
}

/// Runs the handshake from `alice` to `bob` and exchanges one message in each direction, leaving
/// both with an acknowledged session.
pub fn establish_session(
    alice: &mut TestParty,
    bob: &mut TestParty,
    cipher: &SessionCipher,
    rng: &Rng,
) {
    let bundle = bob.pre_key_bundle(true, rng);
    process_prekey_bundle(
        &bob.address,
        &mut alice.store,
        &bundle,
        Timestamp::from_epoch_millis(1),
        rng,
        cipher.config(),
    )
    .unwrap();

    let bob_address = bob.address.clone();
    let alice_address = alice.address.clone();

    let message = alice.encrypt(cipher, &bob_address, b"hello bob");
    assert!(matches!(message, CiphertextMessage::PreKeySignalMessage(_)));
    assert_eq!(bob.decrypt(cipher, &alice_address, &message, rng), b"hello bob");

    let message = bob.encrypt(cipher, &alice_address, b"hello alice");
    assert!(matches!(message, CiphertextMessage::SignalMessage(_)));
    assert_eq!(alice.decrypt(cipher, &bob_address, &message, rng), b"hello alice");
}

/// Trust root and server key issuing sender certificates.
#[derive(Debug)]
pub struct TestServer {
    pub trust_root: KeyPair,
    pub server_key: KeyPair,
    pub server_certificate: ServerCertificate,
}

impl TestServer {
    pub fn new(rng: &Rng) -> Self {
        let trust_root = KeyPair::generate(rng).unwrap();
        let server_key = KeyPair::generate(rng).unwrap();
        let server_certificate =
            ServerCertificate::new(1, server_key.public_key, &trust_root.secret_key, rng).unwrap();
        Self {
            trust_root,
            server_key,
            server_certificate,
        }
    }

    pub fn sender_certificate(
        &self,
        party: &TestParty,
        expiration: Timestamp,
        rng: &Rng,
    ) -> SenderCertificate {
        SenderCertificate::new(
            party.uuid.to_string(),
            None,
            *party.identity.public_key(),
            party.address.device_id(),
            expiration,
            self.server_certificate.clone(),
            &self.server_key.secret_key,
            rng,
        )
        .unwrap()
    }
}
