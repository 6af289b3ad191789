// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use crate::config::SessionConfig;
use crate::crypto::Rng;
use crate::manager::SessionManager;
use crate::protocol::CiphertextMessageType;
use crate::sealed_sender::{LocalAddress, sealed_sender_encrypt};
use crate::session::process_prekey_bundle;
use crate::session_cipher::SessionCipher;
use crate::test_utils::{TestParty, TestServer, setup_logging};
use crate::timestamp::Timestamp;
use crate::traits::SessionStore;

// Many tasks send to the same remote address at once. Every message has to be encrypted with its
// own chain step, otherwise the receiver would see reused counters.
#[tokio::test(flavor = "multi_thread")]
async fn parallel_sends_to_one_address() {
    setup_logging();

    let rng = Rng::from_seed([1; 32]);
    let cipher = SessionCipher::default();

    let alice = TestParty::new(1, &rng);
    let mut bob = TestParty::new(1, &rng);
    let alice_address = alice.address.clone();
    let bob_address = bob.address.clone();

    let manager = SessionManager::new(
        alice.store,
        SessionConfig::default(),
        Rng::from_seed([2; 32]),
    );
    let bundle = bob.pre_key_bundle(true, &rng);
    manager
        .process_prekey_bundle(&bob_address, &bundle, Timestamp::from_epoch_millis(1))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        let bob_address = bob_address.clone();
        handles.push(tokio::spawn(async move {
            let plaintext = format!("message {i}");
            manager
                .encrypt(plaintext.as_bytes(), &bob_address, Timestamp::from_epoch_millis(2))
                .await
        }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        let message = handle.await.unwrap().unwrap();
        assert_eq!(message.message_type(), CiphertextMessageType::PreKey);
        messages.push(message);
    }

    // Bob receives them in whatever order the tasks finished.
    let mut received = HashSet::new();
    for message in &messages {
        let plaintext = bob.decrypt(&cipher, &alice_address, message, &rng);
        assert!(received.insert(plaintext));
    }
    let expected: HashSet<Vec<u8>> = (0..16)
        .map(|i| format!("message {i}").into_bytes())
        .collect();
    assert_eq!(received, expected);

    // The answer reaches the manager and acknowledges the session.
    let reply = bob.encrypt(&cipher, &alice_address, b"got them all");
    assert_eq!(
        manager.decrypt(&reply, &bob_address).await.unwrap(),
        b"got them all"
    );
    let record = manager.store().load_session(&bob_address).unwrap().unwrap();
    assert!(record.session_state().unwrap().pending_pre_key().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_conversations() {
    let rng = Rng::from_seed([3; 32]);

    let alice = TestParty::new(1, &rng);
    let alice_address = alice.address.clone();
    let manager = SessionManager::new(
        alice.store,
        SessionConfig::default(),
        Rng::from_seed([4; 32]),
    );

    let mut peers: Vec<TestParty> = (0..4).map(|_| TestParty::new(1, &rng)).collect();
    for peer in peers.iter_mut() {
        let bundle = peer.pre_key_bundle(true, &rng);
        manager
            .process_prekey_bundle(&peer.address, &bundle, Timestamp::from_epoch_millis(1))
            .await
            .unwrap();
    }

    // Each peer gets its own task, all of them sharing the manager's store.
    let mut handles = Vec::new();
    for (index, peer) in peers.into_iter().enumerate() {
        let manager = manager.clone();
        let alice_address = alice_address.clone();
        handles.push(tokio::spawn(async move {
            let mut peer = peer;
            let cipher = SessionCipher::default();
            let rng = Rng::from_seed([10 + index as u8; 32]);
            let peer_address = peer.address.clone();

            for round in 0..5 {
                let outgoing = format!("ping {round}");
                let message = manager
                    .encrypt(outgoing.as_bytes(), &peer_address, Timestamp::from_epoch_millis(2))
                    .await
                    .unwrap();
                let received = peer.decrypt(&cipher, &alice_address, &message, &rng);
                assert_eq!(received, outgoing.as_bytes());

                let incoming = format!("pong {round}");
                let reply = peer.encrypt(&cipher, &alice_address, incoming.as_bytes());
                let received = manager.decrypt(&reply, &peer_address).await.unwrap();
                assert_eq!(received, incoming.as_bytes());
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // Released addresses are not tracked any longer.
    assert!(manager.locks().is_empty());
}

// Sealed sender and plain messages from the same peer arrive at the same time. Both decrypt on
// the same session record, so neither may lose the ratchet progress of the other.
#[tokio::test(flavor = "multi_thread")]
async fn sealed_and_plain_messages_from_one_peer() {
    let rng = Rng::from_seed([5; 32]);
    let cipher = SessionCipher::default();
    let server = TestServer::new(&rng);

    let mut alice = TestParty::new(1, &rng);
    let mut bob = TestParty::new(1, &rng);
    let alice_address = alice.address.clone();
    let bob_address = bob.address.clone();
    let local_address = LocalAddress {
        uuid: bob.uuid.to_string(),
        e164: None,
        device_id: bob.address.device_id(),
    };

    let bundle = bob.pre_key_bundle(true, &rng);
    let bob_manager =
        SessionManager::new(bob.store, SessionConfig::default(), Rng::from_seed([6; 32]));

    process_prekey_bundle(
        &bob_address,
        &mut alice.store,
        &bundle,
        Timestamp::from_epoch_millis(1),
        &rng,
        cipher.config(),
    )
    .unwrap();

    let certificate = server.sender_certificate(&alice, Timestamp::from_epoch_millis(1_000), &rng);
    let mut plain = Vec::new();
    let mut sealed = Vec::new();
    for i in 0..8 {
        let message = alice.encrypt(&cipher, &bob_address, format!("plain {i}").as_bytes());
        plain.push(message);
        let message = sealed_sender_encrypt(
            &bob_address,
            &certificate,
            format!("sealed {i}").as_bytes(),
            &mut alice.store,
            Timestamp::from_epoch_millis(2),
            &rng,
        )
        .unwrap();
        sealed.push(message);
    }

    let mut handles = Vec::new();
    for message in plain {
        let manager = bob_manager.clone();
        let alice_address = alice_address.clone();
        handles.push(tokio::spawn(async move {
            manager.decrypt(&message, &alice_address).await
        }));
    }
    for message in sealed {
        let manager = bob_manager.clone();
        let trust_root = server.trust_root.public_key;
        let local_address = local_address.clone();
        handles.push(tokio::spawn(async move {
            manager
                .sealed_sender_decrypt(
                    &message,
                    &trust_root,
                    Timestamp::from_epoch_millis(3),
                    &local_address,
                )
                .await
                .map(|result| result.into_message())
        }));
    }

    let mut received = HashSet::new();
    for handle in handles {
        assert!(received.insert(handle.await.unwrap().unwrap()));
    }
    let expected: HashSet<Vec<u8>> = (0..8)
        .flat_map(|i| [format!("plain {i}"), format!("sealed {i}")])
        .map(String::into_bytes)
        .collect();
    assert_eq!(received, expected);

    // Every skipped key was used exactly once.
    let record = bob_manager
        .store()
        .load_session(&alice_address)
        .unwrap()
        .unwrap();
    let state = record.session_state().unwrap();
    assert_eq!(state.skipped_message_key_count(), 0);
    assert!(bob_manager.locks().is_empty());
}
