// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use p2panda_signal::test_utils::{TestParty, establish_session};
use p2panda_signal::{CiphertextMessage, Rng, SessionCipher};

/// Max. number of messages in a party's inbox.
const INBOX_CAPACITY: usize = 128;

/// Assertable session message.
struct Message {
    /// Expected message in plaintext.
    expected: Vec<u8>,

    /// Encrypted message.
    ciphertext: CiphertextMessage,
}

// Establish a session between Alice and Bob and randomly choose who sends, and whether the oldest
// or the newest pending message is delivered next. Every message has to decrypt exactly once, no
// matter the order.
fuzz_target!(|args: ([u8; 32], &[u8])| {
    let (seed, actions) = args;

    let rng = Rng::from_seed(seed);
    let cipher = SessionCipher::default();

    let mut alice = TestParty::new(1, &rng);
    let mut bob = TestParty::new(1, &rng);
    establish_session(&mut alice, &mut bob, &cipher, &rng);

    let alice_address = alice.address.clone();
    let bob_address = bob.address.clone();

    let mut to_alice_inbox = VecDeque::<Message>::with_capacity(INBOX_CAPACITY);
    let mut to_bob_inbox = VecDeque::<Message>::with_capacity(INBOX_CAPACITY);

    for action in actions {
        match action % 6 {
            0 => {
                if to_bob_inbox.len() >= INBOX_CAPACITY {
                    continue;
                }
                let expected = rng.random_vec(32).unwrap();
                let ciphertext = alice.encrypt(&cipher, &bob_address, &expected);
                to_bob_inbox.push_back(Message {
                    expected,
                    ciphertext,
                });
            }
            1 => {
                if to_alice_inbox.len() >= INBOX_CAPACITY {
                    continue;
                }
                let expected = rng.random_vec(32).unwrap();
                let ciphertext = bob.encrypt(&cipher, &alice_address, &expected);
                to_alice_inbox.push_back(Message {
                    expected,
                    ciphertext,
                });
            }
            2 => {
                let Some(message) = to_bob_inbox.pop_front() else {
                    continue;
                };
                let plaintext = bob.decrypt(&cipher, &alice_address, &message.ciphertext, &rng);
                assert_eq!(plaintext, message.expected);
            }
            3 => {
                let Some(message) = to_alice_inbox.pop_front() else {
                    continue;
                };
                let plaintext = alice.decrypt(&cipher, &bob_address, &message.ciphertext, &rng);
                assert_eq!(plaintext, message.expected);
            }
            4 => {
                let Some(message) = to_bob_inbox.pop_back() else {
                    continue;
                };
                let plaintext = bob.decrypt(&cipher, &alice_address, &message.ciphertext, &rng);
                assert_eq!(plaintext, message.expected);

                // Delivering the same message twice is always rejected.
                let replay = cipher.decrypt(&message.ciphertext, &alice_address, &mut bob.store, &rng);
                assert!(replay.is_err());
            }
            5 => {
                let Some(message) = to_alice_inbox.pop_back() else {
                    continue;
                };
                let plaintext = alice.decrypt(&cipher, &bob_address, &message.ciphertext, &rng);
                assert_eq!(plaintext, message.expected);
            }
            _ => unreachable!(),
        }
    }
});
