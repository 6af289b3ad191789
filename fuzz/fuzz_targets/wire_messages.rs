// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use p2panda_signal::sealed_sender::SealedSenderV2SentMessage;
use p2panda_signal::test_utils::TestParty;
use p2panda_signal::{
    CiphertextMessage, CiphertextMessageType, Rng, SenderCertificate, SessionCipher,
    UnidentifiedSenderMessageContent, sealed_sender_decrypt_to_usmc,
};

// Feed arbitrary bytes into every parser of untrusted input. None of them may panic, and whatever
// parses must never decrypt without a session.
fuzz_target!(|data: &[u8]| {
    let rng = Rng::from_seed([1; 32]);
    let cipher = SessionCipher::default();
    let mut bob = TestParty::new(1, &rng);
    let alice = TestParty::new(1, &rng);

    for message_type in [
        CiphertextMessageType::Whisper,
        CiphertextMessageType::PreKey,
        CiphertextMessageType::SenderKey,
        CiphertextMessageType::Plaintext,
    ] {
        if let Ok(message) = CiphertextMessage::deserialize(message_type, data) {
            let result = cipher.decrypt(&message, &alice.address, &mut bob.store, &rng);
            assert!(result.is_err());
        }
    }

    let _ = SenderCertificate::deserialize(data);
    let _ = UnidentifiedSenderMessageContent::deserialize(data);

    if let Ok(sent) = SealedSenderV2SentMessage::parse(data) {
        for recipient in sent.recipients() {
            let _ = sent.recipient_message(recipient);
        }
    }

    assert!(sealed_sender_decrypt_to_usmc(data, &bob.store).is_err());
});
