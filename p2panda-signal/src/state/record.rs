// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::x25519::PublicKey;
use crate::state::SessionState;

/// Current session state plus superseded states, most recent first.
///
/// Older states stay around so messages encrypted against a state the remote party has since
/// replaced (for example after both sides started a new handshake at the same time) can still be
/// decrypted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    previous_sessions: VecDeque<SessionState>,
}

impl SessionRecord {
    /// Record without any state, used before the first handshake.
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current_session: Some(state),
            previous_sessions: VecDeque::new(),
        }
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_session.as_mut()
    }

    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous_sessions.iter()
    }

    pub fn previous_session_count(&self) -> usize {
        self.previous_sessions.len()
    }

    /// True if the current state can encrypt.
    pub fn has_usable_sender_chain(&self) -> bool {
        self.current_session
            .as_ref()
            .is_some_and(SessionState::has_sender_chain)
    }

    /// True if any state in this record was created by the handshake with the given base key.
    pub fn has_session_state(&self, version: u8, alice_base_key: &PublicKey) -> bool {
        self.current_session
            .iter()
            .chain(self.previous_sessions.iter())
            .any(|state| matches_handshake(state, version, alice_base_key))
    }

    /// Makes the state of the handshake with the given base key current again.
    ///
    /// Returns false if no such state exists.
    pub(crate) fn promote_matching_session(
        &mut self,
        version: u8,
        alice_base_key: &PublicKey,
        max_archived: usize,
    ) -> bool {
        if self
            .current_session
            .as_ref()
            .is_some_and(|state| matches_handshake(state, version, alice_base_key))
        {
            return true;
        }

        let Some(index) = self
            .previous_sessions
            .iter()
            .position(|state| matches_handshake(state, version, alice_base_key))
        else {
            return false;
        };

        if let Some(state) = self.previous_sessions.remove(index) {
            debug!(index, "promote matching previous session state");
            self.promote_state(state, max_archived);
        }
        true
    }

    /// Replaces the current state with an updated previous state at `index`.
    pub(crate) fn promote_old_session(
        &mut self,
        index: usize,
        updated_state: SessionState,
        max_archived: usize,
    ) {
        self.previous_sessions.remove(index);
        self.promote_state(updated_state, max_archived);
    }

    /// Archives the current state and makes `state` current.
    pub(crate) fn promote_state(&mut self, state: SessionState, max_archived: usize) {
        self.archive_current_state(max_archived);
        self.current_session = Some(state);
    }

    /// Moves the current state into the history, dropping the oldest entries beyond
    /// `max_archived`.
    pub fn archive_current_state(&mut self, max_archived: usize) {
        let Some(state) = self.current_session.take() else {
            return;
        };
        self.previous_sessions.push_front(state);
        if self.previous_sessions.len() > max_archived {
            debug!(
                dropped = self.previous_sessions.len() - max_archived,
                "drop oldest archived session states"
            );
            self.previous_sessions.truncate(max_archived);
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

fn matches_handshake(state: &SessionState, version: u8, alice_base_key: &PublicKey) -> bool {
    state.session_version() == version && state.alice_base_key() == alice_base_key
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::KeyPair;
    use crate::identity::IdentityKeyPair;
    use crate::ratchet::{ChainKey, RootKey};
    use crate::state::SessionState;

    use super::SessionRecord;

    fn state(rng: &Rng) -> SessionState {
        let local = IdentityKeyPair::generate(rng).unwrap();
        let remote = IdentityKeyPair::generate(rng).unwrap();
        let base_key = KeyPair::generate(rng).unwrap();
        let ratchet_key = KeyPair::generate(rng).unwrap();
        SessionState::new(
            3,
            *local.identity_key(),
            *remote.identity_key(),
            RootKey::new(rng.random_array().unwrap()),
            base_key.public_key,
        )
        .with_sender_chain(ratchet_key, ChainKey::new([1; 32], 0))
    }

    #[test]
    fn history_is_bounded() {
        let rng = Rng::from_seed([1; 32]);
        let mut record = SessionRecord::new_fresh();
        assert!(!record.has_usable_sender_chain());

        let states: Vec<_> = (0..6).map(|_| state(&rng)).collect();
        for state in &states {
            record.promote_state(state.clone(), 3);
        }

        assert_eq!(record.session_state(), Some(&states[5]));
        assert_eq!(record.previous_session_count(), 3);
        let previous: Vec<_> = record.previous_session_states().cloned().collect();
        assert_eq!(previous, vec![states[4].clone(), states[3].clone(), states[2].clone()]);
        assert!(record.has_usable_sender_chain());
    }

    #[test]
    fn promote_matching_session() {
        let rng = Rng::from_seed([2; 32]);
        let first = state(&rng);
        let second = state(&rng);
        let mut record = SessionRecord::new(first.clone());
        record.promote_state(second.clone(), 40);

        assert!(record.has_session_state(3, first.alice_base_key()));
        assert!(!record.has_session_state(2, first.alice_base_key()));

        assert!(record.promote_matching_session(3, first.alice_base_key(), 40));
        assert_eq!(record.session_state(), Some(&first));
        assert_eq!(record.previous_session_count(), 1);

        // Matching the current state leaves the record untouched.
        assert!(record.promote_matching_session(3, first.alice_base_key(), 40));
        assert_eq!(record.previous_session_count(), 1);

        let unknown = KeyPair::generate(&rng).unwrap();
        assert!(!record.promote_matching_session(3, &unknown.public_key, 40));
    }

    #[test]
    fn serialize_record() {
        let rng = Rng::from_seed([3; 32]);
        let mut record = SessionRecord::new(state(&rng));
        record.promote_state(state(&rng), 40);

        let bytes = record.serialize().unwrap();
        assert_eq!(SessionRecord::deserialize(&bytes).unwrap(), record);
        assert!(SessionRecord::deserialize(&[0xff, 0x00]).is_err());
    }
}
