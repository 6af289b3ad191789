// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Maximum number of messages a receiving chain may be advanced in one step.
pub const MAX_FORWARD_JUMPS: u32 = 25_000;

/// Maximum number of skipped message keys kept per receiver chain.
pub const MAX_MESSAGE_KEYS: usize = 2_000;

/// Maximum number of receiver chains kept per session state.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Maximum number of superseded session states kept in a record.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Sessions whose first message was never answered are dropped after this age.
pub const MAX_UNACKNOWLEDGED_SESSION_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Resource bounds applied by the session cipher.
///
/// Every bound limits memory held for a single remote address. The total number of cached
/// skipped keys for a session state is at most `max_receiver_chains * max_message_keys`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_forward_jumps: u32,
    pub max_message_keys: usize,
    pub max_receiver_chains: usize,
    pub archived_states_max_length: usize,
    pub max_unacknowledged_session_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_forward_jumps: MAX_FORWARD_JUMPS,
            max_message_keys: MAX_MESSAGE_KEYS,
            max_receiver_chains: MAX_RECEIVER_CHAINS,
            archived_states_max_length: ARCHIVED_STATES_MAX_LENGTH,
            max_unacknowledged_session_age: MAX_UNACKNOWLEDGED_SESSION_AGE,
        }
    }
}

impl SessionConfig {
    pub fn with_max_forward_jumps(mut self, value: u32) -> Self {
        self.max_forward_jumps = value;
        self
    }

    pub fn with_max_message_keys(mut self, value: usize) -> Self {
        self.max_message_keys = value;
        self
    }

    pub fn with_max_receiver_chains(mut self, value: usize) -> Self {
        self.max_receiver_chains = value;
        self
    }

    pub fn with_archived_states_max_length(mut self, value: usize) -> Self {
        self.archived_states_max_length = value;
        self
    }

    pub fn with_max_unacknowledged_session_age(mut self, value: Duration) -> Self {
        self.max_unacknowledged_session_age = value;
        self
    }
}
