// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session states, session records and pre-key records as they are persisted in stores.
mod prekey;
mod record;
mod session;

pub use prekey::{PreKeyBundle, PreKeyId, PreKeyRecord, SignedPreKeyId, SignedPreKeyRecord};
pub use record::SessionRecord;
pub use session::{PendingPreKey, SessionState};
