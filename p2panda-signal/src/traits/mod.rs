// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the storage the protocol reads and writes.
mod store;

pub use store::{
    Direction, IdentityKeyStore, PreKeyStore, ProtocolStore, SessionStore, SignedPreKeyStore,
    StoreError,
};
