// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives the protocol is composed from.
//!
//! Each module wraps one primitive behind a small, typed API with its own error type. Nothing in
//! here knows about sessions or wire formats.
pub mod aes;
pub mod hkdf;
pub mod hmac;
mod rng;
mod secret;
mod sha2;
pub mod x25519;
pub mod xeddsa;

pub use rng::{Rng, RngError};
pub use secret::Secret;
