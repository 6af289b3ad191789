// SPDX-License-Identifier: MIT OR Apache-2.0

use sha2::{Digest, Sha512};

pub const SHA512_DIGEST_SIZE: usize = 64;

/// SHA2-512 over the concatenation of all given parts.
pub fn sha2_512(parts: &[&[u8]]) -> [u8; SHA512_DIGEST_SIZE] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    result[..].try_into().expect("sha512 digest size")
}
