// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256 in the three modes the protocol needs.
//!
//! - CBC with PKCS#7 padding encrypts ratchet message bodies.
//! - CTR with a zero nonce, authenticated by a truncated HMAC-SHA256, encrypts sealed sender v1
//!   payloads.
//! - GCM-SIV with a zero nonce encrypts sealed sender v2 payloads under a single-use key.
use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use thiserror::Error;

use crate::crypto::hmac::{hmac_sha256, verify_truncated_mac};

pub const AES_KEY_SIZE: usize = 32;

pub const AES_CBC_IV_SIZE: usize = 16;

/// Length of the HMAC-SHA256 tag appended to AES-CTR ciphertexts.
pub const CTR_HMAC_TAG_SIZE: usize = 10;

pub const GCM_SIV_NONCE_SIZE: usize = 12;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

pub fn aes_256_cbc_encrypt(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_CBC_IV_SIZE],
) -> Result<Vec<u8>, CipherError> {
    let cipher =
        Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CipherError::InvalidKeyOrIv)?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn aes_256_cbc_decrypt(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_CBC_IV_SIZE],
) -> Result<Vec<u8>, CipherError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CipherError::BadCiphertext("ciphertext length must be a multiple of 16"));
    }
    let cipher =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CipherError::InvalidKeyOrIv)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::BadCiphertext("invalid padding"))
}

fn aes_256_ctr_apply(buffer: &mut [u8], key: &[u8; AES_KEY_SIZE]) -> Result<(), CipherError> {
    let nonce = [0u8; 16];
    let mut cipher =
        Aes256Ctr::new_from_slices(key, &nonce).map_err(|_| CipherError::InvalidKeyOrIv)?;
    cipher.apply_keystream(buffer);
    Ok(())
}

/// AES-256-CTR encryption followed by a 10-byte HMAC-SHA256 tag over the ciphertext.
pub fn aes_256_ctr_hmac_encrypt(
    plaintext: &[u8],
    cipher_key: &[u8; AES_KEY_SIZE],
    mac_key: &[u8; 32],
) -> Result<Vec<u8>, CipherError> {
    let mut ciphertext = plaintext.to_vec();
    aes_256_ctr_apply(&mut ciphertext, cipher_key)?;
    let mac = hmac_sha256(mac_key, &[&ciphertext]);
    ciphertext.extend_from_slice(&mac[..CTR_HMAC_TAG_SIZE]);
    Ok(ciphertext)
}

/// Verifies the trailing tag in constant time before decrypting.
pub fn aes_256_ctr_hmac_decrypt(
    ciphertext_tag: &[u8],
    cipher_key: &[u8; AES_KEY_SIZE],
    mac_key: &[u8; 32],
) -> Result<Vec<u8>, CipherError> {
    if ciphertext_tag.len() < CTR_HMAC_TAG_SIZE {
        return Err(CipherError::BadCiphertext("truncated ciphertext"));
    }
    let boundary = ciphertext_tag.len() - CTR_HMAC_TAG_SIZE;
    let (ciphertext, their_mac) = ciphertext_tag.split_at(boundary);

    let our_mac = hmac_sha256(mac_key, &[ciphertext]);
    if !verify_truncated_mac(&our_mac, their_mac) {
        return Err(CipherError::MacMismatch);
    }

    let mut plaintext = ciphertext.to_vec();
    aes_256_ctr_apply(&mut plaintext, cipher_key)?;
    Ok(plaintext)
}

pub fn aes_256_gcm_siv_encrypt(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    nonce: &[u8; GCM_SIV_NONCE_SIZE],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyOrIv)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)
}

pub fn aes_256_gcm_siv_decrypt(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    nonce: &[u8; GCM_SIV_NONCE_SIZE],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyOrIv)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::BadCiphertext("authentication failed"))
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid aes key or iv length")]
    InvalidKeyOrIv,

    #[error("could not encrypt plaintext")]
    EncryptionFailed,

    #[error("could not decrypt ciphertext: {0}")]
    BadCiphertext(&'static str),

    #[error("mac of ciphertext did not match")]
    MacMismatch,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{
        CTR_HMAC_TAG_SIZE, CipherError, aes_256_cbc_decrypt, aes_256_cbc_encrypt,
        aes_256_ctr_hmac_decrypt, aes_256_ctr_hmac_encrypt, aes_256_gcm_siv_decrypt,
        aes_256_gcm_siv_encrypt,
    };

    #[test]
    fn cbc_pads_to_block_size() {
        let rng = Rng::from_seed([1; 32]);
        let key = rng.random_array().unwrap();
        let iv = rng.random_array().unwrap();

        let ciphertext = aes_256_cbc_encrypt(b"Hello, Panda!", &key, &iv).unwrap();
        assert_eq!(ciphertext.len(), 16);
        let ciphertext_full_block = aes_256_cbc_encrypt(&[7; 16], &key, &iv).unwrap();
        assert_eq!(ciphertext_full_block.len(), 32);

        let plaintext = aes_256_cbc_decrypt(&ciphertext, &key, &iv).unwrap();
        assert_eq!(plaintext, b"Hello, Panda!");
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let rng = Rng::from_seed([1; 32]);
        let key = rng.random_array().unwrap();
        let iv = rng.random_array().unwrap();
        assert!(matches!(
            aes_256_cbc_decrypt(&[1, 2, 3], &key, &iv),
            Err(CipherError::BadCiphertext(_))
        ));
        assert!(matches!(
            aes_256_cbc_decrypt(&[], &key, &iv),
            Err(CipherError::BadCiphertext(_))
        ));
    }

    #[test]
    fn ctr_hmac_detects_tampering() {
        let rng = Rng::from_seed([2; 32]);
        let cipher_key = rng.random_array().unwrap();
        let mac_key = rng.random_array().unwrap();

        let ciphertext = aes_256_ctr_hmac_encrypt(b"sealed", &cipher_key, &mac_key).unwrap();
        assert_eq!(ciphertext.len(), b"sealed".len() + CTR_HMAC_TAG_SIZE);
        assert_eq!(
            aes_256_ctr_hmac_decrypt(&ciphertext, &cipher_key, &mac_key).unwrap(),
            b"sealed"
        );

        for index in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[index] ^= 0x01;
            assert!(matches!(
                aes_256_ctr_hmac_decrypt(&tampered, &cipher_key, &mac_key),
                Err(CipherError::MacMismatch)
            ));
        }

        assert!(aes_256_ctr_hmac_decrypt(&ciphertext[..4], &cipher_key, &mac_key).is_err());
    }

    #[test]
    fn gcm_siv_with_zero_nonce() {
        let rng = Rng::from_seed([3; 32]);
        let key = rng.random_array().unwrap();
        let other_key = rng.random_array().unwrap();

        let ciphertext = aes_256_gcm_siv_encrypt(b"Hello, Panda!", &key, &[0; 12]).unwrap();
        assert_eq!(
            aes_256_gcm_siv_decrypt(&ciphertext, &key, &[0; 12]).unwrap(),
            b"Hello, Panda!"
        );
        assert!(aes_256_gcm_siv_decrypt(&ciphertext, &other_key, &[0; 12]).is_err());
    }
}
