//! AES-256-CBC content encryption with a fresh random IV per call.
//!
//! CBC is unauthenticated: a corrupted ciphertext either fails unpadding here
//! or decrypts to wrong bytes. The pipeline catches the second case with the
//! content digest.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Per-document 256-bit data key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; KEY_SIZE]);

impl DataKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            VaultError::Cipher(format!(
                "data key length invalid (expected {KEY_SIZE}, got {})",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}

pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` under `key` with a newly drawn IV.
pub fn encrypt(plaintext: &[u8], key: &DataKey) -> (Vec<u8>, [u8; IV_SIZE]) {
    let iv = generate_iv();
    let ciphertext = encrypt_with_iv(plaintext, key.as_bytes(), &iv);
    (ciphertext, iv)
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &DataKey, iv: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_iv(ciphertext, key.as_bytes(), iv)
}

pub(crate) fn encrypt_with_iv(plaintext: &[u8], key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub(crate) fn decrypt_with_iv(ciphertext: &[u8], key: &[u8; KEY_SIZE], iv: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(VaultError::Cipher(format!(
            "iv length invalid (expected {IV_SIZE}, got {})",
            iv.len()
        )));
    }
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(VaultError::Cipher(format!(
            "ciphertext length {} is not a positive multiple of the block size",
            ciphertext.len()
        )));
    }
    let decryptor = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| VaultError::Cipher(format!("cipher init: {e}")))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::Cipher("bad padding (wrong key or corrupted data)".to_string()))
}
