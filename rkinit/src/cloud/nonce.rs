use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::Encryptor;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

/// Header the settings service reads the nonce from.
pub const NONCE_HEADER: &str = "Terminus-Nonce";
const NONCE_PREFIX: &str = "appservice:";
const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("nonce key must be 16, 24 or 32 bytes long, got {0}")]
    KeyLength(usize),
}

/// AES-CBC with PKCS7 padding; the IV is the first block of the key.
pub fn encrypt(plain: &[u8], key: &[u8]) -> Result<Vec<u8>, NonceError> {
    if key.len() < IV_LEN {
        return Err(NonceError::KeyLength(key.len()));
    }
    let iv = &key[..IV_LEN];
    let out = match key.len() {
        16 => Encryptor::<Aes128>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plain)),
        24 => Encryptor::<Aes192>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plain)),
        32 => Encryptor::<Aes256>::new_from_slices(key, iv)
            .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plain)),
        n => return Err(NonceError::KeyLength(n)),
    };
    out.map_err(|_| NonceError::KeyLength(key.len()))
}

/// `appservice:` followed by the base64 of the encrypted Unix timestamp.
pub fn generate(key: &[u8], unix_secs: i64) -> Result<String, NonceError> {
    let cipher = encrypt(unix_secs.to_string().as_bytes(), key)?;
    Ok(format!("{NONCE_PREFIX}{}", STANDARD.encode(cipher)))
}
