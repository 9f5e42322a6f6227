//! Secret encryption using AES-256-GCM.
//!
//! Credential tokens and API secrets are sealed before they reach the
//! database. Every ciphertext is bound to its owning `agency_id|provider`
//! through additional authenticated data, so a row copied onto another agency
//! fails to decrypt.
//!
//! Layout: `0x01 | nonce (12 bytes) | ciphertext+tag`.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::Provider;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
}

/// 256-bit key wiped from memory on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Additional authenticated data binding a secret to its credential row.
pub fn credential_aad(agency_id: Uuid, provider: Provider) -> Vec<u8> {
    format!("{agency_id}|{provider}").into_bytes()
}

/// Encrypt bytes using AES-256-GCM with a fresh random nonce.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_ENCRYPTED);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);
    Ok(sealed)
}

/// Decrypt bytes produced by [`encrypt_bytes`].
pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < MIN_ENCRYPTED_LEN || sealed[0] != VERSION_ENCRYPTED {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&sealed[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let body = &sealed[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(body.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(nonce, Payload { msg: body, aad })
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Seal a UTF-8 secret.
pub fn seal_str(key: &CryptoKey, aad: &[u8], secret: &str) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, aad, secret.as_bytes())
}

/// Open a sealed UTF-8 secret.
pub fn open_str(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, aad, sealed)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {e}")))
}
