//! Credential Vault: AES-256-GCM for channel access tokens at rest.
//!
//! - 暗号化は常に `current` 鍵、毎回新しい 96-bit nonce
//! - 復号は記録された鍵バージョンで行う（`legacy` は読み取り専用の CBC）
//! - `current` と記録されたものが開けなければ `previous` でも試す。
//!   ローテーション直後のレコードは再暗号化されるまでこの経路で読む
//! - 認証に失敗したら平文は一切返さない
//!
//! 復号結果は `SecretToken` に包まれ、`Debug` でも中身は出ない。

mod legacy;
mod service;

pub use service::{CredentialService, CredentialServiceError, NewCredential};

#[cfg(test)]
pub(crate) use legacy::encrypt_for_test as legacy_encrypt_for_test;

use std::fmt;
use std::sync::RwLock;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;

use crate::domain::{KeyVersion, SealedSecret};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

pub const KEY_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("the legacy cipher is read-only")]
    LegacyWrite,

    /// Tampered data, wrong key, or malformed nonce/tag.
    #[error("decryption failed")]
    Decryption,

    #[error("no key configured for version {0}")]
    MissingKey(KeyVersion),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Decrypted access token.
///
/// No `Display`; the plaintext is only reachable through [`SecretToken::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// 32-byte key material.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey([u8; KEY_SIZE]);

impl VaultKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            VaultError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, VaultError> {
        let bytes =
            hex::decode(hex_key.trim()).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Fresh random key (demo wiring and tests).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(***)")
    }
}

/// Keys by version.
#[derive(Debug, Clone)]
pub struct KeyRing {
    pub current: VaultKey,
    pub previous: Option<VaultKey>,
    pub legacy: Option<VaultKey>,
}

impl KeyRing {
    pub fn new(current: VaultKey) -> Self {
        Self {
            current,
            previous: None,
            legacy: None,
        }
    }

    pub fn with_previous(mut self, key: VaultKey) -> Self {
        self.previous = Some(key);
        self
    }

    pub fn with_legacy(mut self, key: VaultKey) -> Self {
        self.legacy = Some(key);
        self
    }

    /// Hex-encoded keys as they appear in configuration.
    pub fn from_hex(
        current: &str,
        previous: Option<&str>,
        legacy: Option<&str>,
    ) -> Result<Self, VaultError> {
        Ok(Self {
            current: VaultKey::from_hex(current)?,
            previous: previous.map(VaultKey::from_hex).transpose()?,
            legacy: legacy.map(VaultKey::from_hex).transpose()?,
        })
    }

    fn key(&self, version: KeyVersion) -> Result<&VaultKey, VaultError> {
        match version {
            KeyVersion::Current => Some(&self.current),
            KeyVersion::Previous => self.previous.as_ref(),
            KeyVersion::Legacy => self.legacy.as_ref(),
        }
        .ok_or(VaultError::MissingKey(version))
    }
}

/// Shared, rotatable vault.
#[derive(Debug)]
pub struct CredentialVault {
    keys: RwLock<KeyRing>,
}

impl CredentialVault {
    pub fn new(keys: KeyRing) -> Self {
        Self {
            keys: RwLock::new(keys),
        }
    }

    fn with_keys<R>(&self, f: impl FnOnce(&KeyRing) -> R) -> R {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        f(&keys)
    }

    /// Seals `plaintext` under `version`. Writing with `Legacy` is refused.
    pub fn encrypt(&self, plaintext: &str, version: KeyVersion) -> Result<SealedSecret, VaultError> {
        if version == KeyVersion::Legacy {
            return Err(VaultError::LegacyWrite);
        }
        self.with_keys(|keys| {
            let cipher = gcm_cipher(keys.key(version)?)?;

            let mut nonce_bytes = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);

            // aes-gcm returns ciphertext || tag
            let mut sealed = cipher
                .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
                .map_err(|_| VaultError::Decryption)?;
            let tag = sealed.split_off(sealed.len() - TAG_SIZE);

            Ok(SealedSecret {
                ciphertext: sealed,
                iv: nonce_bytes.to_vec(),
                tag,
                key_version: version,
            })
        })
    }

    pub fn decrypt(&self, sealed: &SealedSecret) -> Result<SecretToken, VaultError> {
        self.open(sealed).map(|(token, _)| token)
    }

    /// Decrypts `sealed` and reports which key actually opened it.
    ///
    /// A record tagged `Current` that was sealed before the last rotation
    /// opens with `Previous`.
    pub fn open(&self, sealed: &SealedSecret) -> Result<(SecretToken, KeyVersion), VaultError> {
        self.with_keys(|keys| {
            let (plaintext, opened_with) = match sealed.key_version {
                KeyVersion::Legacy => {
                    let key = keys.key(KeyVersion::Legacy)?;
                    let plaintext = legacy::decrypt(key.as_bytes(), &sealed.iv, &sealed.ciphertext)?;
                    (plaintext, KeyVersion::Legacy)
                }
                KeyVersion::Previous => {
                    (decrypt_gcm(keys.key(KeyVersion::Previous)?, sealed)?, KeyVersion::Previous)
                }
                KeyVersion::Current => match decrypt_gcm(&keys.current, sealed) {
                    Ok(plaintext) => (plaintext, KeyVersion::Current),
                    Err(VaultError::Decryption) => match &keys.previous {
                        Some(previous) => (decrypt_gcm(previous, sealed)?, KeyVersion::Previous),
                        None => return Err(VaultError::Decryption),
                    },
                    Err(e) => return Err(e),
                },
            };
            let token = String::from_utf8(plaintext)
                .map(SecretToken)
                .map_err(|_| VaultError::Decryption)?;
            Ok((token, opened_with))
        })
    }

    /// Re-encrypts `sealed` under the current key.
    pub fn reseal(&self, sealed: &SealedSecret) -> Result<SealedSecret, VaultError> {
        let token = self.decrypt(sealed)?;
        self.encrypt(token.expose(), KeyVersion::Current)
    }

    /// Current becomes previous, `new_key` becomes current.
    pub fn rotate(&self, new_key: VaultKey) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        let old = std::mem::replace(&mut keys.current, new_key);
        keys.previous = Some(old);
        tracing::info!("vault key rotated");
    }
}

fn gcm_cipher(key: &VaultKey) -> Result<Aes256Gcm, VaultError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| VaultError::InvalidKey(e.to_string()))
}

fn decrypt_gcm(key: &VaultKey, sealed: &SealedSecret) -> Result<Vec<u8>, VaultError> {
    if sealed.iv.len() != NONCE_SIZE || sealed.tag.len() != TAG_SIZE {
        return Err(VaultError::Decryption);
    }
    let cipher = gcm_cipher(key)?;

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(Nonce::from_slice(&sealed.iv), combined.as_slice())
        .map_err(|_| VaultError::Decryption)
}
