//! Pre-GCM records: AES-256-CBC with PKCS#7 padding, no authentication.
//! Decrypt only; anything read through here gets resealed on next write.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use super::VaultError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub(super) fn decrypt(key: &[u8; 32], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let decryptor =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| VaultError::Decryption)?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::Decryption)
}

/// Produces a legacy record the way the old writer did.
#[cfg(test)]
pub(crate) fn encrypt_for_test(key: &[u8; 32], iv: &[u8; 16], plaintext: &str) -> Vec<u8> {
    use aes::cipher::BlockEncryptMut;

    cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
        .expect("valid key and iv")
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes())
}
