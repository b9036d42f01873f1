//! Tuya protocol encryption and decryption logic.
//! AES-128-ECB with PKCS#7 padding, optionally wrapped in Base64 (v3.1 text payloads).

use crate::error::{Result, TuyaError};
use aes::Aes128;
use base64::{Engine as _, engine::general_purpose};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::Pkcs7};
use ecb::{Decryptor, Encryptor};

/// Length of a device local key in bytes.
pub const KEY_LEN: usize = 16;

/// TuyaCipher provides AES-128-ECB encryption and decryption keyed by a device local key.
#[derive(Clone)]
pub struct TuyaCipher {
    /// 16-byte encryption key
    key: [u8; KEY_LEN],
}

impl TuyaCipher {
    /// Create a new TuyaCipher with a 16-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| TuyaError::EncryptionFailed)?;
        Ok(Self { key })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Encrypt data with PKCS#7 padding.
    /// * `use_base64`: If true, encode the result in Base64.
    pub fn encrypt(&self, data: &[u8], use_base64: bool) -> Result<Vec<u8>> {
        let ciphertext =
            Encryptor::<Aes128>::new(&self.key.into()).encrypt_padded_vec_mut::<Pkcs7>(data);

        if use_base64 {
            Ok(general_purpose::STANDARD.encode(&ciphertext).into_bytes())
        } else {
            Ok(ciphertext)
        }
    }

    /// Decrypt data and strip its PKCS#7 padding.
    /// * `use_base64`: If true, the input data is expected to be Base64 encoded.
    pub fn decrypt(&self, data: &[u8], use_base64: bool) -> Result<Vec<u8>> {
        let input_data = if use_base64 {
            general_purpose::STANDARD
                .decode(data)
                .map_err(|_| TuyaError::DecryptionFailed)?
        } else {
            data.to_vec()
        };

        if input_data.is_empty() || input_data.len() % 16 != 0 {
            return Err(TuyaError::DecryptionFailed);
        }

        Decryptor::<Aes128>::new(&self.key.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&input_data)
            .map_err(|_| TuyaError::DecryptionFailed)
    }
}
