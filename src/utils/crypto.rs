//! Token-derived payload cipher.
//!
//! Mi IO devices encrypt every command body with AES-128-CBC. Both the key and
//! the IV come from the 16-byte device token:
//!
//! ```text
//! key = MD5(token)
//! iv  = MD5(key || token)
//! ```
//!
//! Padding is PKCS#7. The scheme is deterministic: the same token and plaintext
//! always give the same ciphertext.

use crate::error::{constants, MiioError, Result};
use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Length of a device token in bytes
pub const TOKEN_SIZE: usize = 16;

/// AES block size
const BLOCK_SIZE: usize = 16;

/// A device token
pub type Token = [u8; TOKEN_SIZE];

/// MD5 digest of a byte slice
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Parse a 32 character hex token. An empty string is accepted as the
/// all-zero token used before the real token is known.
pub fn parse_token(hex_token: &str) -> Result<Token> {
    let trimmed = hex_token.trim();
    if trimmed.is_empty() {
        return Ok([0u8; TOKEN_SIZE]);
    }
    if trimmed.len() != TOKEN_SIZE * 2 {
        return Err(MiioError::ConfigError(format!(
            "token must be {} hex characters, got {}",
            TOKEN_SIZE * 2,
            trimmed.len()
        )));
    }
    let mut token = [0u8; TOKEN_SIZE];
    hex::decode_to_slice(trimmed, &mut token)
        .map_err(|e| MiioError::ConfigError(format!("token is not valid hex: {e}")))?;
    Ok(token)
}

/// Whether a token is an unset placeholder (all 0x00 or all 0xFF)
pub fn is_placeholder_token(token: &Token) -> bool {
    token.iter().all(|b| *b == 0x00) || token.iter().all(|b| *b == 0xFF)
}

/// AES-128-CBC cipher keyed by a device token
#[derive(Clone)]
pub struct MiioCrypto {
    token: Token,
    key: [u8; 16],
    iv: [u8; 16],
}

impl MiioCrypto {
    /// Derive key and IV from the token
    pub fn new(token: &Token) -> Self {
        let key = md5_digest(token);

        let mut seed = Vec::with_capacity(key.len() + token.len());
        seed.extend_from_slice(&key);
        seed.extend_from_slice(token);
        let iv = md5_digest(&seed);

        Self {
            token: *token,
            key,
            iv,
        }
    }

    /// The token this cipher was derived from
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Encrypt a plaintext payload
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|e| MiioError::CryptoError(e.to_string()))?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plain))
    }

    /// Decrypt a payload into its UTF-8 text. Trailing NUL bytes some firmware
    /// appends after the JSON are stripped.
    pub fn decrypt(&self, data: &[u8]) -> Result<String> {
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(MiioError::CryptoError(format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
                data.len()
            )));
        }

        let cipher = Aes128CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|e| MiioError::CryptoError(e.to_string()))?;
        let plain = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| MiioError::CryptoError(constants::ERR_DECRYPTION_FAILED.into()))?;

        let mut text = String::from_utf8(plain)
            .map_err(|_| MiioError::CryptoError(constants::ERR_NOT_UTF8.into()))?;
        let trimmed_len = text.trim_end_matches('\0').len();
        text.truncate(trimmed_len);
        Ok(text)
    }
}

impl std::fmt::Debug for MiioCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiioCrypto").finish_non_exhaustive()
    }
}
